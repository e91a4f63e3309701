//! Control plane error types

use cirrus_cloud::{CloudError, ControllerState};
use cirrus_network::NetworkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("Cannot perform delete operation on controller {name} in state: {state}")]
    InvalidState { name: String, state: ControllerState },

    #[error(
        "Cannot delete controller {name}: {count} deployed resources must be deleted first"
    )]
    DependentResourcesExist { name: String, count: usize },

    /// Teardown stopped part way; the controller is kept and marked for GC
    #[error("Failed to tear down controller {controller}: {cause}")]
    TeardownIncomplete { controller: String, cause: String },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
