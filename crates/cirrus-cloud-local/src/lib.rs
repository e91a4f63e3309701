//! Local backends for Cirrus
//!
//! Implements [`ComputeService`](cirrus_cloud::ComputeService) and
//! [`NetworkService`](cirrus_cloud::NetworkService) on top of the resource
//! store, so the control plane can run against a single `state.json`.
//!
//! # Example
//!
//! ```ignore
//! use cirrus_cloud::{Store, StateManager};
//! use cirrus_cloud_local::{LocalCompute, LocalNetwork};
//!
//! let store = Store::open(StateManager::new(".cirrus")).await?;
//! let compute = LocalCompute::new(store.clone());
//! let network = LocalNetwork::new(store);
//! ```
//!
//! [`Faults`] lets tests make individual calls fail the way real
//! infrastructure does.

pub mod compute;
pub mod faults;
pub mod network;

pub use compute::LocalCompute;
pub use faults::{Faults, VmFault};
pub use network::LocalNetwork;
