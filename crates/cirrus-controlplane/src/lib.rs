//! Cirrus control plane
//!
//! Destroys managed controllers together with the VMs and network rules they
//! provisioned, and sweeps up controllers whose teardown was interrupted.
//!
//! ```ignore
//! let orchestrator = ControllerOrchestrator::new(store, compute, network);
//! orchestrator.destroy(&RequestContext::new(2, 10), controller_id).await?;
//! ```

pub mod convergence;
pub mod error;
pub mod gc;
pub mod orchestrator;
pub mod reclaimer;

pub use convergence::wait_for_members_removed;
pub use error::{ControlPlaneError, Result};
pub use gc::{GarbageCollector, SweepEntry, SweepReport};
pub use orchestrator::ControllerOrchestrator;
pub use reclaimer::{MemberReclaimer, ReclaimOutcome};
