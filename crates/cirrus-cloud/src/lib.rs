//! Cirrus Cloud
//!
//! Shared foundation of the Cirrus control plane: the persisted records, the
//! resource store, the lifecycle state machines and the traits behind which
//! the compute and network subsystems live.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              cirrus-controlplane                 │
//! │        (destroy orchestration, GC sweep)         │
//! └──────────┬──────────────────────┬───────────────┘
//!            │                      │
//! ┌──────────▼──────────┐  ┌────────▼──────────────┐
//! │    cirrus-network    │  │   cirrus-cloud-local  │
//! │ subnets / firewall / │  │  store-backed compute │
//! │   rule unwinding     │  │   and network backend │
//! └──────────┬──────────┘  └────────┬──────────────┘
//!            │                      │
//! ┌──────────▼──────────────────────▼───────────────┐
//! │                  cirrus-cloud                    │
//! │  ┌────────────┐ ┌────────────┐ ┌─────────────┐  │
//! │  │   Store    │ │    FSM     │ │  Providers  │  │
//! │  └────────────┘ └────────────┘ └─────────────┘  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod fsm;
pub mod model;
pub mod provider;
pub mod state;
pub mod store;

// Re-exports
pub use error::{CloudError, Result};
pub use fsm::{
    AllocationLifecycle, ControllerLifecycle, StateMachine, Stateful, VmLifecycle,
};
pub use model::*;
pub use provider::{ComputeService, NetworkService, RequestContext, RetryPolicy};
pub use state::{Snapshot, StateLock, StateManager, Tables};
pub use store::{Record, Store, Transaction};
