//! Cirrus Network
//!
//! Guest networking pieces of the control plane:
//!
//! - [`SubnetManager`]: zone IPv4 pools, dedication, and the blocks handed to
//!   guest networks
//! - [`FirewallManager`]: routing firewall rules with conflict detection
//! - [`NetworkRuleUnwinder`]: rule teardown used when a controller is destroyed

pub mod cidr;
pub mod error;
pub mod firewall;
pub mod subnet;
pub mod unwinder;

pub use cidr::{is_within, overlaps, parse_cidr};
pub use error::{NetworkError, Result};
pub use firewall::{CreateFirewallRule, FirewallManager};
pub use subnet::{AllocationFilter, AllocationRequest, Dedication, SubnetFilter, SubnetManager};
pub use unwinder::{NetworkRuleUnwinder, UnwindReport};
