//! Failure injection for the local backends

use cirrus_cloud::CloudError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFault {
    /// The hypervisor cannot be reached
    Unavailable,
    /// Another job holds the VM
    Busy,
}

#[derive(Debug, Default)]
struct FaultState {
    vms: HashMap<u64, VmFault>,
    deferred_expunge: HashSet<u64>,
    port_forwarding_unavailable: bool,
}

/// Shared switchboard of injected failures
///
/// Clones share state, so a test can keep one handle and flip faults while
/// the backends are in use.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    state: Arc<Mutex<FaultState>>,
}

impl Faults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make destroy calls for `vm_id` fail until [`Faults::heal`]
    pub async fn fail_vm(&self, vm_id: u64, fault: VmFault) {
        self.state.lock().await.vms.insert(vm_id, fault);
    }

    pub async fn heal(&self, vm_id: u64) {
        self.state.lock().await.vms.remove(&vm_id);
    }

    /// Accept expunge of `vm_id` without ever reporting it removed
    pub async fn defer_expunge(&self, vm_id: u64) {
        self.state.lock().await.deferred_expunge.insert(vm_id);
    }

    pub async fn fail_port_forwarding(&self, unavailable: bool) {
        self.state.lock().await.port_forwarding_unavailable = unavailable;
    }

    pub(crate) async fn check_vm(&self, vm_id: u64) -> cirrus_cloud::Result<()> {
        match self.state.lock().await.vms.get(&vm_id) {
            Some(VmFault::Unavailable) => Err(CloudError::ResourceUnavailable(format!(
                "hypervisor hosting vm {} is unreachable",
                vm_id
            ))),
            Some(VmFault::Busy) => Err(CloudError::ConcurrentOperation(format!(
                "vm {} is locked by another job",
                vm_id
            ))),
            None => Ok(()),
        }
    }

    pub(crate) async fn is_expunge_deferred(&self, vm_id: u64) -> bool {
        self.state.lock().await.deferred_expunge.contains(&vm_id)
    }

    pub(crate) async fn check_port_forwarding(&self) -> cirrus_cloud::Result<()> {
        if self.state.lock().await.port_forwarding_unavailable {
            return Err(CloudError::ResourceUnavailable(
                "virtual router is not reachable".to_string(),
            ));
        }
        Ok(())
    }
}
