//! Compute backend over the resource store

use crate::faults::Faults;
use async_trait::async_trait;
use chrono::Utc;
use cirrus_cloud::{
    ComputeService, RequestContext, Result, Store, VirtualMachine, VmEvent, VmState,
};
use tracing::{debug, info};

/// VMs are rows of the store; destroy and expunge walk them through the VM
/// lifecycle table.
#[derive(Debug, Clone)]
pub struct LocalCompute {
    store: Store,
    faults: Faults,
}

impl LocalCompute {
    pub fn new(store: Store) -> Self {
        Self::with_faults(store, Faults::new())
    }

    pub fn with_faults(store: Store, faults: Faults) -> Self {
        Self { store, faults }
    }
}

#[async_trait]
impl ComputeService for LocalCompute {
    fn name(&self) -> &str {
        "local"
    }

    async fn find_vm(&self, vm_id: u64) -> Result<Option<VirtualMachine>> {
        Ok(self.store.find::<VirtualMachine>(vm_id).await)
    }

    async fn destroy_vm(
        &self,
        ctx: &RequestContext,
        vm_id: u64,
        expunge: bool,
    ) -> Result<VirtualMachine> {
        self.faults.check_vm(vm_id).await?;

        let vm = self.store.get::<VirtualMachine>(vm_id).await?;
        let vm = match vm.state {
            VmState::Destroyed | VmState::Expunging => vm,
            current => {
                self.store
                    .transition::<VirtualMachine>(vm_id, current, VmEvent::Destroy)
                    .await?
            }
        };
        info!(vm = %vm.instance_name, request = %ctx.request_id, "Destroyed VM");

        if expunge {
            self.expunge_vm(ctx, &vm).await?;
            return self.store.get::<VirtualMachine>(vm_id).await;
        }
        Ok(vm)
    }

    async fn expunge_vm(&self, ctx: &RequestContext, vm: &VirtualMachine) -> Result<bool> {
        let deferred = self.faults.is_expunge_deferred(vm.id).await;

        self.store
            .transaction(|tx| {
                let mut current = tx.get::<VirtualMachine>(vm.id)?.clone();
                match current.state {
                    VmState::Destroyed => {
                        current = tx.transition::<VirtualMachine>(
                            vm.id,
                            VmState::Destroyed,
                            VmEvent::Expunge,
                        )?;
                    }
                    VmState::Expunging => {}
                    _ => return Ok(false),
                }
                if !deferred && current.removed.is_none() {
                    current.removed = Some(Utc::now());
                    tx.update(&current);
                }
                Ok(true)
            })
            .await
            .inspect(|accepted| {
                debug!(
                    vm = %vm.instance_name,
                    request = %ctx.request_id,
                    accepted,
                    deferred,
                    "Expunge requested"
                );
            })
    }
}
