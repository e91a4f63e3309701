//! Reclamation of the VMs a controller is made of

use crate::error::Result;
use cirrus_cloud::{ComputeService, Controller, ControllerMembership, RequestContext, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to each member during one reclaim pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// VM ids destroyed in this pass
    pub destroyed: Vec<u64>,
    /// VM ids already gone before this pass
    pub skipped: Vec<u64>,
    /// The member that stopped the pass, with the reason
    pub failed: Option<(u64, String)>,
}

impl ReclaimOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_none()
    }
}

pub struct MemberReclaimer {
    store: Store,
    compute: Arc<dyn ComputeService>,
}

impl MemberReclaimer {
    pub fn new(store: Store, compute: Arc<dyn ComputeService>) -> Self {
        Self { store, compute }
    }

    /// Destroy and expunge every member VM, deleting each membership row once
    /// its VM is gone.
    ///
    /// The first transient compute failure ends the pass and later members
    /// are left alone. Members whose VM is already gone are skipped, so
    /// running the pass again resumes where the last one stopped.
    pub async fn reclaim_all(
        &self,
        ctx: &RequestContext,
        controller: &Controller,
        members: &[ControllerMembership],
    ) -> Result<ReclaimOutcome> {
        let mut outcome = ReclaimOutcome::default();

        for member in members {
            let vm = match self.compute.find_vm(member.vm_id).await? {
                Some(vm) if !vm.is_removed() => vm,
                _ => {
                    self.store.remove::<ControllerMembership>(member.id).await?;
                    outcome.skipped.push(member.vm_id);
                    continue;
                }
            };

            match self.compute.destroy_vm(ctx, vm.id, true).await {
                Ok(destroyed) => {
                    if !self.compute.expunge_vm(ctx, &destroyed).await? {
                        warn!(
                            vm = %destroyed.instance_name,
                            uuid = %destroyed.uuid,
                            "Unable to expunge VM, destroying controller will probably fail"
                        );
                    }
                    self.store.remove::<ControllerMembership>(member.id).await?;
                    info!(
                        vm = %destroyed.display_name,
                        controller = %controller.name,
                        "Destroyed VM as part of controller cleanup"
                    );
                    outcome.destroyed.push(vm.id);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        vm = %vm.display_name,
                        controller = %controller.name,
                        error = %e,
                        "Failed to destroy VM of controller"
                    );
                    outcome.failed = Some((vm.id, e.to_string()));
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }
}
