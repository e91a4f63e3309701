//! Controller destroy workflow
//!
//! A destroy walks the controller through `Destroying`, reclaims its member
//! VMs, waits for their expunge, unwinds the rules on its network and finally
//! deletes the record. Any failure after the controller entered
//! `Destroying` leaves it in `Error` with a GC marker instead of deleting it,
//! so the sweep in [`crate::gc`] or an operator can pick it up again.

use crate::convergence::wait_for_members_removed;
use crate::error::{ControlPlaneError, Result};
use crate::reclaimer::MemberReclaimer;
use chrono::Utc;
use cirrus_cloud::{
    CloudError, ComputeService, Controller, ControllerEvent, ControllerMembership,
    ControllerState, DeployedResource, GuestType, Network, NetworkService, PortForwardingRule,
    RequestContext, RetryPolicy, Store,
};
use cirrus_network::NetworkRuleUnwinder;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ControllerOrchestrator {
    store: Store,
    compute: Arc<dyn ComputeService>,
    network: Arc<dyn NetworkService>,
    reclaimer: MemberReclaimer,
    unwinder: NetworkRuleUnwinder,
    retry: RetryPolicy,
}

impl ControllerOrchestrator {
    pub fn new(
        store: Store,
        compute: Arc<dyn ComputeService>,
        network: Arc<dyn NetworkService>,
    ) -> Self {
        Self {
            reclaimer: MemberReclaimer::new(store.clone(), compute.clone()),
            unwinder: NetworkRuleUnwinder::new(network.clone()),
            store,
            compute,
            network,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the convergence wait budget
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Tear down controller `controller_id` and everything it provisioned
    ///
    /// Returns `Ok(true)` when the record was deleted and `Ok(false)` when
    /// teardown finished but the delete did not go through; the controller
    /// is then marked for GC.
    pub async fn destroy(&self, ctx: &RequestContext, controller_id: u64) -> Result<bool> {
        let controller = self.store.get::<Controller>(controller_id).await?;
        validate_state(&controller)?;
        self.validate_no_dependents(&controller).await?;

        let members = self
            .store
            .list(|m: &ControllerMembership| m.controller_id == controller_id)
            .await;
        info!(
            controller = %controller.name,
            members = members.len(),
            request = %ctx.request_id,
            "Destroying controller"
        );

        let controller = self
            .store
            .transition::<Controller>(
                controller_id,
                controller.state,
                ControllerEvent::DestroyRequested,
            )
            .await?;

        if let Err(cause) = self.teardown(ctx, &controller, &members).await {
            return Err(self.fail(&controller, cause).await);
        }

        self.finish(&controller).await
    }

    /// Record the successful teardown and delete the controller
    async fn finish(&self, controller: &Controller) -> Result<bool> {
        if let Err(e) = self
            .store
            .transition::<Controller>(
                controller.id,
                ControllerState::Destroying,
                ControllerEvent::OperationSucceeded,
            )
            .await
        {
            warn!(controller = %controller.name, error = %e, "Controller changed during teardown");
            if let Err(e) = self.mark_for_gc(controller.id).await {
                warn!(controller = %controller.name, error = %e, "Failed to mark controller for GC");
            }
            return Err(e.into());
        }

        self.delete_record(controller).await
    }

    async fn delete_record(&self, controller: &Controller) -> Result<bool> {
        if !self.store.remove::<Controller>(controller.id).await? {
            warn!(controller = %controller.name, "Failed to delete controller");
            if let Err(e) = self.mark_for_gc(controller.id).await {
                warn!(controller = %controller.name, error = %e, "Failed to mark controller for GC");
            }
            return Ok(false);
        }

        info!(controller = %controller.name, "Controller is successfully deleted");
        Ok(true)
    }

    async fn validate_no_dependents(&self, controller: &Controller) -> Result<()> {
        let count = self
            .store
            .list(|r: &DeployedResource| r.controller_id == controller.id)
            .await
            .len();
        if count > 0 {
            warn!(controller = %controller.name, count, "Deployed resources block controller delete");
            return Err(ControlPlaneError::DependentResourcesExist {
                name: controller.name.clone(),
                count,
            });
        }
        Ok(())
    }

    async fn teardown(
        &self,
        ctx: &RequestContext,
        controller: &Controller,
        members: &[ControllerMembership],
    ) -> std::result::Result<(), String> {
        let outcome = self
            .reclaimer
            .reclaim_all(ctx, controller, members)
            .await
            .map_err(|e| format!("Failed to destroy VMs of controller: {}", e))?;
        if let Some((vm_id, reason)) = outcome.failed {
            return Err(format!(
                "Failed to destroy one or more VMs as part of controller cleanup (vm {}: {})",
                vm_id, reason
            ));
        }
        debug!(
            controller = %controller.name,
            destroyed = ?outcome.destroyed,
            skipped = ?outcome.skipped,
            "Member VMs reclaimed"
        );

        let vm_ids: Vec<u64> = members.iter().map(|m| m.vm_id).collect();
        if !wait_for_members_removed(self.compute.as_ref(), &vm_ids, self.retry).await {
            warn!(controller = %controller.name, "Member VMs are still being expunged, moving on");
        }

        self.delete_network_rules(ctx, controller, &vm_ids)
            .await
            .map_err(|e| format!("Failed to remove network rules of controller: {}", e))
    }

    /// Unwind rules on the controller's network unless it is shared
    async fn delete_network_rules(
        &self,
        ctx: &RequestContext,
        controller: &Controller,
        vm_ids: &[u64],
    ) -> Result<()> {
        let Some(network_id) = controller.network_id else {
            return Ok(());
        };
        let Some(network) = self.network.find_network(network_id).await? else {
            return Ok(());
        };
        if network.guest_type == GuestType::Shared {
            debug!(network = %network.name, "Leaving rules of shared network in place");
            return Ok(());
        }

        let vm_ids = self.port_forward_targets(&network, vm_ids).await?;
        let report = self
            .unwinder
            .unwind(ctx, &network, controller.account_id, &vm_ids)
            .await?;
        debug!(
            network = %network.name,
            ip = %report.source_nat_ip.address,
            port_forwarding_removed = report.port_forwarding_removed,
            "Network rules removed"
        );
        Ok(())
    }

    /// VMs whose port forwards on `network` must go: the current members plus
    /// any VM that is already removed or absent. The latter covers members
    /// reclaimed by an earlier pass whose membership rows are gone.
    async fn port_forward_targets(&self, network: &Network, members: &[u64]) -> Result<Vec<u64>> {
        let network_id = network.id;
        let forwarded: BTreeSet<u64> = self
            .store
            .list(|r: &PortForwardingRule| r.network_id == network_id)
            .await
            .into_iter()
            .map(|r| r.vm_id)
            .filter(|vm_id| !members.contains(vm_id))
            .collect();

        let mut vm_ids = members.to_vec();
        for vm_id in forwarded {
            match self.compute.find_vm(vm_id).await? {
                Some(vm) if !vm.is_removed() => {}
                _ => vm_ids.push(vm_id),
            }
        }
        Ok(vm_ids)
    }

    /// Move a failed teardown to `Error` and leave the record for GC
    async fn fail(&self, controller: &Controller, cause: String) -> ControlPlaneError {
        warn!(controller = %controller.name, %cause, "Controller teardown failed");

        if let Err(e) = self
            .store
            .transition::<Controller>(
                controller.id,
                ControllerState::Destroying,
                ControllerEvent::OperationFailed,
            )
            .await
        {
            warn!(controller = %controller.name, error = %e, "Failed to move controller to error state");
        }
        if let Err(e) = self.mark_for_gc(controller.id).await {
            warn!(controller = %controller.name, error = %e, "Failed to mark controller for GC");
        }

        ControlPlaneError::TeardownIncomplete {
            controller: controller.name.clone(),
            cause,
        }
    }

    /// Touch the controller record so the GC sweep picks it up
    pub async fn mark_for_gc(&self, controller_id: u64) -> Result<bool> {
        let marked = self
            .store
            .transaction(|tx| {
                let Some(mut controller) = tx.find::<Controller>(controller_id).cloned() else {
                    return Ok::<_, CloudError>(false);
                };
                let now = Utc::now();
                controller.gc_requested_at = Some(now);
                controller.updated_at = now;
                Ok(tx.update(&controller))
            })
            .await?;
        Ok(marked)
    }

    /// Controllers in `zone_id`, plus those not pinned to any zone
    pub async fn list_in_zone(&self, zone_id: u64) -> Vec<Controller> {
        self.store
            .list(|c: &Controller| c.zone_id.is_none_or(|z| z == zone_id))
            .await
    }

    pub async fn list_in_state(&self, state: ControllerState) -> Vec<Controller> {
        self.store.list(|c: &Controller| c.state == state).await
    }

    pub async fn list_gc_pending(&self) -> Vec<Controller> {
        self.store.list(|c: &Controller| c.is_gc_pending()).await
    }
}

fn validate_state(controller: &Controller) -> Result<()> {
    match controller.state {
        ControllerState::Running
        | ControllerState::Stopped
        | ControllerState::Alert
        | ControllerState::Error
        | ControllerState::Destroying => Ok(()),
        state => {
            warn!(controller = %controller.name, %state, "Controller cannot be deleted in this state");
            Err(ControlPlaneError::InvalidState {
                name: controller.name.clone(),
                state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_cloud_local::{LocalCompute, LocalNetwork};

    fn orchestrator(store: &Store) -> ControllerOrchestrator {
        ControllerOrchestrator::new(
            store.clone(),
            Arc::new(LocalCompute::new(store.clone())),
            Arc::new(LocalNetwork::new(store.clone())),
        )
        .with_retry(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_delete_record_reports_lost_delete() {
        let store = Store::in_memory();
        let controller = store
            .persist(Controller::new("ctrl", 10, 100).with_state(ControllerState::Destroyed))
            .await
            .unwrap();
        let orchestrator = orchestrator(&store);

        // someone else deleted the row after the final transition
        assert!(store.remove::<Controller>(controller.id).await.unwrap());
        assert!(!orchestrator.delete_record(&controller).await.unwrap());
        // marking a missing record must not bring it back
        assert!(store.find::<Controller>(controller.id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_record_removes_row() {
        let store = Store::in_memory();
        let controller = store
            .persist(Controller::new("ctrl", 10, 100).with_state(ControllerState::Destroyed))
            .await
            .unwrap();

        assert!(orchestrator(&store).delete_record(&controller).await.unwrap());
        assert!(store.find::<Controller>(controller.id).await.is_none());
    }

    #[tokio::test]
    async fn test_finish_marks_for_gc_when_state_moved() {
        let store = Store::in_memory();
        let controller = store
            .persist(Controller::new("ctrl", 10, 100).with_state(ControllerState::Alert))
            .await
            .unwrap();

        let err = orchestrator(&store).finish(&controller).await.unwrap_err();
        assert!(matches!(
            err,
            ControlPlaneError::Cloud(CloudError::ConcurrentModification { .. })
        ));
        let kept = store.get::<Controller>(controller.id).await.unwrap();
        assert!(kept.gc_requested_at.is_some());
    }

    #[tokio::test]
    async fn test_port_forward_targets_include_removed_vms() {
        let store = Store::in_memory();
        let network = store
            .persist(Network::new("net", 1, 10, 100))
            .await
            .unwrap();
        let live = store
            .persist(cirrus_cloud::VirtualMachine::new("live"))
            .await
            .unwrap();
        let mut gone = cirrus_cloud::VirtualMachine::new("gone");
        gone.removed = Some(Utc::now());
        let gone = store.persist(gone).await.unwrap();
        for vm_id in [live.id, gone.id, 404] {
            store
                .persist(PortForwardingRule::new(1, network.id, vm_id, 8080, 80))
                .await
                .unwrap();
        }

        let mut targets = orchestrator(&store)
            .port_forward_targets(&network, &[77])
            .await
            .unwrap();
        targets.sort();
        let mut expected = vec![77, gone.id, 404];
        expected.sort();
        assert_eq!(targets, expected);
    }
}
