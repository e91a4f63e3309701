//! Bounded wait for asynchronous expunges to land

use cirrus_cloud::{ComputeService, RetryPolicy};
use tracing::{debug, warn};

/// Poll until none of `vm_ids` is present and un-removed
///
/// Returns `false` once the retry budget is spent. Not cancellable.
pub async fn wait_for_members_removed(
    compute: &dyn ComputeService,
    vm_ids: &[u64],
    policy: RetryPolicy,
) -> bool {
    if vm_ids.is_empty() {
        return true;
    }

    for attempt in 1..=policy.max_attempts {
        if all_removed(compute, vm_ids).await {
            return true;
        }
        debug!(attempt, max = policy.max_attempts, "Waiting for member VMs to be expunged");
        tokio::time::sleep(policy.interval).await;
    }
    all_removed(compute, vm_ids).await
}

async fn all_removed(compute: &dyn ComputeService, vm_ids: &[u64]) -> bool {
    for &vm_id in vm_ids {
        match compute.find_vm(vm_id).await {
            Ok(Some(vm)) if !vm.is_removed() => return false,
            Ok(_) => {}
            Err(e) => {
                warn!(vm_id, error = %e, "Failed to look up member VM");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_cloud::{RequestContext, Store, VirtualMachine};
    use cirrus_cloud_local::{Faults, LocalCompute};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let store = Store::in_memory();
        let vm = store.persist(VirtualMachine::new("slow")).await.unwrap();
        let faults = Faults::new();
        faults.defer_expunge(vm.id).await;
        let compute = LocalCompute::with_faults(store, faults);
        compute
            .destroy_vm(&RequestContext::system(), vm.id, true)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let converged =
            wait_for_members_removed(&compute, &[vm.id], RetryPolicy::default()).await;
        assert!(!converged);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_at_once_when_removed() {
        let store = Store::in_memory();
        let vm = store.persist(VirtualMachine::new("fast")).await.unwrap();
        let compute = LocalCompute::new(store);
        compute
            .destroy_vm(&RequestContext::system(), vm.id, true)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        assert!(wait_for_members_removed(&compute, &[vm.id, 404], RetryPolicy::default()).await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
