//! GC sweep over controllers left behind by failed teardowns

mod common;

use cirrus_cloud::{Controller, ControllerState, RequestContext};
use cirrus_cloud_local::VmFault;
use cirrus_controlplane::GarbageCollector;
use common::Fixture;
use std::sync::Arc;

#[tokio::test]
async fn test_sweep_finishes_interrupted_teardown() {
    let fx = Fixture::new(2).await;
    let orchestrator = Arc::new(fx.orchestrator());
    let gc = GarbageCollector::new(orchestrator.clone());
    let ctx = RequestContext::system();

    fx.faults.fail_vm(fx.vms[0].id, VmFault::Unavailable).await;
    assert!(orchestrator.destroy(&ctx, fx.controller.id).await.is_err());

    // still broken: the sweep reports it and keeps it around
    let report = gc.sweep(&ctx).await;
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].controller_id, fx.controller.id);
    assert!(report.failed[0].error.is_some());
    assert_eq!(
        fx.controller().await.unwrap().state,
        ControllerState::Error
    );

    fx.faults.heal(fx.vms[0].id).await;
    let report = gc.sweep(&ctx).await;
    assert!(report.is_success());
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.succeeded[0].name, "ctrl");
    assert!(fx.controller().await.is_none());
    assert!(orchestrator.list_gc_pending().await.is_empty());
}

#[tokio::test]
async fn test_sweep_ignores_healthy_controllers() {
    let fx = Fixture::new(1).await;
    let gc = GarbageCollector::new(Arc::new(fx.orchestrator()));

    let report = gc.sweep(&RequestContext::system()).await;
    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        fx.controller().await.unwrap().state,
        ControllerState::Running
    );
}

#[tokio::test]
async fn test_sweep_leaves_unmarked_errored_controllers() {
    let fx = Fixture::new(1).await;
    let errored = fx
        .store
        .persist(Controller::new("flaky", common::OWNER, common::DOMAIN).with_state(ControllerState::Error))
        .await
        .unwrap();
    let gc = GarbageCollector::new(Arc::new(fx.orchestrator()));

    let report = gc.sweep(&RequestContext::system()).await;
    assert!(report.succeeded.is_empty());
    assert!(fx.store.find::<Controller>(errored.id).await.is_some());
    assert_eq!(fx.vm(0).await.state, cirrus_cloud::VmState::Running);
}
