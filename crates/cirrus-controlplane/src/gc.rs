//! Garbage collection of controllers whose teardown did not finish

use crate::orchestrator::ControllerOrchestrator;
use cirrus_cloud::RequestContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Controllers deleted by this sweep
    pub succeeded: Vec<SweepEntry>,

    /// Controllers that are still pending
    pub failed: Vec<SweepEntry>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl SweepReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, controller_id: u64, name: String) {
        self.succeeded.push(SweepEntry {
            controller_id,
            name,
            error: None,
        });
    }

    pub fn add_failure(&mut self, controller_id: u64, name: String, error: String) {
        self.failed.push(SweepEntry {
            controller_id,
            name,
            error: Some(error),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    pub controller_id: u64,
    pub name: String,
    pub error: Option<String>,
}

pub struct GarbageCollector {
    orchestrator: Arc<ControllerOrchestrator>,
}

impl GarbageCollector {
    pub fn new(orchestrator: Arc<ControllerOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Retry destroy for every controller carrying a GC marker or stuck in
    /// `Destroying`
    pub async fn sweep(&self, ctx: &RequestContext) -> SweepReport {
        let mut report = SweepReport::new();
        let start = std::time::Instant::now();

        let pending = self.orchestrator.list_gc_pending().await;
        info!(count = pending.len(), "Sweeping controllers pending GC");

        for controller in pending {
            match self.orchestrator.destroy(ctx, controller.id).await {
                Ok(true) => report.add_success(controller.id, controller.name),
                Ok(false) => report.add_failure(
                    controller.id,
                    controller.name,
                    "record could not be deleted".to_string(),
                ),
                Err(e) => {
                    warn!(controller = %controller.name, error = %e, "GC destroy failed");
                    report.add_failure(controller.id, controller.name, e.to_string());
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}
