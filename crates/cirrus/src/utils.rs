use cirrus_cloud::{ControllerState, RequestContext, RetryPolicy, Store};
use cirrus_cloud_local::{LocalCompute, LocalNetwork};
use cirrus_config::Settings;
use cirrus_controlplane::ControllerOrchestrator;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;

/// Everything a command handler needs
pub struct App {
    pub store: Store,
    pub ctx: RequestContext,
    pub retry: RetryPolicy,
    pub json: bool,
}

impl App {
    pub fn new(store: Store, settings: &Settings, json: bool) -> Self {
        let caller = settings.caller;
        Self {
            store,
            ctx: RequestContext::new(caller.user_id, caller.account_id).with_admin(caller.admin),
            retry: RetryPolicy::new(
                settings.convergence.max_attempts,
                settings.convergence.interval(),
            ),
            json,
        }
    }

    /// Orchestrator over the local compute and network backends
    pub fn orchestrator(&self) -> ControllerOrchestrator {
        ControllerOrchestrator::new(
            self.store.clone(),
            Arc::new(LocalCompute::new(self.store.clone())),
            Arc::new(LocalNetwork::new(self.store.clone())),
        )
        .with_retry(self.retry)
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

pub fn print_header(columns: &str, width: usize) {
    println!("{}", columns.bold());
    println!("{}", "─".repeat(width).dimmed());
}

pub fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn colored_state(state: ControllerState) -> ColoredString {
    let label = state.to_string();
    match state {
        ControllerState::Running => label.green(),
        ControllerState::Stopped => label.dimmed(),
        ControllerState::Alert | ControllerState::Destroying => label.yellow(),
        ControllerState::Error => label.red(),
        ControllerState::Destroyed => label.dimmed(),
    }
}

pub fn success(message: impl Display) {
    println!("{} {}", "✓".green(), message);
}
