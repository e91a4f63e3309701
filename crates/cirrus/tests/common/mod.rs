#![allow(dead_code)]

use assert_cmd::Command;
use cirrus_cloud::{
    Controller, ControllerMembership, MemberRole, Network, PublicIp, StateManager, Store,
    VirtualMachine,
};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tempfile::TempDir;

/// A scratch working directory with its own state directory
pub struct TestState {
    pub root: TempDir,
}

impl TestState {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state")
    }

    /// `cirrus` isolated from any settings file on the machine
    #[allow(deprecated)]
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("cirrus").unwrap();
        cmd.current_dir(self.root.path())
            .env("CIRRUS_CONFIG_PATH", self.root.path().join("missing.yaml"))
            .env("CIRRUS_STATE_DIR", self.state_dir())
            .env_remove("RUST_LOG");
        cmd
    }

    pub async fn store(&self) -> Store {
        Store::open(StateManager::new(self.state_dir())).await.unwrap()
    }

    /// Persist a running controller with one VM on an isolated network
    /// that has a source NAT address. Returns (controller, network).
    pub async fn seed_controller(&self) -> (Controller, Network) {
        let store = self.store().await;
        let network = store
            .persist(Network::new("ctrl-net", 1, 1, 1))
            .await
            .unwrap();
        let controller = store
            .persist(
                Controller::new("ctrl", 1, 1)
                    .with_zone(1)
                    .with_network(network.id),
            )
            .await
            .unwrap();
        store
            .persist(PublicIp::source_nat(Ipv4Addr::new(198, 51, 100, 7), network.id))
            .await
            .unwrap();
        let vm = store
            .persist(VirtualMachine::new("ctrl-node-0"))
            .await
            .unwrap();
        store
            .persist(ControllerMembership::new(
                controller.id,
                vm.id,
                MemberRole::Control,
            ))
            .await
            .unwrap();
        (controller, network)
    }
}
