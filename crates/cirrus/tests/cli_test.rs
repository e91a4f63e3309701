#![allow(deprecated)]

mod common;

use assert_cmd::Command;
use cirrus_cloud::{Controller, StateManager, VirtualMachine};
use common::TestState;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("cirrus").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("subnet"))
        .stdout(predicate::str::contains("allocation"))
        .stdout(predicate::str::contains("controller"))
        .stdout(predicate::str::contains("firewall"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("cirrus").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cirrus"));
}

#[test]
fn test_allocation_create_needs_a_size() {
    let state = TestState::new();
    state
        .cmd()
        .args(["allocation", "create", "--parent", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--cidr"));
}

#[test]
fn test_subnet_create_and_list() {
    let state = TestState::new();

    state
        .cmd()
        .args(["subnet", "create", "--zone", "1", "10.10.0.0/16"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created subnet"));

    state
        .cmd()
        .args(["subnet", "list", "--zone", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.10.0.0/16"));

    let output = state
        .cmd()
        .args(["--json", "subnet", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let subnets: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(subnets.as_array().unwrap().len(), 1);
    assert_eq!(subnets[0]["cidr"], "10.10.0.0/16");

    // the lock is released after every command
    assert!(!state.state_dir().join("lock.json").exists());
}

#[test]
fn test_overlapping_subnet_is_rejected() {
    let state = TestState::new();
    state
        .cmd()
        .args(["subnet", "create", "--zone", "1", "10.10.0.0/16"])
        .assert()
        .success();

    state
        .cmd()
        .args(["subnet", "create", "--zone", "1", "10.10.128.0/17"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has overlap with"));

    // other zones are independent
    state
        .cmd()
        .args(["subnet", "create", "--zone", "2", "10.10.128.0/17"])
        .assert()
        .success();
}

#[test]
fn test_invalid_cidr_is_rejected() {
    let state = TestState::new();
    state
        .cmd()
        .args(["subnet", "create", "--zone", "1", "10.10.0.0/33"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid IPv4 CIDR"));
}

#[test]
fn test_allocation_lifecycle() {
    let state = TestState::new();
    state
        .cmd()
        .args(["subnet", "create", "--zone", "1", "10.20.0.0/16"])
        .assert()
        .success();

    state
        .cmd()
        .args(["allocation", "create", "--parent", "1", "--cidr", "10.20.1.0/24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.20.1.0/24"));

    state
        .cmd()
        .args(["allocation", "list", "--zone", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.20.1.0/24"))
        .stdout(predicate::str::contains("free"));

    state
        .cmd()
        .args(["allocation", "create", "--parent", "1", "--cidr", "10.30.0.0/24"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not within cidr"));
}

#[tokio::test]
async fn test_assign_and_release_block() {
    let state = TestState::new();
    let (_, network) = state.seed_controller().await;

    state
        .cmd()
        .args(["allocation", "assign", "--network"])
        .arg(network.id.to_string())
        .args(["--cidr", "192.168.50.0/24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assigned to ctrl-net"));

    state
        .cmd()
        .args(["allocation", "release", "--network"])
        .arg(network.id.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Released"));

    state
        .cmd()
        .args(["allocation", "release", "--network"])
        .arg(network.id.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("no block assigned"));
}

#[tokio::test]
async fn test_controller_destroy() {
    let state = TestState::new();
    let (controller, _) = state.seed_controller().await;

    state
        .cmd()
        .args(["controller", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ctrl"))
        .stdout(predicate::str::contains("running"));

    state
        .cmd()
        .args(["controller", "destroy"])
        .arg(controller.id.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Destroyed controller ctrl"));

    let store = state.store().await;
    assert!(store.find::<Controller>(controller.id).await.is_none());
    let vms = store.list_all::<VirtualMachine>().await;
    assert!(vms.iter().all(VirtualMachine::is_removed));

    state
        .cmd()
        .args(["controller", "destroy"])
        .arg(controller.id.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[tokio::test]
async fn test_controller_mark_and_gc() {
    let state = TestState::new();
    let (controller, _) = state.seed_controller().await;

    state
        .cmd()
        .args(["controller", "mark"])
        .arg(controller.id.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("queued for GC"));

    state
        .cmd()
        .args(["controller", "list", "--gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ctrl"));

    state
        .cmd()
        .args(["controller", "gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 collected, 0 pending"));

    state
        .cmd()
        .args(["controller", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No controllers found"));
}

#[tokio::test]
async fn test_firewall_rule_lifecycle() {
    let state = TestState::new();
    let (_, network) = state.seed_controller().await;
    let network_id = network.id.to_string();

    let output = state
        .cmd()
        .args(["--json", "firewall", "create", "--network", &network_id])
        .args(["--protocol", "tcp", "--traffic", "ingress"])
        .args(["--start-port", "80", "--end-port", "90"])
        .args(["--source-cidr", "10.0.0.0/8"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rule: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rule["state"], "add");
    let rule_id = rule["id"].as_u64().unwrap().to_string();

    state
        .cmd()
        .args(["firewall", "create", "--network", &network_id])
        .args(["--protocol", "tcp", "--traffic", "ingress"])
        .args(["--start-port", "85", "--end-port", "85"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("conflict"));

    state
        .cmd()
        .args(["firewall", "apply", &rule_id])
        .assert()
        .success();

    state
        .cmd()
        .args(["firewall", "list", "--network", &network_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("80-90"))
        .stdout(predicate::str::contains("active"));

    state
        .cmd()
        .args(["firewall", "revoke", &rule_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("[revoke]"));

    state
        .cmd()
        .args(["firewall", "apply", &rule_id])
        .assert()
        .success();

    state
        .cmd()
        .args(["firewall", "list", "--network", &network_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("No firewall rules found"));
}

#[tokio::test]
async fn test_held_lock_blocks_commands() {
    let state = TestState::new();
    let lock = StateManager::new(state.state_dir())
        .acquire_lock()
        .await
        .unwrap();

    state
        .cmd()
        .args(["subnet", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("locked"));

    lock.release().await.unwrap();
    state.cmd().args(["subnet", "list"]).assert().success();
}
