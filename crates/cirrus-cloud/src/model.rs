//! Persisted records managed by the control plane
//!
//! Every record has a numeric `id` assigned by the store on persist and an
//! externally visible `uuid`.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Lifecycle state of an automation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Running,
    Stopped,
    Alert,
    Error,
    Destroying,
    Destroyed,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Running => write!(f, "running"),
            ControllerState::Stopped => write!(f, "stopped"),
            ControllerState::Alert => write!(f, "alert"),
            ControllerState::Error => write!(f, "error"),
            ControllerState::Destroying => write!(f, "destroying"),
            ControllerState::Destroyed => write!(f, "destroyed"),
        }
    }
}

impl std::str::FromStr for ControllerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(ControllerState::Running),
            "stopped" => Ok(ControllerState::Stopped),
            "alert" => Ok(ControllerState::Alert),
            "error" => Ok(ControllerState::Error),
            "destroying" => Ok(ControllerState::Destroying),
            "destroyed" => Ok(ControllerState::Destroyed),
            other => Err(format!("unknown controller state: {}", other)),
        }
    }
}

/// Lifecycle events accepted by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerEvent {
    StartRequested,
    StopRequested,
    DestroyRequested,
    OperationSucceeded,
    OperationFailed,
}

impl std::fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerEvent::StartRequested => write!(f, "start_requested"),
            ControllerEvent::StopRequested => write!(f, "stop_requested"),
            ControllerEvent::DestroyRequested => write!(f, "destroy_requested"),
            ControllerEvent::OperationSucceeded => write!(f, "operation_succeeded"),
            ControllerEvent::OperationFailed => write!(f, "operation_failed"),
        }
    }
}

/// An automation controller: a cluster of member VMs plus the network rules
/// that expose it, managed as one lifecycle unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub account_id: u64,
    pub domain_id: u64,
    /// Zone-less controllers show up in every zone listing
    pub zone_id: Option<u64>,
    pub network_id: Option<u64>,
    pub state: ControllerState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when a teardown did not complete and the record awaits the GC sweep
    #[serde(default)]
    pub gc_requested_at: Option<DateTime<Utc>>,
}

impl Controller {
    pub fn new(name: impl Into<String>, account_id: u64, domain_id: u64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            account_id,
            domain_id,
            zone_id: None,
            network_id: None,
            state: ControllerState::Running,
            created_at: now,
            updated_at: now,
            gc_requested_at: None,
        }
    }

    pub fn with_zone(mut self, zone_id: u64) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    pub fn with_network(mut self, network_id: u64) -> Self {
        self.network_id = Some(network_id);
        self
    }

    pub fn with_state(mut self, state: ControllerState) -> Self {
        self.state = state;
        self
    }

    /// Waiting for the GC sweep: a teardown left a marker, or a destroy was
    /// interrupted before it could record one. An `Error` controller that
    /// never entered a destroy is not collected.
    pub fn is_gc_pending(&self) -> bool {
        self.gc_requested_at.is_some() || self.state == ControllerState::Destroying
    }
}

/// Role a member VM plays inside a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Control,
    Worker,
}

/// Controller-to-VM membership row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerMembership {
    pub id: u64,
    pub uuid: Uuid,
    pub controller_id: u64,
    pub vm_id: u64,
    pub role: MemberRole,
}

impl ControllerMembership {
    pub fn new(controller_id: u64, vm_id: u64, role: MemberRole) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            controller_id,
            vm_id,
            role,
        }
    }
}

/// A package deployed onto a controller by a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedResource {
    pub id: u64,
    pub uuid: Uuid,
    pub controller_id: u64,
    pub name: String,
}

impl DeployedResource {
    pub fn new(controller_id: u64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            controller_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub domain_id: u64,
}

impl Account {
    pub fn new(name: impl Into<String>, domain_id: u64) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            domain_id,
        }
    }
}

/// How a guest network is shared between tenants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestType {
    Isolated,
    Shared,
    L2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub zone_id: u64,
    pub account_id: u64,
    pub domain_id: u64,
    pub guest_type: GuestType,
    pub cidr: Option<Ipv4Net>,
}

impl Network {
    pub fn new(name: impl Into<String>, zone_id: u64, account_id: u64, domain_id: u64) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            zone_id,
            account_id,
            domain_id,
            guest_type: GuestType::Isolated,
            cidr: None,
        }
    }

    pub fn with_guest_type(mut self, guest_type: GuestType) -> Self {
        self.guest_type = guest_type;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    Stopped,
    Destroyed,
    Expunging,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Running => write!(f, "running"),
            VmState::Stopped => write!(f, "stopped"),
            VmState::Destroyed => write!(f, "destroyed"),
            VmState::Expunging => write!(f, "expunging"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmEvent {
    Stop,
    Destroy,
    Expunge,
}

impl std::fmt::Display for VmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmEvent::Stop => write!(f, "stop"),
            VmEvent::Destroy => write!(f, "destroy"),
            VmEvent::Expunge => write!(f, "expunge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: u64,
    pub uuid: Uuid,
    pub instance_name: String,
    pub display_name: String,
    pub state: VmState,
    pub removed: Option<DateTime<Utc>>,
}

impl VirtualMachine {
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            instance_name: format!("i-{}", display_name),
            display_name,
            state: VmState::Running,
            removed: None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIp {
    pub id: u64,
    pub uuid: Uuid,
    pub address: Ipv4Addr,
    pub network_id: u64,
    pub source_nat: bool,
}

impl PublicIp {
    pub fn source_nat(address: Ipv4Addr, network_id: u64) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            address,
            network_id,
            source_nat: true,
        }
    }
}

/// Zone-level IPv4 guest subnet pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: u64,
    pub uuid: Uuid,
    pub zone_id: u64,
    pub cidr: Ipv4Net,
    pub domain_id: Option<u64>,
    pub account_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Subnet {
    pub fn new(zone_id: u64, cidr: Ipv4Net) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            zone_id,
            cidr,
            domain_id: None,
            account_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_dedicated(&self) -> bool {
        self.domain_id.is_some() || self.account_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    Free,
    Allocated,
}

impl std::fmt::Display for AllocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationState::Free => write!(f, "free"),
            AllocationState::Allocated => write!(f, "allocated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationEvent {
    Assign,
    Release,
}

impl std::fmt::Display for AllocationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationEvent::Assign => write!(f, "assign"),
            AllocationEvent::Release => write!(f, "release"),
        }
    }
}

/// A CIDR carved from a [`Subnet`] (or specified manually, without parent)
/// and optionally bound to a guest network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetAllocation {
    pub id: u64,
    pub uuid: Uuid,
    pub parent_id: Option<u64>,
    pub cidr: Ipv4Net,
    pub network_id: Option<u64>,
    pub state: AllocationState,
    pub allocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubnetAllocation {
    pub fn free(parent_id: Option<u64>, cidr: Ipv4Net) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            parent_id,
            cidr,
            network_id: None,
            state: AllocationState::Free,
            allocated_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.network_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficDirection {
    Ingress,
    Egress,
}

impl std::fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficDirection::Ingress => write!(f, "ingress"),
            TrafficDirection::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            "all" => Ok(Protocol::All),
            other => Err(format!("unsupported protocol: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Staged,
    Add,
    Active,
    Revoke,
}

impl std::fmt::Display for RuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleState::Staged => write!(f, "staged"),
            RuleState::Add => write!(f, "add"),
            RuleState::Active => write!(f, "active"),
            RuleState::Revoke => write!(f, "revoke"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: u64,
    pub uuid: Uuid,
    pub network_id: u64,
    pub account_id: u64,
    pub domain_id: u64,
    /// Ingress rules hang off the network's public IP
    pub public_ip_id: Option<u64>,
    pub protocol: Protocol,
    pub start_port: Option<u16>,
    pub end_port: Option<u16>,
    pub icmp_type: Option<i32>,
    pub icmp_code: Option<i32>,
    pub traffic: TrafficDirection,
    pub source_cidrs: Vec<Ipv4Net>,
    pub destination_cidrs: Vec<Ipv4Net>,
    pub kind: RuleKind,
    pub display: bool,
    pub state: RuleState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortForwardingRule {
    pub id: u64,
    pub uuid: Uuid,
    pub public_ip_id: u64,
    pub network_id: u64,
    pub vm_id: u64,
    pub protocol: Protocol,
    pub public_port: u16,
    pub private_port: u16,
    pub state: RuleState,
}

impl PortForwardingRule {
    pub fn new(public_ip_id: u64, network_id: u64, vm_id: u64, public_port: u16, private_port: u16) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            public_ip_id,
            network_id,
            vm_id,
            protocol: Protocol::Tcp,
            public_port,
            private_port,
            state: RuleState::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_pending_needs_marker_or_interrupted_destroy() {
        let errored = Controller::new("errored", 10, 100).with_state(ControllerState::Error);
        assert!(!errored.is_gc_pending());

        let mut marked = errored.clone();
        marked.gc_requested_at = Some(Utc::now());
        assert!(marked.is_gc_pending());

        let destroying = Controller::new("half", 10, 100).with_state(ControllerState::Destroying);
        assert!(destroying.is_gc_pending());
        assert!(!Controller::new("ok", 10, 100).is_gc_pending());
    }
}
