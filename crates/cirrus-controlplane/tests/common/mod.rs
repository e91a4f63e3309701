#![allow(dead_code)]

use chrono::Utc;
use cirrus_cloud::{
    Controller, ControllerMembership, FirewallRule, GuestType, MemberRole, Network,
    PortForwardingRule, Protocol, PublicIp, RetryPolicy, RuleKind, RuleState, Store,
    TrafficDirection, VirtualMachine,
};
use cirrus_cloud_local::{Faults, LocalCompute, LocalNetwork};
use cirrus_controlplane::ControllerOrchestrator;
use std::net::Ipv4Addr;
use std::sync::Arc;
use uuid::Uuid;

pub const OWNER: u64 = 10;
pub const DOMAIN: u64 = 100;

pub struct Fixture {
    pub store: Store,
    pub faults: Faults,
    pub controller: Controller,
    pub network: Network,
    pub vms: Vec<VirtualMachine>,
}

impl Fixture {
    /// A running controller with `vm_count` workers on an isolated network
    /// that has a source NAT address, two firewall rules and a port forward
    /// per VM.
    pub async fn new(vm_count: usize) -> Self {
        Self::build(Store::in_memory(), vm_count, GuestType::Isolated, true).await
    }

    pub async fn build(
        store: Store,
        vm_count: usize,
        guest_type: GuestType,
        source_nat: bool,
    ) -> Self {
        let network = store
            .persist(Network::new("ctrl-net", 1, OWNER, DOMAIN).with_guest_type(guest_type))
            .await
            .unwrap();
        let controller = store
            .persist(
                Controller::new("ctrl", OWNER, DOMAIN)
                    .with_zone(1)
                    .with_network(network.id),
            )
            .await
            .unwrap();

        let ip = if source_nat {
            Some(
                store
                    .persist(PublicIp::source_nat(
                        Ipv4Addr::new(198, 51, 100, 10),
                        network.id,
                    ))
                    .await
                    .unwrap(),
            )
        } else {
            None
        };

        let mut vms = Vec::new();
        for i in 0..vm_count {
            let vm = store
                .persist(VirtualMachine::new(format!("ctrl-node-{}", i)))
                .await
                .unwrap();
            let role = if i == 0 {
                MemberRole::Control
            } else {
                MemberRole::Worker
            };
            store
                .persist(ControllerMembership::new(controller.id, vm.id, role))
                .await
                .unwrap();
            if let Some(ip) = &ip {
                store
                    .persist(PortForwardingRule::new(
                        ip.id,
                        network.id,
                        vm.id,
                        2222 + i as u16,
                        22,
                    ))
                    .await
                    .unwrap();
            }
            vms.push(vm);
        }

        for traffic in [TrafficDirection::Ingress, TrafficDirection::Egress] {
            store
                .persist(firewall_rule(
                    network.id,
                    traffic,
                    ip.as_ref().map(|ip| ip.id),
                ))
                .await
                .unwrap();
        }

        Self {
            store,
            faults: Faults::new(),
            controller,
            network,
            vms,
        }
    }

    pub fn orchestrator(&self) -> ControllerOrchestrator {
        ControllerOrchestrator::new(
            self.store.clone(),
            Arc::new(LocalCompute::with_faults(self.store.clone(), self.faults.clone())),
            Arc::new(LocalNetwork::with_faults(self.store.clone(), self.faults.clone())),
        )
        .with_retry(RetryPolicy::immediate())
    }

    pub async fn controller(&self) -> Option<Controller> {
        self.store.find::<Controller>(self.controller.id).await
    }

    pub async fn memberships(&self) -> Vec<ControllerMembership> {
        let id = self.controller.id;
        self.store
            .list(|m: &ControllerMembership| m.controller_id == id)
            .await
    }

    pub async fn vm(&self, index: usize) -> VirtualMachine {
        self.store
            .get::<VirtualMachine>(self.vms[index].id)
            .await
            .unwrap()
    }

    pub async fn firewall_rules(&self) -> usize {
        self.store.list_all::<FirewallRule>().await.len()
    }

    pub async fn port_forwards(&self) -> usize {
        self.store.list_all::<PortForwardingRule>().await.len()
    }
}

fn firewall_rule(
    network_id: u64,
    traffic: TrafficDirection,
    public_ip_id: Option<u64>,
) -> FirewallRule {
    FirewallRule {
        id: 0,
        uuid: Uuid::new_v4(),
        network_id,
        account_id: OWNER,
        domain_id: DOMAIN,
        public_ip_id: match traffic {
            TrafficDirection::Ingress => public_ip_id,
            TrafficDirection::Egress => None,
        },
        protocol: Protocol::Tcp,
        start_port: Some(443),
        end_port: Some(443),
        icmp_type: None,
        icmp_code: None,
        traffic,
        source_cidrs: Vec::new(),
        destination_cidrs: Vec::new(),
        kind: RuleKind::User,
        display: true,
        state: RuleState::Active,
        created_at: Utc::now(),
    }
}
