//! Network backend over the resource store

use crate::faults::Faults;
use async_trait::async_trait;
use cirrus_cloud::{
    CloudError, FirewallRule, Network, NetworkService, PortForwardingRule, PublicIp,
    RequestContext, Result, Store, TrafficDirection,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalNetwork {
    store: Store,
    faults: Faults,
}

impl LocalNetwork {
    pub fn new(store: Store) -> Self {
        Self::with_faults(store, Faults::new())
    }

    pub fn with_faults(store: Store, faults: Faults) -> Self {
        Self { store, faults }
    }
}

#[async_trait]
impl NetworkService for LocalNetwork {
    fn name(&self) -> &str {
        "local"
    }

    async fn find_network(&self, network_id: u64) -> Result<Option<Network>> {
        Ok(self.store.find::<Network>(network_id).await)
    }

    async fn source_nat_ip(&self, network: &Network) -> Result<Option<PublicIp>> {
        Ok(self
            .store
            .list(|ip: &PublicIp| ip.network_id == network.id && ip.source_nat)
            .await
            .into_iter()
            .next())
    }

    async fn remove_ingress_rules(&self, ctx: &RequestContext, ip: &PublicIp) -> Result<()> {
        let removed = self
            .store
            .transaction(|tx| {
                Ok::<_, CloudError>(tx.remove_where(|r: &FirewallRule| {
                    r.network_id == ip.network_id
                        && r.traffic == TrafficDirection::Ingress
                        && r.public_ip_id.is_none_or(|id| id == ip.id)
                }))
            })
            .await?;
        debug!(ip = %ip.address, removed, request = %ctx.request_id, "Removed ingress rules");
        Ok(())
    }

    async fn remove_egress_rules(&self, ctx: &RequestContext, network: &Network) -> Result<()> {
        let removed = self
            .store
            .transaction(|tx| {
                Ok::<_, CloudError>(tx.remove_where(|r: &FirewallRule| {
                    r.network_id == network.id && r.traffic == TrafficDirection::Egress
                }))
            })
            .await?;
        debug!(network = %network.name, removed, request = %ctx.request_id, "Removed egress rules");
        Ok(())
    }

    async fn remove_port_forwarding_rules(
        &self,
        ctx: &RequestContext,
        ip: &PublicIp,
        network: &Network,
        owner_account_id: u64,
        vm_ids: &[u64],
    ) -> Result<()> {
        self.faults.check_port_forwarding().await?;

        let removed = self
            .store
            .transaction(|tx| {
                Ok::<_, CloudError>(tx.remove_where(|r: &PortForwardingRule| {
                    r.public_ip_id == ip.id
                        && r.network_id == network.id
                        && vm_ids.contains(&r.vm_id)
                }))
            })
            .await?;
        debug!(
            ip = %ip.address,
            owner_account_id,
            removed,
            request = %ctx.request_id,
            "Removed port forwarding rules"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cirrus_cloud::{Protocol, RuleKind, RuleState};
    use std::net::Ipv4Addr;
    use uuid::Uuid;

    fn rule(network_id: u64, traffic: TrafficDirection, public_ip_id: Option<u64>) -> FirewallRule {
        FirewallRule {
            id: 0,
            uuid: Uuid::new_v4(),
            network_id,
            account_id: 10,
            domain_id: 100,
            public_ip_id,
            protocol: Protocol::Tcp,
            start_port: Some(22),
            end_port: Some(22),
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

    async fn seed(store: &Store) -> (Network, PublicIp) {
        let network = store
            .persist(Network::new("isolated", 1, 10, 100))
            .await
            .unwrap();
        let ip = store
            .persist(PublicIp::source_nat(Ipv4Addr::new(198, 51, 100, 1), network.id))
            .await
            .unwrap();
        (network, ip)
    }

    #[tokio::test]
    async fn test_source_nat_lookup() {
        let store = Store::in_memory();
        let (network, ip) = seed(&store).await;
        let bare = store
            .persist(Network::new("bare", 1, 10, 100))
            .await
            .unwrap();
        let backend = LocalNetwork::new(store);

        assert_eq!(backend.source_nat_ip(&network).await.unwrap(), Some(ip));
        assert_eq!(backend.source_nat_ip(&bare).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rule_removal_is_scoped() {
        let store = Store::in_memory();
        let (network, ip) = seed(&store).await;
        let other = store
            .persist(Network::new("other", 1, 10, 100))
            .await
            .unwrap();
        store
            .persist(rule(network.id, TrafficDirection::Ingress, Some(ip.id)))
            .await
            .unwrap();
        store
            .persist(rule(network.id, TrafficDirection::Egress, None))
            .await
            .unwrap();
        let survivor = store
            .persist(rule(other.id, TrafficDirection::Egress, None))
            .await
            .unwrap();
        store
            .persist(PortForwardingRule::new(ip.id, network.id, 7, 2222, 22))
            .await
            .unwrap();
        let kept_pf = store
            .persist(PortForwardingRule::new(ip.id, network.id, 8, 2223, 22))
            .await
            .unwrap();

        let backend = LocalNetwork::new(store.clone());
        let ctx = RequestContext::system();
        backend.remove_ingress_rules(&ctx, &ip).await.unwrap();
        backend.remove_egress_rules(&ctx, &network).await.unwrap();
        backend
            .remove_port_forwarding_rules(&ctx, &ip, &network, 10, &[7])
            .await
            .unwrap();
        // nothing left to remove is fine
        backend.remove_ingress_rules(&ctx, &ip).await.unwrap();

        let rules = store.list_all::<FirewallRule>().await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, survivor.id);
        let forwards = store.list_all::<PortForwardingRule>().await;
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].id, kept_pf.id);
    }

    #[tokio::test]
    async fn test_port_forwarding_fault() {
        let store = Store::in_memory();
        let (network, ip) = seed(&store).await;
        let faults = Faults::new();
        let backend = LocalNetwork::with_faults(store, faults.clone());

        faults.fail_port_forwarding(true).await;
        let result = backend
            .remove_port_forwarding_rules(&RequestContext::system(), &ip, &network, 10, &[1])
            .await;
        assert!(matches!(result, Err(CloudError::ResourceUnavailable(_))));
    }
}
