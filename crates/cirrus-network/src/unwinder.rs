//! Removal of the NAT and firewall rules a controller left on its network

use crate::error::{NetworkError, Result};
use cirrus_cloud::{CloudError, Network, NetworkService, PublicIp, RequestContext};
use std::sync::Arc;
use tracing::{debug, warn};

/// What an unwind pass did
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindReport {
    pub source_nat_ip: PublicIp,
    /// `false` when port forwarding cleanup was skipped because the network
    /// element was unavailable; the leftovers are harmless.
    pub port_forwarding_removed: bool,
}

pub struct NetworkRuleUnwinder {
    network: Arc<dyn NetworkService>,
}

impl NetworkRuleUnwinder {
    pub fn new(network: Arc<dyn NetworkService>) -> Self {
        Self { network }
    }

    /// Remove ingress, egress and port forwarding rules, in that order
    ///
    /// Fails with `NoSourceNatIp` before touching anything when the network
    /// has no source NAT address.
    pub async fn unwind(
        &self,
        ctx: &RequestContext,
        network: &Network,
        owner_account_id: u64,
        vm_ids: &[u64],
    ) -> Result<UnwindReport> {
        let ip = self
            .network
            .source_nat_ip(network)
            .await?
            .ok_or_else(|| NetworkError::NoSourceNatIp(network.name.clone()))?;
        debug!(network = %network.name, ip = %ip.address, "Unwinding network rules");

        self.network.remove_ingress_rules(ctx, &ip).await?;
        self.network.remove_egress_rules(ctx, network).await?;

        let port_forwarding_removed = match self
            .network
            .remove_port_forwarding_rules(ctx, &ip, network, owner_account_id, vm_ids)
            .await
        {
            Ok(()) => true,
            Err(CloudError::ResourceUnavailable(reason)) => {
                warn!(
                    network = %network.name,
                    %reason,
                    "Failed to remove port forwarding rules, leaving them behind"
                );
                false
            }
            Err(e) => return Err(e.into()),
        };

        Ok(UnwindReport {
            source_nat_ip: ip,
            port_forwarding_removed,
        })
    }
}
