//! Routing firewall rules for guest networks
//!
//! Rules are written in `Staged`, checked for conflicts and moved to `Add`
//! in one transaction. `apply` pushes every pending change of the rule's
//! network: `Add` rules become `Active` and `Revoke` rules are dropped.

use crate::cidr::{overlaps, parse_cidr};
use crate::error::{NetworkError, Result};
use chrono::Utc;
use cirrus_cloud::{
    FirewallRule, Network, Protocol, RequestContext, RuleKind, RuleState, Store,
    TrafficDirection,
};
use ipnet::Ipv4Net;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Parameters of a new routing firewall rule
#[derive(Debug, Clone)]
pub struct CreateFirewallRule {
    pub network_id: u64,
    pub protocol: Protocol,
    pub start_port: Option<u16>,
    pub end_port: Option<u16>,
    pub icmp_type: Option<i32>,
    pub icmp_code: Option<i32>,
    pub traffic: TrafficDirection,
    pub source_cidrs: Vec<String>,
    pub destination_cidrs: Vec<String>,
    pub display: bool,
}

impl CreateFirewallRule {
    pub fn new(network_id: u64, protocol: Protocol, traffic: TrafficDirection) -> Self {
        Self {
            network_id,
            protocol,
            start_port: None,
            end_port: None,
            icmp_type: None,
            icmp_code: None,
            traffic,
            source_cidrs: Vec::new(),
            destination_cidrs: Vec::new(),
            display: true,
        }
    }

    pub fn with_ports(mut self, start: u16, end: u16) -> Self {
        self.start_port = Some(start);
        self.end_port = Some(end);
        self
    }

    pub fn with_source_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.source_cidrs.push(cidr.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FirewallManager {
    store: Store,
}

impl FirewallManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: CreateFirewallRule,
    ) -> Result<FirewallRule> {
        let source_cidrs = parse_cidrs(&request.source_cidrs, "source")?;
        let destination_cidrs = parse_cidrs(&request.destination_cidrs, "destination")?;
        validate_ports(&request)?;

        let network = self.store.get::<Network>(request.network_id).await?;
        if !ctx.can_access(network.account_id) {
            return Err(NetworkError::PermissionDenied(format!(
                "account {} cannot manage firewall rules of network {}",
                ctx.account_id, network.name
            )));
        }

        let rule = FirewallRule {
            id: 0,
            uuid: Uuid::new_v4(),
            network_id: network.id,
            account_id: network.account_id,
            domain_id: network.domain_id,
            public_ip_id: None,
            protocol: request.protocol,
            start_port: request.start_port,
            end_port: request.end_port,
            icmp_type: request.icmp_type,
            icmp_code: request.icmp_code,
            traffic: request.traffic,
            source_cidrs,
            destination_cidrs,
            kind: RuleKind::User,
            display: request.display,
            state: RuleState::Staged,
            created_at: Utc::now(),
        };

        let rule = self
            .store
            .transaction(|tx| {
                let mut rule = tx.persist(rule);

                if rule.kind == RuleKind::User {
                    let conflict = tx
                        .list(|r: &FirewallRule| {
                            r.id != rule.id
                                && r.network_id == rule.network_id
                                && r.state != RuleState::Revoke
                        })
                        .into_iter()
                        .find(|existing| conflicts(existing, &rule))
                        .map(|existing| existing.uuid);
                    if let Some(existing) = conflict {
                        return Err(NetworkError::RuleConflict(format!(
                            "the new rule conflicts with rule {}",
                            existing
                        )));
                    }
                }

                rule.state = RuleState::Add;
                tx.update(&rule);
                Ok(rule)
            })
            .await?;

        info!(
            rule = %rule.uuid,
            network_id = rule.network_id,
            protocol = %rule.protocol,
            traffic = %rule.traffic,
            "Created routing firewall rule"
        );
        Ok(rule)
    }

    pub async fn list(&self, network_id: u64) -> Vec<FirewallRule> {
        self.store
            .list(|r: &FirewallRule| r.network_id == network_id)
            .await
    }

    pub async fn update_display(
        &self,
        ctx: &RequestContext,
        id: u64,
        display: bool,
    ) -> Result<FirewallRule> {
        self.store
            .transaction(|tx| {
                let mut rule = tx.get::<FirewallRule>(id)?.clone();
                if !ctx.can_access(rule.account_id) {
                    return Err(NetworkError::PermissionDenied(format!(
                        "account {} cannot update rule {}",
                        ctx.account_id, rule.uuid
                    )));
                }
                rule.display = display;
                tx.update(&rule);
                Ok(rule)
            })
            .await
    }

    /// Mark a rule for removal; it disappears on the next `apply`
    pub async fn revoke(&self, ctx: &RequestContext, id: u64) -> Result<FirewallRule> {
        self.store
            .transaction(|tx| {
                let mut rule = tx.get::<FirewallRule>(id)?.clone();
                if !ctx.can_access(rule.account_id) {
                    return Err(NetworkError::PermissionDenied(format!(
                        "account {} cannot revoke rule {}",
                        ctx.account_id, rule.uuid
                    )));
                }
                rule.state = RuleState::Revoke;
                tx.update(&rule);
                debug!(rule = %rule.uuid, "Revoked routing firewall rule");
                Ok(rule)
            })
            .await
    }

    /// Apply the pending rules of the network that rule `id` belongs to.
    /// Returns `false` when the rule does not exist.
    pub async fn apply(&self, id: u64) -> Result<bool> {
        let Some(rule) = self.store.find::<FirewallRule>(id).await else {
            error!(id, "Unable to find routing firewall rule");
            return Ok(false);
        };
        debug!(rule = %rule.uuid, "Applying routing firewall rules");

        let network_id = rule.network_id;
        self.store
            .transaction(|tx| {
                let removed = tx.remove_where(|r: &FirewallRule| {
                    r.network_id == network_id && r.state == RuleState::Revoke
                });
                let pending: Vec<FirewallRule> = tx
                    .list(|r: &FirewallRule| r.network_id == network_id && r.state == RuleState::Add)
                    .into_iter()
                    .cloned()
                    .collect();
                for mut rule in pending {
                    rule.state = RuleState::Active;
                    tx.update(&rule);
                }
                debug!(network_id, removed, "Applied routing firewall rules");
                Ok(true)
            })
            .await
    }
}

fn parse_cidrs(cidrs: &[String], which: &str) -> Result<Vec<Ipv4Net>> {
    cidrs
        .iter()
        .map(|cidr| {
            parse_cidr(cidr).map_err(|_| {
                NetworkError::InvalidParameter(format!("Invalid {} IPv4 CIDR: {}", which, cidr))
            })
        })
        .collect()
}

fn validate_ports(request: &CreateFirewallRule) -> Result<()> {
    if request.start_port == Some(0) {
        return Err(NetworkError::InvalidParameter(
            "publicPort is an invalid value: 0".to_string(),
        ));
    }
    if request.end_port == Some(0) {
        return Err(NetworkError::InvalidParameter(
            "Public port range is an invalid value: 0".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (request.start_port, request.end_port) {
        if start > end {
            return Err(NetworkError::InvalidParameter(
                "Start port can't be bigger than end port".to_string(),
            ));
        }
    }

    let icmp = request.protocol == Protocol::Icmp;
    if !icmp && (request.icmp_type.is_some() || request.icmp_code.is_some()) {
        return Err(NetworkError::InvalidParameter(
            "Can specify icmpCode and icmpType for ICMP protocol only".to_string(),
        ));
    }
    if icmp && (request.start_port.is_some() || request.end_port.is_some()) {
        return Err(NetworkError::InvalidParameter(
            "Can't specify start/end port when protocol is ICMP".to_string(),
        ));
    }
    Ok(())
}

fn port_range(rule: &FirewallRule) -> (u16, u16) {
    match (rule.start_port, rule.end_port) {
        (Some(start), Some(end)) => (start, end),
        (Some(port), None) | (None, Some(port)) => (port, port),
        (None, None) => (1, u16::MAX),
    }
}

fn cidr_sets_overlap(a: &[Ipv4Net], b: &[Ipv4Net]) -> bool {
    // an empty list means any address
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.iter().any(|x| b.iter().any(|y| overlaps(x, y)))
}

fn conflicts(existing: &FirewallRule, new: &FirewallRule) -> bool {
    if existing.traffic != new.traffic {
        return false;
    }
    let protocols_clash = existing.protocol == new.protocol
        || existing.protocol == Protocol::All
        || new.protocol == Protocol::All;
    if !protocols_clash {
        return false;
    }
    if !cidr_sets_overlap(&existing.source_cidrs, &new.source_cidrs)
        || !cidr_sets_overlap(&existing.destination_cidrs, &new.destination_cidrs)
    {
        return false;
    }

    if new.protocol == Protocol::Icmp && existing.protocol == Protocol::Icmp {
        return existing.icmp_type == new.icmp_type && existing.icmp_code == new.icmp_code;
    }
    let (a_start, a_end) = port_range(existing);
    let (b_start, b_end) = port_range(new);
    a_start <= b_end && b_start <= a_end
}
