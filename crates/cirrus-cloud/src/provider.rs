//! Compute and network subsystem seams
//!
//! The control plane never talks to hypervisors or network elements
//! directly. It goes through these traits, and every call carries the
//! [`RequestContext`] of the operator that started the work.

use crate::error::Result;
use crate::model::{Network, PublicIp, VirtualMachine};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identity of the caller on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: u64,
    pub account_id: u64,
    /// Root admins may act on resources of any account
    pub admin: bool,
}

impl RequestContext {
    pub fn new(user_id: u64, account_id: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id,
            account_id,
            admin: false,
        }
    }

    /// Context used by background jobs such as the GC sweep
    pub fn system() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: 1,
            account_id: 1,
            admin: true,
        }
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Whether the caller may act on resources owned by `account_id`
    pub fn can_access(&self, account_id: u64) -> bool {
        self.admin || self.account_id == account_id
    }
}

/// Compute subsystem
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Returns the backend name (e.g., "local")
    fn name(&self) -> &str;

    /// Look up a VM, including destroyed ones that are not yet removed
    async fn find_vm(&self, vm_id: u64) -> Result<Option<VirtualMachine>>;

    /// Destroy a VM, optionally requesting expunge in the same call
    ///
    /// Fails with `ResourceUnavailable` or `ConcurrentOperation` on transient
    /// infrastructure problems.
    async fn destroy_vm(
        &self,
        ctx: &RequestContext,
        vm_id: u64,
        expunge: bool,
    ) -> Result<VirtualMachine>;

    /// Expunge a destroyed VM. `Ok(false)` means the expunge was not accepted.
    async fn expunge_vm(&self, ctx: &RequestContext, vm: &VirtualMachine) -> Result<bool>;
}

/// Network subsystem
#[async_trait]
pub trait NetworkService: Send + Sync {
    fn name(&self) -> &str;

    async fn find_network(&self, network_id: u64) -> Result<Option<Network>>;

    /// The public IP used for source NAT on `network`, if any
    async fn source_nat_ip(&self, network: &Network) -> Result<Option<PublicIp>>;

    /// Remove ingress firewall rules bound to `ip`; absent rules are a no-op
    async fn remove_ingress_rules(&self, ctx: &RequestContext, ip: &PublicIp) -> Result<()>;

    /// Remove egress firewall rules of `network`; absent rules are a no-op
    async fn remove_egress_rules(&self, ctx: &RequestContext, network: &Network) -> Result<()>;

    /// Remove port forwarding rules on `ip` that target any of `vm_ids`
    async fn remove_port_forwarding_rules(
        &self,
        ctx: &RequestContext,
        ip: &PublicIp,
        network: &Network,
        owner_account_id: u64,
        vm_ids: &[u64],
    ) -> Result<()>;
}

/// Bounded fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Delay between attempts
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// No waiting at all; handy for tests and dry runs
    pub fn immediate() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_checks() {
        let ctx = RequestContext::new(7, 20);
        assert!(ctx.can_access(20));
        assert!(!ctx.can_access(21));
        assert!(ctx.clone().with_admin(true).can_access(21));
    }

    #[test]
    fn test_default_retry_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::from_secs(10));
    }
}
