//! Zone IPv4 guest subnet pools and their per-network allocations
//!
//! Root [`Subnet`]s are administrator-defined pools scoped to a zone.
//! [`SubnetAllocation`]s are the blocks handed to guest networks: either
//! carved from a pool (they have a parent) or specified manually for a
//! network (no parent).
//!
//! Every check-then-write below runs inside one store transaction, so two
//! concurrent creates in the same zone cannot both pass the overlap check.

use crate::cidr::{is_within, overlaps};
use crate::error::{NetworkError, Result};
use chrono::Utc;
use cirrus_cloud::{
    Account, AllocationEvent, AllocationState, Network, Store, Subnet, SubnetAllocation,
    Transaction,
};
use ipnet::Ipv4Net;
use tracing::{debug, info};

/// Search criteria for root subnets; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SubnetFilter {
    pub id: Option<u64>,
    pub zone_id: Option<u64>,
    pub cidr: Option<Ipv4Net>,
    pub domain_id: Option<u64>,
    pub account_id: Option<u64>,
}

impl SubnetFilter {
    pub fn matches(&self, subnet: &Subnet) -> bool {
        self.id.is_none_or(|id| subnet.id == id)
            && self.zone_id.is_none_or(|zone| subnet.zone_id == zone)
            && self.cidr.is_none_or(|cidr| subnet.cidr == cidr)
            && self.domain_id.is_none_or(|d| subnet.domain_id == Some(d))
            && self.account_id.is_none_or(|a| subnet.account_id == Some(a))
    }
}

/// Search criteria for allocations; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AllocationFilter {
    pub id: Option<u64>,
    pub zone_id: Option<u64>,
    pub parent_id: Option<u64>,
}

/// Who a pool is dedicated to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dedication {
    pub domain_id: Option<u64>,
    pub account_id: Option<u64>,
}

/// How a child allocation should be sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationRequest {
    /// An explicit block inside the parent
    Cidr(Ipv4Net),
    /// Any free block of this prefix length
    PrefixLength(u8),
}

#[derive(Debug, Clone)]
pub struct SubnetManager {
    store: Store,
}

impl SubnetManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a zone pool. Fails with `Overlap` if it intersects any pool
    /// already defined in the zone.
    pub async fn create_subnet(&self, zone_id: u64, cidr: Ipv4Net) -> Result<Subnet> {
        let subnet = self
            .store
            .transaction(|tx| {
                check_zone_overlap(tx, zone_id, &cidr, None)?;
                Ok::<_, NetworkError>(tx.persist(Subnet::new(zone_id, cidr)))
            })
            .await?;

        info!(subnet = %subnet.cidr, zone_id, id = subnet.id, "Created guest subnet");
        Ok(subnet)
    }

    /// Change the CIDR of a pool. Every block already carved from it must
    /// fit inside the new CIDR; otherwise the pool is left unchanged.
    pub async fn update_subnet(&self, id: u64, cidr: Ipv4Net) -> Result<Subnet> {
        self.store
            .transaction(|tx| {
                let mut subnet = tx.get::<Subnet>(id)?.clone();

                for child in tx.list(|a: &SubnetAllocation| a.parent_id == Some(id)) {
                    if !is_within(&child.cidr, &cidr) {
                        return Err(NetworkError::NotContained {
                            child: child.cidr,
                            parent: cidr,
                        });
                    }
                }
                check_zone_overlap(tx, subnet.zone_id, &cidr, Some(id))?;

                debug!(id, from = %subnet.cidr, to = %cidr, "Updating guest subnet");
                subnet.cidr = cidr;
                tx.update(&subnet);
                Ok(subnet)
            })
            .await
    }

    /// Delete a pool together with its unbound allocations
    pub async fn delete_subnet(&self, id: u64) -> Result<bool> {
        self.store
            .transaction(|tx| {
                tx.get::<Subnet>(id)?;

                let used = tx
                    .list(|a: &SubnetAllocation| a.parent_id == Some(id) && a.is_bound())
                    .len();
                if used > 0 {
                    return Err(NetworkError::InUse(format!(
                        "The subnet is being used by {} guest networks.",
                        used
                    )));
                }

                let children = tx.remove_where(|a: &SubnetAllocation| a.parent_id == Some(id));
                debug!(id, children, "Deleting guest subnet");
                Ok(tx.remove::<Subnet>(id))
            })
            .await
    }

    pub async fn list_subnets(&self, filter: &SubnetFilter) -> Vec<Subnet> {
        self.store.list(|s: &Subnet| filter.matches(s)).await
    }

    /// Dedicate a pool to a domain or an account
    ///
    /// When an account is given its domain is resolved and recorded too.
    /// Fails with `InUse` if blocks of the pool are bound to networks owned
    /// by another domain or account.
    pub async fn dedicate_subnet(&self, id: u64, dedication: Dedication) -> Result<Subnet> {
        if dedication.domain_id.is_none() && dedication.account_id.is_none() {
            return Err(NetworkError::InvalidParameter(
                "either a domain or an account is required to dedicate a subnet".to_string(),
            ));
        }

        self.store
            .transaction(|tx| {
                let mut subnet = tx.get::<Subnet>(id)?.clone();

                let mut domain_id = dedication.domain_id;
                if let Some(account_id) = dedication.account_id {
                    let account = tx.get::<Account>(account_id)?;
                    domain_id = Some(account.domain_id);
                }

                let owners: Vec<(u64, u64)> = tx
                    .list(|a: &SubnetAllocation| a.parent_id == Some(id))
                    .into_iter()
                    .filter_map(|a| a.network_id)
                    .filter_map(|network_id| tx.find::<Network>(network_id))
                    .map(|n| (n.domain_id, n.account_id))
                    .collect();

                if let Some(domain_id) = domain_id {
                    let others = owners.iter().filter(|(d, _)| *d != domain_id).count();
                    if others > 0 {
                        return Err(NetworkError::InUse(format!(
                            "The subnet is being used by {} guest networks of other domains.",
                            others
                        )));
                    }
                }
                if let Some(account_id) = dedication.account_id {
                    let others = owners.iter().filter(|(_, a)| *a != account_id).count();
                    if others > 0 {
                        return Err(NetworkError::InUse(format!(
                            "The subnet is being used by {} guest networks of other accounts.",
                            others
                        )));
                    }
                }

                subnet.domain_id = domain_id;
                subnet.account_id = dedication.account_id;
                tx.update(&subnet);
                info!(id, ?domain_id, account_id = ?dedication.account_id, "Dedicated guest subnet");
                Ok(subnet)
            })
            .await
    }

    /// Drop the dedication of a pool
    pub async fn release_dedication(&self, id: u64) -> Result<Subnet> {
        self.store
            .transaction(|tx| {
                let mut subnet = tx.get::<Subnet>(id)?.clone();
                subnet.domain_id = None;
                subnet.account_id = None;
                tx.update(&subnet);
                Ok(subnet)
            })
            .await
    }

    /// Carve a new free block out of pool `parent_id`
    pub async fn create_allocation(
        &self,
        parent_id: u64,
        request: AllocationRequest,
    ) -> Result<SubnetAllocation> {
        let parent = self.store.get::<Subnet>(parent_id).await?;
        match request {
            AllocationRequest::Cidr(cidr) => self.create_allocation_with_cidr(&parent, cidr).await,
            AllocationRequest::PrefixLength(prefix_len) => {
                self.carve_from_parent(&parent, prefix_len).await
            }
        }
    }

    async fn create_allocation_with_cidr(
        &self,
        parent: &Subnet,
        cidr: Ipv4Net,
    ) -> Result<SubnetAllocation> {
        let parent_id = parent.id;
        let allocation = self
            .store
            .transaction(|tx| {
                let parent = tx.get::<Subnet>(parent_id)?;
                if !is_within(&cidr, &parent.cidr) {
                    return Err(NetworkError::NotContained {
                        child: cidr,
                        parent: parent.cidr,
                    });
                }
                if let Some(existing) = tx
                    .list(|a: &SubnetAllocation| {
                        a.cidr == cidr || (a.parent_id == Some(parent_id) && overlaps(&a.cidr, &cidr))
                    })
                    .first()
                {
                    return Err(NetworkError::Overlap {
                        existing: existing.cidr,
                        requested: cidr,
                    });
                }
                Ok(tx.persist(SubnetAllocation::free(Some(parent_id), cidr)))
            })
            .await?;

        debug!(parent_id, cidr = %allocation.cidr, "Created subnet allocation");
        Ok(allocation)
    }

    /// Carve a block of `prefix_len` from `parent`
    ///
    /// Automatic carving is not available yet; callers must create blocks
    /// with an explicit CIDR.
    pub async fn carve_from_parent(
        &self,
        parent: &Subnet,
        prefix_len: u8,
    ) -> Result<SubnetAllocation> {
        Err(NetworkError::Unsupported(format!(
            "auto-generation of a /{} subnet in {} is not supported yet",
            prefix_len, parent.cidr
        )))
    }

    /// Delete an unbound allocation. A missing allocation counts as deleted.
    pub async fn delete_allocation(&self, id: u64) -> Result<bool> {
        self.store
            .transaction(|tx| {
                let Some(allocation) = tx.find::<SubnetAllocation>(id) else {
                    return Ok(true);
                };
                if allocation.state != AllocationState::Free || allocation.is_bound() {
                    return Err(NetworkError::InUse(
                        "Cannot delete the subnet which is in use".to_string(),
                    ));
                }
                Ok(tx.remove::<SubnetAllocation>(id))
            })
            .await
    }

    pub async fn list_allocations(&self, filter: &AllocationFilter) -> Vec<SubnetAllocation> {
        let zone_parents: Option<Vec<u64>> = match filter.zone_id {
            Some(zone_id) => Some(
                self.store
                    .list(|s: &Subnet| s.zone_id == zone_id)
                    .await
                    .into_iter()
                    .map(|s| s.id)
                    .collect(),
            ),
            None => None,
        };

        self.store
            .list(|a: &SubnetAllocation| {
                filter.id.is_none_or(|id| a.id == id)
                    && filter.parent_id.is_none_or(|p| a.parent_id == Some(p))
                    && zone_parents
                        .as_ref()
                        .is_none_or(|ids| a.parent_id.is_some_and(|p| ids.contains(&p)))
            })
            .await
    }

    /// Give `network` the block `cidr`
    ///
    /// An existing record for the block is bound after checking it is free
    /// and that its pool's dedication admits the network owner. Without a
    /// record, a parent-less one is created for the manually chosen block and
    /// bound in the same transaction.
    pub async fn assign_cidr_to_network(
        &self,
        network: &Network,
        cidr: Ipv4Net,
    ) -> Result<SubnetAllocation> {
        let allocation = self
            .store
            .transaction(|tx| {
                let existing = tx
                    .list(|a: &SubnetAllocation| a.cidr == cidr)
                    .first()
                    .map(|a| (*a).clone());

                let allocation = match existing {
                    Some(existing) => {
                        if existing.is_bound() {
                            return Err(NetworkError::InUse("The subnet is in use".to_string()));
                        }
                        if let Some(parent) = existing
                            .parent_id
                            .and_then(|parent_id| tx.find::<Subnet>(parent_id))
                        {
                            if !dedication_admits(parent, network.domain_id, network.account_id) {
                                return Err(NetworkError::PermissionDenied(
                                    "The owner of the network has no permission to access the subnet"
                                        .to_string(),
                                ));
                            }
                        }
                        existing
                    }
                    None => tx.persist(SubnetAllocation::free(None, cidr)),
                };

                bind(tx, allocation.id, network.id)
            })
            .await?;

        info!(
            cidr = %allocation.cidr,
            network_id = network.id,
            parented = allocation.parent_id.is_some(),
            "Assigned subnet to network"
        );
        Ok(allocation)
    }

    /// Bind the existing record for `cidr` to `network_id`, if there is one
    pub async fn assign_existing(
        &self,
        cidr: Ipv4Net,
        network_id: u64,
    ) -> Result<Option<SubnetAllocation>> {
        self.store
            .transaction(|tx| {
                let Some(existing) = tx
                    .list(|a: &SubnetAllocation| a.cidr == cidr)
                    .first()
                    .map(|a| (*a).clone())
                else {
                    return Ok(None);
                };
                match existing.network_id {
                    Some(bound) if bound == network_id => Ok(Some(existing)),
                    Some(_) => Err(NetworkError::InUse("The subnet is in use".to_string())),
                    None => bind(tx, existing.id, network_id).map(Some),
                }
            })
            .await
    }

    /// Give `network` any block of `prefix_len` it may use
    ///
    /// A free block from a pool in the network's zone is reused when one
    /// exists; otherwise a new one is carved.
    pub async fn allocate_by_size(
        &self,
        network: &Network,
        prefix_len: u8,
    ) -> Result<SubnetAllocation> {
        if let Some(candidate) = self.find_candidate_in_pool(network, prefix_len).await? {
            return self.assign_cidr_to_network(network, candidate.cidr).await;
        }

        let pool = self
            .store
            .list(|s: &Subnet| {
                s.zone_id == network.zone_id
                    && dedication_admits(s, network.domain_id, network.account_id)
                    && s.cidr.prefix_len() <= prefix_len
            })
            .await
            .into_iter()
            .next()
            .ok_or_else(|| {
                NetworkError::InvalidParameter(format!(
                    "no guest subnet in zone {} can hold a /{} for network {}",
                    network.zone_id, prefix_len, network.name
                ))
            })?;
        self.carve_from_parent(&pool, prefix_len).await
    }

    /// A free, already carved block of `prefix_len` the network owner may use.
    /// Pools dedicated to the owner are preferred over shared ones.
    pub async fn find_candidate_in_pool(
        &self,
        network: &Network,
        prefix_len: u8,
    ) -> Result<Option<SubnetAllocation>> {
        let mut pools: Vec<Subnet> = self
            .store
            .list(|s: &Subnet| {
                s.zone_id == network.zone_id
                    && dedication_admits(s, network.domain_id, network.account_id)
            })
            .await;
        pools.sort_by_key(|s| !s.is_dedicated());

        for pool in pools {
            let candidate = self
                .store
                .list(|a: &SubnetAllocation| {
                    a.parent_id == Some(pool.id)
                        && a.state == AllocationState::Free
                        && !a.is_bound()
                        && a.cidr.prefix_len() == prefix_len
                })
                .await
                .into_iter()
                .next();
            if candidate.is_some() {
                return Ok(candidate);
            }
        }
        Ok(None)
    }

    /// Return the block of `network_id` to its pool
    ///
    /// Parent-less blocks are deleted; pool blocks go back to `Free` with
    /// network and allocation time cleared. Returns `false` when the network
    /// had no block.
    pub async fn release_for_network(&self, network_id: u64) -> Result<bool> {
        self.store
            .transaction(|tx| {
                let Some(allocation) = tx
                    .list(|a: &SubnetAllocation| a.network_id == Some(network_id))
                    .first()
                    .map(|a| (*a).clone())
                else {
                    return Ok(false);
                };

                if allocation.parent_id.is_none() {
                    tx.remove::<SubnetAllocation>(allocation.id);
                    debug!(cidr = %allocation.cidr, network_id, "Removed manual subnet allocation");
                    return Ok(true);
                }

                let mut released = if allocation.state == AllocationState::Allocated {
                    tx.transition::<SubnetAllocation>(
                        allocation.id,
                        AllocationState::Allocated,
                        AllocationEvent::Release,
                    )?
                } else {
                    allocation
                };
                released.network_id = None;
                released.allocated_at = None;
                tx.update(&released);
                debug!(cidr = %released.cidr, network_id, "Released subnet allocation");
                Ok::<_, NetworkError>(true)
            })
            .await
    }
}

fn check_zone_overlap(
    tx: &Transaction,
    zone_id: u64,
    cidr: &Ipv4Net,
    except: Option<u64>,
) -> Result<()> {
    let existing = tx.list(|s: &Subnet| s.zone_id == zone_id && Some(s.id) != except);
    for subnet in existing {
        if overlaps(&subnet.cidr, cidr) {
            return Err(NetworkError::Overlap {
                existing: subnet.cidr,
                requested: *cidr,
            });
        }
    }
    Ok(())
}

fn dedication_admits(pool: &Subnet, domain_id: u64, account_id: u64) -> bool {
    pool.domain_id.is_none_or(|d| d == domain_id)
        && pool.account_id.is_none_or(|a| a == account_id)
}

fn bind(tx: &mut Transaction, allocation_id: u64, network_id: u64) -> Result<SubnetAllocation> {
    let mut allocation = tx.transition::<SubnetAllocation>(
        allocation_id,
        AllocationState::Free,
        AllocationEvent::Assign,
    )?;
    allocation.network_id = Some(network_id);
    allocation.allocated_at = Some(Utc::now());
    tx.update(&allocation);
    Ok(allocation)
}
