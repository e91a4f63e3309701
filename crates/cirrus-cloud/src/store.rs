//! Resource store
//!
//! A keyed, table-per-record-type store with predicate search and
//! all-or-nothing transactions. The whole store sits behind one async mutex,
//! so a transaction is also the serialization point for compare-and-swap
//! state updates.

use crate::error::{CloudError, Result};
use crate::model::{
    Account, Controller, ControllerMembership, DeployedResource, FirewallRule, Network,
    PortForwardingRule, PublicIp, Subnet, SubnetAllocation, VirtualMachine,
};
use crate::state::{Snapshot, StateManager, Tables};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A record type stored in its own table
pub trait Record: Clone + Send + Sync + 'static {
    /// Human readable kind, used in errors and logs
    const KIND: &'static str;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    fn uuid(&self) -> Uuid;

    fn table(tables: &Tables) -> &BTreeMap<u64, Self>;

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<u64, Self>;
}

macro_rules! impl_record {
    ($ty:ty, $kind:literal, $field:ident) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> u64 {
                self.id
            }

            fn set_id(&mut self, id: u64) {
                self.id = id;
            }

            fn uuid(&self) -> Uuid {
                self.uuid
            }

            fn table(tables: &Tables) -> &BTreeMap<u64, Self> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut BTreeMap<u64, Self> {
                &mut tables.$field
            }
        }
    };
}

impl_record!(Controller, "controller", controllers);
impl_record!(ControllerMembership, "controller membership", memberships);
impl_record!(DeployedResource, "deployed resource", deployed_resources);
impl_record!(Account, "account", accounts);
impl_record!(Network, "network", networks);
impl_record!(VirtualMachine, "virtual machine", vms);
impl_record!(PublicIp, "public ip", public_ips);
impl_record!(Subnet, "subnet", subnets);
impl_record!(SubnetAllocation, "subnet allocation", allocations);
impl_record!(FirewallRule, "firewall rule", firewall_rules);
impl_record!(PortForwardingRule, "port forwarding rule", port_forwarding_rules);

/// Shared handle to the resource store
///
/// Cloning is cheap; all clones see the same tables.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<Mutex<Snapshot>>,
    persistence: Option<StateManager>,
}

impl Store {
    /// A store that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Snapshot::new())),
            persistence: None,
        }
    }

    /// A store backed by snapshot files; every committed write is saved
    pub async fn open(manager: StateManager) -> Result<Self> {
        let snapshot = manager.load().await?;
        Ok(Self {
            inner: Arc::new(Mutex::new(snapshot)),
            persistence: Some(manager),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Copy of the current tables
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.lock().await.clone()
    }

    pub async fn find<T: Record>(&self, id: u64) -> Option<T> {
        let guard = self.inner.lock().await;
        T::table(&guard.tables).get(&id).cloned()
    }

    /// Like [`Store::find`] but a missing row is an error
    pub async fn get<T: Record>(&self, id: u64) -> Result<T> {
        self.find(id)
            .await
            .ok_or_else(|| CloudError::not_found(T::KIND, id))
    }

    pub async fn find_by_uuid<T: Record>(&self, uuid: Uuid) -> Option<T> {
        let guard = self.inner.lock().await;
        T::table(&guard.tables)
            .values()
            .find(|r| r.uuid() == uuid)
            .cloned()
    }

    pub async fn list<T, F>(&self, predicate: F) -> Vec<T>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let guard = self.inner.lock().await;
        T::table(&guard.tables)
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub async fn list_all<T: Record>(&self) -> Vec<T> {
        self.list(|_: &T| true).await
    }

    pub async fn persist<T: Record>(&self, record: T) -> Result<T> {
        self.transaction(|tx| Ok(tx.persist(record))).await
    }

    /// Overwrite an existing row. Returns `false` when the row is gone.
    pub async fn update<T: Record>(&self, record: &T) -> Result<bool> {
        self.transaction(|tx| Ok(tx.update(record))).await
    }

    /// Delete a row. Returns `false` when there was nothing to delete.
    pub async fn remove<T: Record>(&self, id: u64) -> Result<bool> {
        self.transaction(|tx| Ok(tx.remove::<T>(id))).await
    }

    /// Run `f` against a private copy of the tables and commit it only if
    /// `f` succeeds. Nothing is written when `f` fails or changes nothing.
    pub async fn transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<R, E>,
        E: From<CloudError>,
    {
        let mut guard = self.inner.lock().await;
        let mut tx = Transaction {
            snapshot: guard.clone(),
            dirty: false,
        };

        let value = f(&mut tx)?;

        if tx.dirty {
            tx.snapshot.touch();
            if let Some(manager) = &self.persistence {
                manager.save(&tx.snapshot).await?;
            }
            *guard = tx.snapshot;
        }
        Ok(value)
    }
}

/// Working copy of the tables inside [`Store::transaction`]
#[derive(Debug)]
pub struct Transaction {
    snapshot: Snapshot,
    dirty: bool,
}

impl Transaction {
    pub fn find<T: Record>(&self, id: u64) -> Option<&T> {
        T::table(&self.snapshot.tables).get(&id)
    }

    pub fn get<T: Record>(&self, id: u64) -> Result<&T> {
        self.find(id)
            .ok_or_else(|| CloudError::not_found(T::KIND, id))
    }

    pub fn list<T, F>(&self, predicate: F) -> Vec<&T>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        T::table(&self.snapshot.tables)
            .values()
            .filter(|r| predicate(r))
            .collect()
    }

    pub fn persist<T: Record>(&mut self, mut record: T) -> T {
        let id = self.snapshot.allocate_id();
        record.set_id(id);
        T::table_mut(&mut self.snapshot.tables).insert(id, record.clone());
        self.dirty = true;
        record
    }

    pub fn update<T: Record>(&mut self, record: &T) -> bool {
        match T::table_mut(&mut self.snapshot.tables).get_mut(&record.id()) {
            Some(row) => {
                *row = record.clone();
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn remove<T: Record>(&mut self, id: u64) -> bool {
        let removed = T::table_mut(&mut self.snapshot.tables).remove(&id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Remove every row matching `predicate`, returning how many went away
    pub fn remove_where<T, F>(&mut self, predicate: F) -> usize
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let table = T::table_mut(&mut self.snapshot.tables);
        let before = table.len();
        table.retain(|_, r| !predicate(r));
        let removed = before - table.len();
        self.dirty |= removed > 0;
        removed
    }
}
