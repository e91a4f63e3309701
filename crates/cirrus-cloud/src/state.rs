//! On-disk snapshots of the resource store
//!
//! A file-backed [`Store`](crate::store::Store) keeps its tables in
//! `<state dir>/state.json`, rotating the previous file to
//! `state.json.backup` on every save. A `lock.json` next to it gives one
//! process exclusive access.

use crate::error::{CloudError, Result};
use crate::model::{
    Account, Controller, ControllerMembership, DeployedResource, FirewallRule, Network,
    PortForwardingRule, PublicIp, Subnet, SubnetAllocation, VirtualMachine,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Every table held by the store, keyed by record id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub controllers: BTreeMap<u64, Controller>,
    pub memberships: BTreeMap<u64, ControllerMembership>,
    pub deployed_resources: BTreeMap<u64, DeployedResource>,
    pub accounts: BTreeMap<u64, Account>,
    pub networks: BTreeMap<u64, Network>,
    pub vms: BTreeMap<u64, VirtualMachine>,
    pub public_ips: BTreeMap<u64, PublicIp>,
    pub subnets: BTreeMap<u64, Subnet>,
    pub allocations: BTreeMap<u64, SubnetAllocation>,
    pub firewall_rules: BTreeMap<u64, FirewallRule>,
    pub port_forwarding_rules: BTreeMap<u64, PortForwardingRule>,
}

/// Serialized form of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Next id handed out by `persist`
    pub next_id: u64,

    pub tables: Tables,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            next_id: 1,
            tables: Tables::default(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Reads and writes snapshot files under a state directory
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Load the current snapshot, or an empty one if none was saved yet
    pub async fn load(&self) -> Result<Snapshot> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, starting from an empty store");
            return Ok(Snapshot::new());
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        if snapshot.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                snapshot.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            controllers = snapshot.tables.controllers.len(),
            subnets = snapshot.tables.subnets.len(),
            "Loaded state snapshot"
        );
        Ok(snapshot)
    }

    /// Save the snapshot, keeping the previous file as a backup
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state snapshot");
        Ok(())
    }

    /// Acquire a lock for exclusive access to the state directory
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than an hour are treated as abandoned
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} (pid {}) since {}",
                    lock_info.holder, lock_info.pid, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Subnet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut snapshot = Snapshot::new();
        let id = snapshot.allocate_id();
        let mut subnet = Subnet::new(1, "10.0.0.0/16".parse().unwrap());
        subnet.id = id;
        snapshot.tables.subnets.insert(id, subnet);

        manager.save(&snapshot).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.tables.subnets.len(), 1);
        assert_eq!(loaded.next_id, 2);
        assert_eq!(
            loaded.tables.subnets[&id].cidr.to_string(),
            "10.0.0.0/16"
        );
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let snapshot = manager.load().await.unwrap();
        assert!(snapshot.tables.controllers.is_empty());
        assert_eq!(snapshot.next_id, 1);
    }

    #[tokio::test]
    async fn test_save_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        manager.save(&Snapshot::new()).await.unwrap();
        manager.save(&Snapshot::new()).await.unwrap();

        assert!(temp_dir.path().join(STATE_BACKUP).exists());
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut snapshot = Snapshot::new();
        snapshot.version = STATE_VERSION + 1;
        manager.save(&snapshot).await.unwrap();

        let err = manager.load().await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        let second = manager.acquire_lock().await;
        assert!(matches!(second, Err(CloudError::LockError(_))));

        lock.release().await.unwrap();
        let again = manager.acquire_lock().await.unwrap();
        drop(again);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }
}
