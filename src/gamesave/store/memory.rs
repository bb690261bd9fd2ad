//! In-memory container store with operation tracing and failure injection.
//!
//! Every call is recorded as a [`StoreOp`] so tests can assert on what reached
//! the store and in what order. Calls on containers matching an injected
//! prefix fail with [`GameSaveError::Store`]. Submits to a held prefix park
//! until [`MemoryStore::release`] is called, which lets tests observe work
//! that is still in flight.

use super::{blob_size, BlobInfo, ContainerInfo, ContainerStore, ReadTarget, StoreProvider};
use crate::error::{GameSaveError, Result};
use crate::lock;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_QUOTA_BYTES: i64 = 16 * 1024 * 1024;

/// Record of a store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Open {
        user: String,
        sync_on_demand: bool,
    },
    GetBlobs {
        container: String,
        names: Vec<String>,
    },
    ReadBlobs {
        container: String,
        names: Vec<String>,
    },
    /// Upserts are `(blob, size)` sorted by name.
    Submit {
        container: String,
        upserts: Vec<(String, usize)>,
        deletes: Vec<String>,
    },
    DeleteContainer {
        container: String,
    },
    QueryContainers {
        prefix: Option<String>,
    },
    QueryBlobs {
        container: String,
    },
    Quota,
}

impl StoreOp {
    pub fn container(&self) -> Option<&str> {
        match self {
            StoreOp::GetBlobs { container, .. }
            | StoreOp::ReadBlobs { container, .. }
            | StoreOp::Submit { container, .. }
            | StoreOp::DeleteContainer { container }
            | StoreOp::QueryBlobs { container } => Some(container),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredContainer {
    display_name: String,
    blobs: BTreeMap<String, Bytes>,
    last_modified: DateTime<Utc>,
    needs_sync: bool,
    changed_since_last_sync: bool,
}

impl StoredContainer {
    fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            blobs: BTreeMap::new(),
            last_modified: Utc::now(),
            needs_sync: false,
            changed_since_last_sync: false,
        }
    }

    fn size(&self) -> u64 {
        self.blobs.values().map(|b| b.len() as u64).sum()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    containers: Arc<Mutex<BTreeMap<String, StoredContainer>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
    hold_prefixes: Arc<Mutex<Vec<String>>>,
    released: Arc<Notify>,
    fail_open: Arc<AtomicBool>,
    fail_quota: Arc<AtomicBool>,
    quota_bytes: i64,
    latency: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            containers: Arc::default(),
            operations: Arc::default(),
            fail_prefixes: Arc::default(),
            hold_prefixes: Arc::default(),
            released: Arc::new(Notify::new()),
            fail_open: Arc::default(),
            fail_quota: Arc::default(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            latency: None,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, quota_bytes: i64) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        lock(&self.operations).clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.operations).clear();
    }

    /// Submits recorded against one container.
    pub fn submits_to(&self, container: &str) -> usize {
        lock(&self.operations)
            .iter()
            .filter(|op| matches!(op, StoreOp::Submit { .. }) && op.container() == Some(container))
            .count()
    }

    /// Fail every call on containers whose name starts with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        lock(&self.fail_prefixes).push(prefix.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_prefixes).clear();
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_quota(&self, fail: bool) {
        self.fail_quota.store(fail, Ordering::SeqCst);
    }

    /// Park submits on containers whose name starts with `prefix` until [`release`].
    ///
    /// [`release`]: MemoryStore::release
    pub fn hold(&self, prefix: impl Into<String>) {
        lock(&self.hold_prefixes).push(prefix.into());
    }

    /// Let every parked submit continue.
    pub fn release(&self) {
        lock(&self.hold_prefixes).clear();
        self.released.notify_waiters();
    }

    /// Create or overwrite a container directly, bypassing quota and tracing.
    pub fn seed(&self, container: &str, display_name: &str, blobs: &[(&str, &[u8])]) {
        let mut containers = lock(&self.containers);
        let entry = containers
            .entry(container.to_string())
            .or_insert_with(|| StoredContainer::new(display_name));
        entry.display_name = display_name.to_string();
        for (name, bytes) in blobs {
            entry
                .blobs
                .insert(name.to_string(), Bytes::copy_from_slice(bytes));
        }
    }

    pub fn set_needs_sync(&self, container: &str, needs_sync: bool) -> bool {
        self.modify(container, |c| c.needs_sync = needs_sync)
    }

    pub fn set_changed(&self, container: &str, changed: bool) -> bool {
        self.modify(container, |c| c.changed_since_last_sync = changed)
    }

    pub fn blob(&self, container: &str, name: &str) -> Option<Bytes> {
        lock(&self.containers)
            .get(container)
            .and_then(|c| c.blobs.get(name).cloned())
    }

    pub fn container_names(&self) -> Vec<String> {
        lock(&self.containers).keys().cloned().collect()
    }

    pub fn used_bytes(&self) -> u64 {
        lock(&self.containers).values().map(StoredContainer::size).sum()
    }

    fn modify(&self, container: &str, f: impl FnOnce(&mut StoredContainer)) -> bool {
        match lock(&self.containers).get_mut(container) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    fn record(&self, op: StoreOp) {
        lock(&self.operations).push(op);
    }

    fn check_failure(&self, container: &str) -> Result<()> {
        let prefixes = lock(&self.fail_prefixes);
        if prefixes.iter().any(|p| container.starts_with(p.as_str())) {
            return Err(GameSaveError::Store(format!(
                "injected failure for container: {container}"
            )));
        }
        Ok(())
    }

    fn is_held(&self, container: &str) -> bool {
        lock(&self.hold_prefixes)
            .iter()
            .any(|p| container.starts_with(p.as_str()))
    }

    async fn wait_if_held(&self, container: &str) {
        loop {
            // Register before checking so a release in between is not missed.
            let released = self.released.notified();
            if !self.is_held(container) {
                return;
            }
            released.await;
        }
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn get_blobs(
        &self,
        container: &str,
        names: &[&str],
    ) -> Result<HashMap<String, Bytes>> {
        self.maybe_delay().await;
        self.record(StoreOp::GetBlobs {
            container: container.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
        });
        self.check_failure(container)?;

        let containers = lock(&self.containers);
        let Some(entry) = containers.get(container) else {
            return Ok(HashMap::new());
        };
        Ok(names
            .iter()
            .filter_map(|n| entry.blobs.get(*n).map(|b| (n.to_string(), b.clone())))
            .collect())
    }

    async fn read_blobs(&self, container: &str, targets: &mut [ReadTarget<'_>]) -> Result<()> {
        self.maybe_delay().await;
        self.record(StoreOp::ReadBlobs {
            container: container.to_string(),
            names: targets.iter().map(|t| t.name.to_string()).collect(),
        });
        self.check_failure(container)?;

        let containers = lock(&self.containers);
        let entry = containers
            .get(container)
            .ok_or_else(|| GameSaveError::ContainerNotFound(container.to_string()))?;

        // Validate everything before touching any buffer.
        let mut found = Vec::with_capacity(targets.len());
        for target in targets.iter() {
            let blob = entry
                .blobs
                .get(target.name)
                .ok_or_else(|| GameSaveError::BlobNotFound {
                    container: container.to_string(),
                    blob: target.name.to_string(),
                })?;
            if blob.len() != target.buffer.len() {
                return Err(GameSaveError::SizeMismatch {
                    expected: target.buffer.len(),
                    actual: blob.len(),
                });
            }
            found.push(blob.clone());
        }
        for (target, blob) in targets.iter_mut().zip(found) {
            target.buffer.copy_from_slice(&blob);
        }
        Ok(())
    }

    async fn submit_updates(
        &self,
        container: &str,
        upserts: HashMap<String, Bytes>,
        deletes: &[&str],
        display_name: &str,
    ) -> Result<()> {
        let mut sizes: Vec<(String, usize)> =
            upserts.iter().map(|(n, b)| (n.clone(), b.len())).collect();
        sizes.sort();
        self.record(StoreOp::Submit {
            container: container.to_string(),
            upserts: sizes,
            deletes: deletes.iter().map(|d| d.to_string()).collect(),
        });
        self.wait_if_held(container).await;
        self.maybe_delay().await;
        self.check_failure(container)?;

        let mut containers = lock(&self.containers);
        let mut updated = containers
            .get(container)
            .cloned()
            .unwrap_or_else(|| StoredContainer::new(display_name));
        for name in deletes {
            updated.blobs.remove(*name);
        }
        let needed: u64 = upserts.values().map(|b| b.len() as u64).sum();
        updated.blobs.extend(upserts);
        updated.display_name = display_name.to_string();
        updated.last_modified = Utc::now();

        let used_elsewhere: u64 = containers
            .iter()
            .filter(|(name, _)| name.as_str() != container)
            .map(|(_, c)| c.size())
            .sum();
        let total = used_elsewhere + updated.size();
        if total as i64 > self.quota_bytes {
            let used_before = used_elsewhere + containers.get(container).map_or(0, StoredContainer::size);
            return Err(GameSaveError::QuotaExceeded {
                needed,
                remaining: self.quota_bytes - used_before as i64,
            });
        }

        containers.insert(container.to_string(), updated);
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        self.maybe_delay().await;
        self.record(StoreOp::DeleteContainer {
            container: container.to_string(),
        });
        self.check_failure(container)?;

        lock(&self.containers)
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| GameSaveError::ContainerNotFound(container.to_string()))
    }

    async fn query_container_info(&self, prefix: Option<&str>) -> Result<Vec<ContainerInfo>> {
        self.maybe_delay().await;
        self.record(StoreOp::QueryContainers {
            prefix: prefix.map(str::to_string),
        });
        if let Some(prefix) = prefix {
            self.check_failure(prefix)?;
        }

        let containers = lock(&self.containers);
        Ok(containers
            .iter()
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, c)| ContainerInfo {
                name: name.clone(),
                display_name: c.display_name.clone(),
                last_modified: c.last_modified,
                needs_sync: c.needs_sync,
                changed_since_last_sync: c.changed_since_last_sync,
                total_size: c.size(),
            })
            .collect())
    }

    async fn query_blob_info(&self, container: &str) -> Result<Vec<BlobInfo>> {
        self.maybe_delay().await;
        self.record(StoreOp::QueryBlobs {
            container: container.to_string(),
        });
        self.check_failure(container)?;

        let containers = lock(&self.containers);
        let entry = containers
            .get(container)
            .ok_or_else(|| GameSaveError::ContainerNotFound(container.to_string()))?;
        entry
            .blobs
            .iter()
            .map(|(name, b)| {
                Ok(BlobInfo {
                    name: name.clone(),
                    size: blob_size(container, name, b.len() as u64)?,
                })
            })
            .collect()
    }

    async fn remaining_quota_bytes(&self) -> Result<i64> {
        self.maybe_delay().await;
        self.record(StoreOp::Quota);
        if self.fail_quota.load(Ordering::SeqCst) {
            return Err(GameSaveError::Store("injected quota failure".to_string()));
        }
        Ok(self.quota_bytes - self.used_bytes() as i64)
    }
}

/// Hands out the same shared store for every user.
#[async_trait]
impl StoreProvider for MemoryStore {
    type Store = MemoryStore;

    async fn open_for_user(&self, user: &str, sync_on_demand: bool) -> Result<Arc<MemoryStore>> {
        self.record(StoreOp::Open {
            user: user.to_string(),
            sync_on_demand,
        });
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(GameSaveError::Store(format!(
                "injected failure opening storage for {user}"
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}
