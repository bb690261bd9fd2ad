//! # Storage Layer
//!
//! This module defines the remote container store that save data is persisted
//! to. The [`ContainerStore`] trait is the only thing the save containers and
//! the manager know about the platform's storage service.
//!
//! ## Model
//!
//! - A **container** is a named unit of storage with a display name.
//! - A **blob** is a named byte array inside a container.
//! - Writes are submitted as one atomic batch of upserts and deletes.
//!
//! ## Absence vs Failure
//!
//! Stores report "nothing there" with [`GameSaveError::BlobNotFound`] or
//! [`GameSaveError::ContainerNotFound`]. Callers treat these as a normal
//! outcome (see [`GameSaveError::is_not_found`]). Every other error is a
//! transient failure that may be retried.
//!
//! ## Implementations
//!
//! - [`memory::MemoryStore`]: in-memory, with failure injection and an
//!   operations log for tests.
//! - [`fs::FsStore`]: a directory per container on the local disk.
//!
//! ## Sessions
//!
//! A [`StoreProvider`] opens a store for one user. Opening is the point where a
//! platform would choose between full-sync and sync-on-demand.
//!
//! [`GameSaveError::BlobNotFound`]: crate::error::GameSaveError::BlobNotFound
//! [`GameSaveError::ContainerNotFound`]: crate::error::GameSaveError::ContainerNotFound
//! [`GameSaveError::is_not_found`]: crate::error::GameSaveError::is_not_found

use crate::error::{GameSaveError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub mod fs;
pub mod memory;

/// Name of the blob holding a container's payload.
pub const DATA_BLOB: &str = "data";

/// Name of the optional filler blob used to simulate larger saves.
pub const PADDING_BLOB: &str = "padding";

/// Container description returned by a container query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub display_name: String,
    pub last_modified: DateTime<Utc>,
    pub needs_sync: bool,
    pub changed_since_last_sync: bool,
    pub total_size: u64,
}

/// Blob description returned by a blob query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub size: u32,
}

/// Converts a stored length to the `u32` size a blob query reports.
pub(crate) fn blob_size(container: &str, blob: &str, len: u64) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        GameSaveError::Store(format!("blob {container}/{blob} is too large ({len} bytes)"))
    })
}

/// Destination for one blob in a [`ContainerStore::read_blobs`] call.
#[derive(Debug)]
pub struct ReadTarget<'a> {
    pub name: &'a str,
    pub buffer: &'a mut [u8],
}

impl<'a> ReadTarget<'a> {
    pub fn new(name: &'a str, buffer: &'a mut [u8]) -> Self {
        Self { name, buffer }
    }
}

/// Abstract interface to a cloud-backed container store.
#[async_trait]
pub trait ContainerStore: Send + Sync + 'static {
    /// Fetch the named blobs without forcing a sync.
    ///
    /// Returns only the blobs that exist; a missing container yields an empty map.
    async fn get_blobs(&self, container: &str, names: &[&str])
        -> Result<HashMap<String, Bytes>>;

    /// Fetch the named blobs into caller-owned buffers.
    ///
    /// Each stored blob must be exactly as long as its target buffer.
    /// Fails with `ContainerNotFound`/`BlobNotFound` if anything is absent.
    async fn read_blobs(&self, container: &str, targets: &mut [ReadTarget<'_>]) -> Result<()>;

    /// Atomically apply upserts and deletes, creating the container if needed.
    async fn submit_updates(
        &self,
        container: &str,
        upserts: HashMap<String, Bytes>,
        deletes: &[&str],
        display_name: &str,
    ) -> Result<()>;

    /// Delete a container and all of its blobs.
    async fn delete_container(&self, container: &str) -> Result<()>;

    /// List containers whose names start with `prefix` (all when `None`).
    async fn query_container_info(&self, prefix: Option<&str>) -> Result<Vec<ContainerInfo>>;

    /// List the blobs stored in a container.
    async fn query_blob_info(&self, container: &str) -> Result<Vec<BlobInfo>>;

    /// Bytes left in the user's quota for this title.
    async fn remaining_quota_bytes(&self) -> Result<i64>;
}

/// Opens a [`ContainerStore`] session for a user.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    type Store: ContainerStore;

    async fn open_for_user(&self, user: &str, sync_on_demand: bool) -> Result<Arc<Self::Store>>;
}
