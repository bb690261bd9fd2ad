//! Local-disk container store.
//!
//! ```text
//! <root>/
//!   game_board_index/
//!     container.json     display name, last modified, live blob files
//!     data.1.blob
//!   game_board_1/
//!     container.json
//!     data.3.blob
//!     padding.3.blob
//! ```
//!
//! A submit writes every upserted blob to a new file named after the next
//! generation, then replaces `container.json` (uuid temp file + rename) so it
//! points at them. That rename is the commit point. A failure before it leaves
//! the previous manifest, and therefore the previous blobs, in place. Files the
//! new manifest no longer references are removed afterwards.
//!
//! A container directory without a manifest is an interrupted first write and
//! is invisible to every read.

use super::{blob_size, BlobInfo, ContainerInfo, ContainerStore, ReadTarget, StoreProvider};
use crate::error::{GameSaveError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

const MANIFEST_FILE: &str = "container.json";
const BLOB_EXT: &str = "blob";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlobEntry {
    file: String,
    size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    display_name: String,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    blobs: BTreeMap<String, BlobEntry>,
}

impl Manifest {
    fn total_size(&self) -> u64 {
        self.blobs.values().map(|b| b.size).sum()
    }
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    quota_bytes: i64,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: i64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    async fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
        match fs::read_to_string(dir.join(MANIFEST_FILE)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_manifest(dir: &Path, container: &str) -> Result<Manifest> {
        Self::load_manifest(dir)
            .await?
            .ok_or_else(|| GameSaveError::ContainerNotFound(container.to_string()))
    }

    async fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<()> {
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn used_bytes(&self) -> Result<u64> {
        let mut used = 0;
        for info in self.query_container_info(None).await? {
            used += info.total_size;
        }
        Ok(used)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(GameSaveError::Store(format!("invalid name: {name:?}")))
    }
}

fn blob_file_name(blob: &str, generation: u64) -> String {
    format!("{blob}.{generation}.{BLOB_EXT}")
}

/// Best-effort removal of unreferenced blob files.
async fn remove_files(dir: &Path, files: &[String]) {
    for file in files {
        match fs::remove_file(dir.join(file)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file = %file, error = %e, "could not remove blob file"),
        }
    }
}

#[async_trait]
impl ContainerStore for FsStore {
    async fn get_blobs(
        &self,
        container: &str,
        names: &[&str],
    ) -> Result<HashMap<String, Bytes>> {
        let dir = self.container_dir(container)?;
        let Some(manifest) = Self::load_manifest(&dir).await? else {
            return Ok(HashMap::new());
        };

        let mut found = HashMap::new();
        for name in names {
            if let Some(entry) = manifest.blobs.get(*name) {
                let bytes = fs::read(dir.join(&entry.file)).await?;
                found.insert(name.to_string(), Bytes::from(bytes));
            }
        }
        Ok(found)
    }

    async fn read_blobs(&self, container: &str, targets: &mut [ReadTarget<'_>]) -> Result<()> {
        let dir = self.container_dir(container)?;
        let manifest = Self::require_manifest(&dir, container).await?;

        let mut found = Vec::with_capacity(targets.len());
        for target in targets.iter() {
            let entry = manifest
                .blobs
                .get(target.name)
                .ok_or_else(|| GameSaveError::BlobNotFound {
                    container: container.to_string(),
                    blob: target.name.to_string(),
                })?;
            let bytes = fs::read(dir.join(&entry.file)).await?;
            if bytes.len() != target.buffer.len() {
                return Err(GameSaveError::SizeMismatch {
                    expected: target.buffer.len(),
                    actual: bytes.len(),
                });
            }
            found.push(bytes);
        }
        for (target, bytes) in targets.iter_mut().zip(found) {
            target.buffer.copy_from_slice(&bytes);
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
        let dir = self.container_dir(container)?;
        for name in upserts.keys() {
            validate_name(name)?;
        }

        let previous = Self::load_manifest(&dir).await?;
        let existing = previous.as_ref().map_or(0, Manifest::total_size);
        let generation = previous.as_ref().map_or(0, |m| m.generation) + 1;

        let mut blobs = previous
            .as_ref()
            .map(|m| m.blobs.clone())
            .unwrap_or_default();
        for name in deletes {
            blobs.remove(*name);
        }
        for (name, bytes) in &upserts {
            blobs.insert(
                name.clone(),
                BlobEntry {
                    file: blob_file_name(name, generation),
                    size: bytes.len() as u64,
                },
            );
        }
        let manifest = Manifest {
            display_name: display_name.to_string(),
            last_modified: Utc::now(),
            generation,
            blobs,
        };

        let used = self.used_bytes().await?;
        let total = used.saturating_sub(existing) + manifest.total_size();
        if total as i64 > self.quota_bytes {
            return Err(GameSaveError::QuotaExceeded {
                needed: upserts.values().map(|b| b.len() as u64).sum(),
                remaining: self.quota_bytes - used as i64,
            });
        }
        let content = serde_json::to_vec_pretty(&manifest)?;

        fs::create_dir_all(&dir).await?;
        let mut written = Vec::with_capacity(upserts.len());
        for (name, bytes) in &upserts {
            let file = blob_file_name(name, generation);
            if let Err(e) = fs::write(dir.join(&file), bytes).await {
                remove_files(&dir, &written).await;
                return Err(e.into());
            }
            written.push(file);
        }

        if let Err(e) = Self::write_atomic(&dir, &dir.join(MANIFEST_FILE), &content).await {
            remove_files(&dir, &written).await;
            return Err(e);
        }

        if let Some(previous) = previous {
            let live: HashSet<&str> = manifest.blobs.values().map(|b| b.file.as_str()).collect();
            let stale: Vec<String> = previous
                .blobs
                .into_values()
                .map(|b| b.file)
                .filter(|file| !live.contains(file.as_str()))
                .collect();
            remove_files(&dir, &stale).await;
        }
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        let dir = self.container_dir(container)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(GameSaveError::ContainerNotFound(container.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query_container_info(&self, prefix: Option<&str>) -> Result<Vec<ContainerInfo>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut infos = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if prefix.is_some_and(|p| !name.starts_with(p)) {
                continue;
            }
            let Some(manifest) = Self::load_manifest(&entry.path()).await? else {
                continue;
            };
            infos.push(ContainerInfo {
                total_size: manifest.total_size(),
                name,
                display_name: manifest.display_name,
                last_modified: manifest.last_modified,
                needs_sync: false,
                changed_since_last_sync: false,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn query_blob_info(&self, container: &str) -> Result<Vec<BlobInfo>> {
        let dir = self.container_dir(container)?;
        let manifest = Self::require_manifest(&dir, container).await?;
        manifest
            .blobs
            .iter()
            .map(|(name, entry)| {
                Ok(BlobInfo {
                    name: name.clone(),
                    size: blob_size(container, name, entry.size)?,
                })
            })
            .collect()
    }

    async fn remaining_quota_bytes(&self) -> Result<i64> {
        Ok(self.quota_bytes - self.used_bytes().await? as i64)
    }
}

/// Opens `<root>/users/<user>` as that user's store.
#[derive(Debug, Clone)]
pub struct FsProvider {
    pub root: PathBuf,
    pub quota_bytes: i64,
}

impl FsProvider {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: i64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn user_root(&self, user: &str) -> Result<PathBuf> {
        validate_name(user)?;
        Ok(self.root.join("users").join(user))
    }
}

#[async_trait]
impl StoreProvider for FsProvider {
    type Store = FsStore;

    async fn open_for_user(&self, user: &str, sync_on_demand: bool) -> Result<Arc<FsStore>> {
        let root = self.user_root(user)?;
        fs::create_dir_all(&root).await?;
        tracing::debug!(user, sync_on_demand, root = %root.display(), "opened local store");
        Ok(Arc::new(FsStore::new(root, self.quota_bytes)))
    }
}
