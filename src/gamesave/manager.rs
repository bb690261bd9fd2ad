//! # Save Manager
//!
//! [`SaveManager`] owns a fixed set of numbered board slots plus one index
//! container recording which slot is active. It binds them to a store session
//! for one user and drives the session lifecycle:
//!
//! ```text
//! new/reset -> initialize_for_user -> (get/read/save/delete ...) -> suspend
//!                      ^                                              |
//!                      +----------------- resume_for_user ------------+
//! ```
//!
//! Slots are numbered from 1. Slot 0 means "no active slot".
//!
//! ## Sharing
//!
//! The manager is a cheap `Clone` handle over shared state. Background work
//! (the outgoing-slot flush in [`SaveManager::set_active_slot`]) captures a
//! handle and a slot number, never a reference into the slot list.
//!
//! ## Switching slots
//!
//! Switching is fire-and-forget with respect to the flush: the outgoing slot's
//! save is prepared immediately and submitted on a spawned task, and the index
//! is updated without waiting for it. Callers that need the flush outcome can
//! await the returned handle.

use crate::container::{LoadOutcome, PendingSave, SaveContainer};
use crate::error::{GameSaveError, Result};
use crate::metadata::{BlobMetadata, ContainerMetadata};
use crate::model::{stamp_board, stamp_index, BoardData, IndexRecord};
use crate::store::{ContainerInfo, ContainerStore, StoreProvider};
use bytemuck::Pod;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub const INDEX_CONTAINER_NAME: &str = "game_board_index";
pub const INDEX_DISPLAY_NAME: &str = "Game Board Index";
pub const SLOT_NAME_PREFIX: &str = "game_board_";
pub const SLOT_DISPLAY_PREFIX: &str = "Game Board ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub slot_count: u32,
    /// Saves smaller than this are padded with random bytes.
    pub minimum_padded_size: u32,
    pub slot_name_prefix: String,
    pub slot_display_prefix: String,
    pub index_name: String,
    pub index_display_name: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            slot_count: 4,
            minimum_padded_size: 0,
            slot_name_prefix: SLOT_NAME_PREFIX.to_string(),
            slot_display_prefix: SLOT_DISPLAY_PREFIX.to_string(),
            index_name: INDEX_CONTAINER_NAME.to_string(),
            index_display_name: INDEX_DISPLAY_NAME.to_string(),
        }
    }
}

/// Which containers a metadata refresh touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRefresh {
    /// Managed containers whose metadata was replaced.
    pub matched: Vec<String>,
    /// Containers in the store that this manager does not own.
    pub foreign: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Index,
    Slot(u32),
}

struct Session<S> {
    store: Arc<S>,
    user: String,
}

struct Inner<S> {
    options: ManagerOptions,
    slots: Vec<SaveContainer<BoardData>>,
    index: SaveContainer<IndexRecord>,
    session: RwLock<Option<Session<S>>>,
    remaining_quota: AtomicI64,
    is_initialized: AtomicBool,
    is_suspending: AtomicBool,
    sync_on_demand: AtomicBool,
    has_been_initialized: AtomicBool,
}

pub struct SaveManager<S: ContainerStore> {
    inner: Arc<Inner<S>>,
}

impl<S: ContainerStore> Clone for SaveManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ContainerStore> SaveManager<S> {
    pub fn new(options: ManagerOptions) -> Self {
        let slots = (1..=options.slot_count)
            .map(|n| {
                SaveContainer::new(
                    format!("{}{}", options.slot_name_prefix, n),
                    format!("{}{}", options.slot_display_prefix, n),
                )
                .with_save_hook(stamp_board)
                .with_minimum_padded_size(options.minimum_padded_size)
            })
            .collect();
        let index = SaveContainer::new(
            options.index_name.clone(),
            options.index_display_name.clone(),
        )
        .with_save_hook(stamp_index)
        .with_minimum_padded_size(options.minimum_padded_size);

        Self {
            inner: Arc::new(Inner {
                options,
                slots,
                index,
                session: RwLock::new(None),
                remaining_quota: AtomicI64::new(0),
                is_initialized: AtomicBool::new(false),
                is_suspending: AtomicBool::new(false),
                sync_on_demand: AtomicBool::new(false),
                has_been_initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Drop the session and return every container to its unloaded state.
    ///
    /// The sync-on-demand lock survives a reset.
    pub fn reset(&self) {
        tracing::debug!("resetting save manager");
        self.inner.is_initialized.store(false, Ordering::SeqCst);
        self.inner.is_suspending.store(false, Ordering::SeqCst);
        self.inner.remaining_quota.store(0, Ordering::SeqCst);
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.reset_containers();
    }

    fn reset_containers(&self) {
        self.inner.index.reset_data();
        for slot in &self.inner.slots {
            slot.reset_data();
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn slot_count(&self) -> u32 {
        self.inner.options.slot_count
    }

    /// The container for 1-based slot `n`.
    pub fn slot(&self, n: u32) -> Option<&SaveContainer<BoardData>> {
        let idx = usize::try_from(n.checked_sub(1)?).ok()?;
        self.inner.slots.get(idx)
    }

    pub fn index(&self) -> &SaveContainer<IndexRecord> {
        &self.inner.index
    }

    pub fn remaining_quota(&self) -> i64 {
        self.inner.remaining_quota.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized.load(Ordering::SeqCst)
    }

    pub fn is_suspending(&self) -> bool {
        self.inner.is_suspending.load(Ordering::SeqCst)
    }

    pub fn is_sync_on_demand(&self) -> bool {
        self.inner.sync_on_demand.load(Ordering::SeqCst)
    }

    /// True once any session has been opened, even across resets.
    pub fn has_been_initialized(&self) -> bool {
        self.inner.has_been_initialized.load(Ordering::SeqCst)
    }

    pub fn user(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user.clone())
    }

    fn store(&self) -> Result<Arc<S>> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| Arc::clone(&s.store))
            .ok_or(GameSaveError::NotInitialized)
    }

    /// Choose between full-sync and sync-on-demand sessions.
    ///
    /// Only allowed before the first session is opened.
    pub fn set_sync_on_demand(&self, sync_on_demand: bool) -> Result<()> {
        if self.has_been_initialized() {
            tracing::error!("sync-on-demand cannot change after a session was opened");
            return Err(GameSaveError::SyncModeLocked);
        }
        self.inner
            .sync_on_demand
            .store(sync_on_demand, Ordering::SeqCst);
        Ok(())
    }

    /// Open a session for `user` and load the index, metadata and quota.
    ///
    /// While a suspend is in progress only the session is replaced.
    pub async fn initialize_for_user<P>(
        &self,
        provider: &P,
        user: &str,
        refresh_only: bool,
    ) -> Result<()>
    where
        P: StoreProvider<Store = S> + ?Sized,
    {
        let sync_on_demand = self.is_sync_on_demand();
        let mode = if sync_on_demand {
            "sync-on-demand"
        } else {
            "full sync"
        };
        tracing::info!(user, mode, refresh_only, "initializing storage");

        let store = match provider.open_for_user(user, sync_on_demand).await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(user, error = %e, "opening storage failed");
                return Err(e);
            }
        };

        let previous_user = self.user();
        if previous_user.as_deref().is_some_and(|prev| prev != user) {
            tracing::debug!(user, "switching user, dropping cached saves");
            self.reset_containers();
        }
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Session {
            store,
            user: user.to_string(),
        });
        self.inner.has_been_initialized.store(true, Ordering::SeqCst);
        if refresh_only {
            tracing::info!(user, "storage session refreshed");
        } else {
            tracing::info!(user, "storage session created");
        }

        if self.is_suspending() {
            tracing::info!("suspend in progress, deferring load");
            return Ok(());
        }

        if let Err(e) = self.load_index().await {
            tracing::warn!(error = %e, "continuing with in-memory index");
        }
        self.inner.is_initialized.store(true, Ordering::SeqCst);

        let include_blobs = !sync_on_demand;
        if let Err(e) = self.load_all_container_metadata(None, include_blobs).await {
            tracing::warn!(error = %e, "container metadata unavailable");
        }
        if !refresh_only {
            self.log_metadata_snapshot(include_blobs);
        }
        self.get_remaining_quota().await;
        Ok(())
    }

    /// Re-run initialization for the bound user after a resume.
    pub async fn resume_for_user<P>(&self, provider: &P) -> Result<()>
    where
        P: StoreProvider<Store = S> + ?Sized,
    {
        let user = self.user().ok_or(GameSaveError::NotInitialized)?;
        self.initialize_for_user(provider, &user, true).await
    }

    /// Load the index, creating it remotely if none exists.
    ///
    /// On any failure the in-memory index is a fresh one pointing at slot 1.
    pub async fn load_index(&self) -> Result<()> {
        let store = self.store()?;
        let index = &self.inner.index;
        tracing::info!("loading game board index");
        index.reset_data();
        index.seed(&IndexRecord::fresh());

        match index.read(&*store).await {
            Ok(LoadOutcome::Loaded) => {
                let active = index.data().active_slot;
                if active > self.slot_count() {
                    tracing::warn!(active, "stored active slot out of range, clearing");
                    index.seed(&IndexRecord {
                        active_slot: 0,
                        ..index.data()
                    });
                }
                tracing::info!(active_slot = self.active_slot(), "game board index loaded");
                Ok(())
            }
            Ok(LoadOutcome::NotFound) => {
                tracing::info!("game board index not found, creating a new one");
                match index.save(&*store).await {
                    Ok(()) => {
                        tracing::info!("game board index created");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "game board index creation failed");
                        Err(e)
                    }
                }
            }
            Err(e) => {
                index.seed(&IndexRecord::fresh());
                tracing::error!(error = %e, "game board index load failed");
                Err(e)
            }
        }
    }

    /// Returns `Ok(false)` when skipped because the index was clean.
    pub async fn save_index(&self, only_if_dirty: bool) -> Result<bool> {
        let store = self.store()?;
        if only_if_dirty && !self.is_index_dirty() {
            return Ok(false);
        }
        tracing::info!("saving game board index");
        match self.inner.index.save(&*store).await {
            Ok(()) => {
                tracing::info!("game board index saved");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "game board index save failed");
                Err(e)
            }
        }
    }

    pub fn active_slot(&self) -> u32 {
        let active = self.inner.index.data().active_slot;
        if active <= self.slot_count() {
            active
        } else {
            0
        }
    }

    pub fn has_active_slot(&self) -> bool {
        self.active_slot() != 0
    }

    pub fn index_update_count(&self) -> u32 {
        self.inner.index.data().update_counter
    }

    pub fn is_index_dirty(&self) -> bool {
        self.inner.index.is_dirty()
    }

    pub fn is_active_slot_dirty(&self) -> bool {
        self.active_container().is_some_and(|(_, c)| c.is_dirty())
    }

    fn active_container(&self) -> Option<(u32, &SaveContainer<BoardData>)> {
        let n = self.active_slot();
        self.slot(n).map(|c| (n, c))
    }

    fn require_active(&self) -> Result<(u32, &SaveContainer<BoardData>)> {
        self.active_container().ok_or_else(|| {
            tracing::error!("no active game board");
            GameSaveError::NoActiveSlot
        })
    }

    /// Make `slot` active, flushing the outgoing slot in the background.
    ///
    /// The outgoing slot's pre-save hook and snapshot run before this returns;
    /// the submit runs on a spawned task whose handle is returned (`None` when
    /// nothing needed flushing). The index is updated and marked dirty without
    /// waiting for that task. Must be called from within a tokio runtime when
    /// the outgoing slot is dirty.
    pub fn set_active_slot(&self, slot: u32) -> Result<Option<JoinHandle<bool>>> {
        if self.slot(slot).is_none() {
            return Err(GameSaveError::InvalidSlot(slot));
        }
        let outgoing = self.active_slot();
        if outgoing == slot {
            return Ok(None);
        }

        let mut flush = None;
        if let Some(container) = self.slot(outgoing).filter(|c| c.is_dirty()) {
            match self.store() {
                Ok(store) => {
                    let runtime = Handle::try_current()
                        .map_err(|e| GameSaveError::Store(format!("no async runtime: {e}")))?;
                    tracing::info!(slot = outgoing, "flushing outgoing game board");
                    let pending = container.prepare_save();
                    let manager = self.clone();
                    flush = Some(runtime.spawn(async move {
                        manager.finish_flush(outgoing, store, pending).await
                    }));
                }
                Err(_) => {
                    tracing::warn!(slot = outgoing, "no session, outgoing game board stays dirty");
                }
            }
        }

        self.inner.index.update(|index| {
            index.active_slot = slot;
            index.update_counter = index.update_counter.wrapping_add(1);
        });
        tracing::info!(from = outgoing, to = slot, "active game board changed");
        Ok(flush)
    }

    async fn finish_flush(
        &self,
        slot: u32,
        store: Arc<S>,
        pending: PendingSave,
    ) -> bool {
        let Some(container) = self.slot(slot) else {
            return false;
        };
        if container.commit_save(&*store, pending).await.is_err() {
            tracing::error!(slot, "background save of game board failed");
            return false;
        }
        tracing::info!(slot, "game board saved");

        let name = container.name().to_string();
        if let Err(e) = self.load_all_container_metadata(Some(&name), true).await {
            tracing::warn!(slot, error = %e, "metadata refresh after save failed");
        }
        self.get_remaining_quota().await;
        true
    }

    /// A copy of the active board.
    pub fn active_board(&self) -> Result<BoardData> {
        Ok(self.require_active()?.1.data())
    }

    /// Edit the active board in place. The slot becomes dirty.
    pub fn update_active_board<R>(&self, f: impl FnOnce(&mut BoardData) -> R) -> Result<R> {
        Ok(self.require_active()?.1.update(f))
    }

    pub fn mark_active_slot_dirty(&self) -> Result<()> {
        self.require_active()?.1.mark_dirty();
        Ok(())
    }

    /// Load the active board if it exists, without forcing a sync.
    pub async fn get(&self) -> Result<LoadOutcome> {
        let (n, container) = self.require_active()?;
        let store = self.store()?;
        tracing::info!(slot = n, "loading game board (get)");
        let outcome = container.get(&*store).await?;
        log_load(n, outcome);
        Ok(outcome)
    }

    /// Load the active board, forcing a sync.
    pub async fn read(&self) -> Result<LoadOutcome> {
        let (n, container) = self.require_active()?;
        let store = self.store()?;
        tracing::info!(slot = n, "loading game board (read)");
        let outcome = container.read(&*store).await?;
        log_load(n, outcome);
        Ok(outcome)
    }

    /// Returns `Ok(false)` when skipped because the board was clean.
    pub async fn save(&self, only_if_dirty: bool) -> Result<bool> {
        let (n, container) = self.require_active()?;
        let store = self.store()?;
        if only_if_dirty && !container.is_dirty() {
            return Ok(false);
        }
        tracing::info!(slot = n, "saving game board");
        container.save(&*store).await?;
        tracing::info!(slot = n, "game board saved");
        Ok(true)
    }

    /// Remove the active board's blobs, keeping its container.
    pub async fn delete_blobs(&self) -> Result<()> {
        let (n, container) = self.require_active()?;
        let store = self.store()?;
        tracing::info!(slot = n, "deleting game board blobs");
        container.delete_blobs(&*store).await?;
        tracing::info!(slot = n, "game board blobs deleted");
        Ok(())
    }

    /// Remove the active board's whole container.
    pub async fn delete(&self) -> Result<()> {
        let (n, container) = self.require_active()?;
        let store = self.store()?;
        tracing::info!(slot = n, "deleting game board container");
        match store.delete_container(container.name()).await {
            Ok(()) => {
                container.reset_data();
                tracing::info!(slot = n, "game board deleted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(slot = n, error = %e, "game board delete failed");
                Err(e)
            }
        }
    }

    /// Refresh the cached quota. On failure the last known value is kept.
    pub async fn get_remaining_quota(&self) -> i64 {
        let Ok(store) = self.store() else {
            return self.remaining_quota();
        };
        match store.remaining_quota_bytes().await {
            Ok(remaining) => {
                self.inner
                    .remaining_quota
                    .store(remaining, Ordering::SeqCst);
                tracing::debug!(remaining, "remaining quota");
                remaining
            }
            Err(e) => {
                tracing::warn!(error = %e, "quota query failed");
                self.remaining_quota()
            }
        }
    }

    fn target_for(&self, name: &str) -> Option<Target> {
        if name == self.inner.index.name() {
            return Some(Target::Index);
        }
        self.inner
            .slots
            .iter()
            .position(|s| s.name() == name)
            .map(|i| Target::Slot(i as u32 + 1))
    }

    fn apply_to(&self, target: Target, f: impl FnOnce(&dyn MetadataSink)) {
        match target {
            Target::Index => f(&self.inner.index),
            Target::Slot(n) => {
                if let Some(slot) = self.slot(n) {
                    f(slot)
                }
            }
        }
    }

    /// Query container metadata and fold it into the managed containers.
    ///
    /// Unknown containers are logged and reported, never touched. With
    /// `include_blobs`, blob listings for every match are fetched concurrently.
    pub async fn load_all_container_metadata(
        &self,
        filter: Option<&str>,
        include_blobs: bool,
    ) -> Result<MetadataRefresh> {
        let store = self.store()?;
        let infos = match store.query_container_info(filter).await {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!(filter, error = %e, "container query failed");
                return Err(e);
            }
        };

        let mut refresh = MetadataRefresh::default();
        let mut matched = Vec::new();
        for info in &infos {
            match self.target_for(&info.name) {
                Some(target) => {
                    self.apply_to(target, |sink| sink.apply(info));
                    refresh.matched.push(info.name.clone());
                    matched.push((target, info.name.clone()));
                }
                None => {
                    tracing::warn!(container = %info.name, "found non-game-related container");
                    refresh.foreign.push(info.name.clone());
                }
            }
        }

        if include_blobs {
            let queries = matched.iter().map(|(target, name)| {
                let store = &store;
                async move { (*target, name, store.query_blob_info(name).await) }
            });
            for (target, name, result) in join_all(queries).await {
                match result {
                    Ok(blobs) => {
                        let blobs: Vec<BlobMetadata> = blobs.iter().map(BlobMetadata::from).collect();
                        self.apply_to(target, |sink| sink.blobs(blobs));
                    }
                    Err(e) => {
                        tracing::warn!(container = %name, error = %e, "blob query failed");
                        self.apply_to(target, |sink| sink.blobs(Vec::new()));
                    }
                }
            }
        }

        Ok(refresh)
    }

    /// Flush the active board and the index before the process is suspended.
    pub async fn suspend(&self) {
        tracing::info!("suspend start");
        self.inner.is_suspending.store(true, Ordering::SeqCst);
        if self.inner.is_initialized.swap(false, Ordering::SeqCst) {
            self.flush_dirty().await;
            tracing::info!("suspend (with save) complete");
        } else {
            tracing::info!("suspend complete");
        }
        self.inner.is_suspending.store(false, Ordering::SeqCst);
    }

    /// Flush the active board and the index for a departing user.
    pub async fn on_sign_out(&self) {
        tracing::info!("sign-out start");
        self.flush_dirty().await;
        tracing::info!("sign-out complete");
    }

    async fn flush_dirty(&self) {
        if self.has_active_slot() {
            if let Err(e) = self.save(true).await {
                tracing::error!(error = %e, "saving game board failed");
            }
        }
        if let Err(e) = self.save_index(true).await {
            tracing::error!(error = %e, "saving game board index failed");
        }
    }

    /// Display lines for the index and every slot present in the store.
    pub fn metadata_report(&self, list_blobs: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut push = |meta: ContainerMetadata| {
            lines.push(meta.summary_line());
            if list_blobs {
                lines.extend(meta.blob_lines());
            }
        };
        push(self.inner.index.metadata());
        for slot in &self.inner.slots {
            let meta = slot.metadata();
            if meta.is_on_remote {
                push(meta);
            }
        }
        lines
    }

    pub fn log_metadata_snapshot(&self, list_blobs: bool) {
        for line in self.metadata_report(list_blobs) {
            tracing::info!("{line}");
        }
    }
}

fn log_load(slot: u32, outcome: LoadOutcome) {
    match outcome {
        LoadOutcome::Loaded => tracing::info!(slot, "game board loaded"),
        LoadOutcome::NotFound => tracing::info!(slot, "game board not found"),
    }
}

/// Metadata updates shared by slot and index containers.
trait MetadataSink {
    fn apply(&self, info: &ContainerInfo);
    fn blobs(&self, blobs: Vec<BlobMetadata>);
}

impl<T: Pod + Default + Send> MetadataSink for SaveContainer<T> {
    fn apply(&self, info: &ContainerInfo) {
        self.apply_info(info);
    }

    fn blobs(&self, blobs: Vec<BlobMetadata>) {
        self.set_blobs(blobs);
    }
}
