//! # Save Containers
//!
//! A [`SaveContainer`] pairs one remote container with a [`BufferedRecord`]
//! and tracks whether the in-memory copy matches what the remote holds.
//!
//! ## States
//!
//! ```text
//!   Unloaded --get/read/save ok--> Loaded(clean) <--save ok-- Loaded(dirty)
//!       ^                               |                         ^
//!       |                               +------set_data/update----+
//!       +------------ delete_blobs ok / reset_data ---------------+
//! ```
//!
//! `is_loaded` is sticky: once a transfer has succeeded it stays set until the
//! container is reset, even if later transfers fail.
//!
//! ## Locking
//!
//! All state sits behind one mutex. Every operation takes it only for its
//! synchronous part (snapshot, swap, flag update). Remote calls run with the
//! lock released, so a completing transfer and a foreground `set_data` may
//! interleave; whichever commits last wins.
//!
//! ## Saving
//!
//! A save is split in two so callers can issue the synchronous half now and
//! submit later (see [`SaveContainer::prepare_save`]):
//!
//! 1. clear the dirty flag, remembering its old value
//! 2. run the pre-save hook on the front copy
//! 3. snapshot the bytes (plus optional random padding)
//! 4. submit the snapshot as one atomic update
//! 5. on failure, restore the dirty flag if it was set before

use crate::buffer::BufferedRecord;
use crate::error::Result;
use crate::lock;
use crate::metadata::{BlobMetadata, ContainerMetadata};
use crate::store::{ContainerInfo, ContainerStore, ReadTarget, DATA_BLOB, PADDING_BLOB};
use bytemuck::Pod;
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Result of a load that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Nothing is stored yet. Local state is unchanged.
    NotFound,
}

type SaveHook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct State<T: Pod + Default> {
    buffer: BufferedRecord<T>,
    metadata: ContainerMetadata,
    is_dirty: bool,
    is_loaded: bool,
}

/// The synchronous half of a save, ready to be submitted.
#[derive(Debug, Clone)]
pub struct PendingSave {
    upserts: HashMap<String, Bytes>,
    deletes: Vec<&'static str>,
    display_name: String,
    was_dirty: bool,
}

impl PendingSave {
    pub fn was_dirty(&self) -> bool {
        self.was_dirty
    }

    /// Total bytes this save will upload.
    pub fn upload_size(&self) -> usize {
        self.upserts.values().map(Bytes::len).sum()
    }
}

pub struct SaveContainer<T: Pod + Default> {
    name: String,
    on_before_save: SaveHook<T>,
    minimum_padded_size: u32,
    state: Mutex<State<T>>,
}

impl<T: Pod + Default + Send> SaveContainer<T> {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        let name = name.into();
        let metadata = ContainerMetadata::new(name.clone(), display_name);
        Self {
            name,
            on_before_save: Box::new(|_| {}),
            minimum_padded_size: 0,
            state: Mutex::new(State {
                buffer: BufferedRecord::new(),
                metadata,
                is_dirty: false,
                is_loaded: false,
            }),
        }
    }

    /// Install a hook that runs on the front copy right before each save.
    pub fn with_save_hook(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_before_save = Box::new(hook);
        self
    }

    /// Pad every save up to `size` bytes with a random `padding` blob.
    pub fn with_minimum_padded_size(mut self, size: u32) -> Self {
        self.minimum_padded_size = size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> String {
        lock(&self.state).metadata.display_name.clone()
    }

    pub fn minimum_padded_size(&self) -> u32 {
        self.minimum_padded_size
    }

    pub fn data(&self) -> T {
        *lock(&self.state).buffer.front()
    }

    /// Replace the in-memory value. The container becomes dirty.
    pub fn set_data(&self, value: &T) {
        let mut state = lock(&self.state);
        state.buffer.set_data(value);
        state.is_dirty = true;
    }

    /// Replace the in-memory value without marking it dirty.
    pub(crate) fn seed(&self, value: &T) {
        let mut state = lock(&self.state);
        state.buffer.set_data(value);
        state.is_dirty = false;
    }

    /// Edit a copy of the current value and install it. The container becomes dirty.
    ///
    /// `f` runs without the lock held, so it may read this container. A write
    /// that lands while `f` runs is overwritten by the edited copy.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut value = *lock(&self.state).buffer.front();
        let out = f(&mut value);
        let mut state = lock(&self.state);
        state.buffer.set_data(&value);
        state.is_dirty = true;
        out
    }

    pub fn mark_dirty(&self) {
        lock(&self.state).is_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).is_dirty
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).is_loaded
    }

    pub fn metadata(&self) -> ContainerMetadata {
        lock(&self.state).metadata.clone()
    }

    pub fn is_on_remote(&self) -> bool {
        lock(&self.state).metadata.is_on_remote
    }

    pub fn apply_info(&self, info: &ContainerInfo) {
        lock(&self.state).metadata.apply_info(info);
    }

    pub fn set_blobs(&self, blobs: Vec<BlobMetadata>) {
        lock(&self.state).metadata.set_blobs(blobs);
    }

    /// Forget everything: default value, never-synced metadata, clean and unloaded.
    pub fn reset_data(&self) {
        let mut state = lock(&self.state);
        state.buffer.reset();
        state.metadata.reset_data();
        state.is_dirty = false;
        state.is_loaded = false;
    }

    /// Fetch the `data` blob if it exists, without forcing a sync.
    pub async fn get<S: ContainerStore + ?Sized>(&self, store: &S) -> Result<LoadOutcome> {
        let started = Instant::now();
        let result = store.get_blobs(&self.name, &[DATA_BLOB]).await;
        tracing::debug!(
            container = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "get_blobs finished"
        );

        let blobs = match result {
            Ok(blobs) => blobs,
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "get failed");
                return Err(e);
            }
        };

        let Some(bytes) = blobs.get(DATA_BLOB) else {
            tracing::info!(container = %self.name, "no saved data found");
            return Ok(LoadOutcome::NotFound);
        };

        let mut state = lock(&self.state);
        state.buffer.set_bytes(bytes)?;
        state.is_dirty = false;
        state.is_loaded = true;
        Ok(LoadOutcome::Loaded)
    }

    /// Fetch the `data` blob, forcing a sync. The front only changes on success.
    pub async fn read<S: ContainerStore + ?Sized>(&self, store: &S) -> Result<LoadOutcome> {
        let mut staging = vec![0u8; BufferedRecord::<T>::byte_len()];
        let started = Instant::now();
        let result = {
            let mut targets = [ReadTarget::new(DATA_BLOB, &mut staging)];
            store.read_blobs(&self.name, &mut targets).await
        };
        tracing::debug!(
            container = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read_blobs finished"
        );

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(container = %self.name, "no saved data found");
                return Ok(LoadOutcome::NotFound);
            }
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "read failed");
                return Err(e);
            }
        }

        let mut state = lock(&self.state);
        state.buffer.set_bytes(&staging)?;
        state.is_dirty = false;
        state.is_loaded = true;
        Ok(LoadOutcome::Loaded)
    }

    /// Run the synchronous half of a save: clear dirty, run the hook, snapshot.
    pub fn prepare_save(&self) -> PendingSave {
        let mut state = lock(&self.state);
        let was_dirty = state.is_dirty;
        state.is_dirty = false;
        (self.on_before_save)(state.buffer.front_mut());

        let data = Bytes::copy_from_slice(state.buffer.as_bytes());
        let mut upserts = HashMap::new();
        let mut deletes = Vec::new();
        match padding_len(data.len(), self.minimum_padded_size) {
            Some(len) => {
                let mut padding = vec![0u8; len];
                rand::rng().fill(&mut padding[..]);
                upserts.insert(PADDING_BLOB.to_string(), Bytes::from(padding));
            }
            None => deletes.push(PADDING_BLOB),
        }
        upserts.insert(DATA_BLOB.to_string(), data);

        PendingSave {
            upserts,
            deletes,
            display_name: state.metadata.display_name.clone(),
            was_dirty,
        }
    }

    /// Submit a prepared save and commit its outcome.
    pub async fn commit_save<S: ContainerStore + ?Sized>(
        &self,
        store: &S,
        pending: PendingSave,
    ) -> Result<()> {
        let was_dirty = pending.was_dirty;
        let size = pending.upload_size();
        let started = Instant::now();
        let result = store
            .submit_updates(
                &self.name,
                pending.upserts,
                &pending.deletes,
                &pending.display_name,
            )
            .await;
        tracing::debug!(
            container = %self.name,
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "submit_updates finished"
        );

        let mut state = lock(&self.state);
        match result {
            Ok(()) => {
                state.is_loaded = true;
                Ok(())
            }
            Err(e) => {
                if was_dirty {
                    state.is_dirty = true;
                }
                tracing::error!(container = %self.name, error = %e, "save failed");
                Err(e)
            }
        }
    }

    pub async fn save<S: ContainerStore + ?Sized>(&self, store: &S) -> Result<()> {
        let pending = self.prepare_save();
        self.commit_save(store, pending).await
    }

    /// Delete the `data` and `padding` blobs, keeping the container itself.
    pub async fn delete_blobs<S: ContainerStore + ?Sized>(&self, store: &S) -> Result<()> {
        let display_name = self.display_name();
        let started = Instant::now();
        let result = store
            .submit_updates(
                &self.name,
                HashMap::new(),
                &[DATA_BLOB, PADDING_BLOB],
                &display_name,
            )
            .await;
        tracing::debug!(
            container = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "delete blobs finished"
        );

        match result {
            Ok(()) => {
                self.reset_data();
                Ok(())
            }
            Err(e) => {
                tracing::error!(container = %self.name, error = %e, "delete blobs failed");
                Err(e)
            }
        }
    }
}

fn padding_len(data_len: usize, minimum: u32) -> Option<usize> {
    let minimum = minimum as usize;
    (data_len < minimum).then(|| minimum - data_len)
}
