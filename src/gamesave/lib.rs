//! # Gamesave Architecture
//!
//! Gamesave is a library for **double-buffered game saves** on top of a
//! cloud-style container store, with a small CLI client for poking at a local
//! store. The library never writes to stdout and never assumes a terminal.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (main.rs + args.rs)                                    │
//! │  - Parses arguments, prints results, owns the runtime       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SaveManager (manager.rs)                                   │
//! │  - N board slots + one index container                      │
//! │  - Active slot, session lifecycle, metadata, quota          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SaveContainer<T> (container.rs)                            │
//! │  - Get / Read / Save / DeleteBlobs, dirty + loaded flags    │
//! │  - BufferedRecord<T>: swap only after a complete transfer   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage (store/)                                           │
//! │  - Abstract ContainerStore + StoreProvider traits           │
//! │  - FsStore (CLI), MemoryStore (tests)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Model
//!
//! Every remote call returns a [`Result`](error::Result). Absence ("nothing
//! saved yet") is not a failure: loads report it as
//! [`LoadOutcome::NotFound`](container::LoadOutcome::NotFound). A failed
//! transfer never changes the visible value of a container, and a failed
//! save leaves a dirty container dirty.
//!
//! ## Module Overview
//!
//! - [`buffer`]: front/back double buffer
//! - [`container`]: the per-container transfer protocol
//! - [`manager`]: slots, index, and session lifecycle
//! - [`metadata`]: cached remote container state and its display lines
//! - [`model`]: the board and index payloads
//! - [`store`]: storage abstraction and implementations
//! - [`config`]: configuration management
//! - [`logging`]: subscriber setup
//! - [`error`]: error types

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod buffer;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod manager;
pub mod metadata;
pub mod model;
pub mod store;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
