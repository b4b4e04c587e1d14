//! Persistence backends
//!
//! Durable key/value storage underneath the registry. A backend hands out
//! one named collection per store; the registry shares collections between
//! all users of the same store name.
//!
//! # Overview
//!
//! The backend module provides:
//! - `Backend` / `Collection` - the storage contract consumed by the registry
//! - `ValueDecoder` - typed decoding of stored values
//! - `MemoryBackend` - in-process storage, used for tests and ephemeral setups
//! - `FileBackend` - append-only change log with periodic checkpoints

mod file;
mod memory;
mod types;

pub use file::{FileBackend, FileBackendConfig, CHECKPOINT_FILE, LOG_FILE};
pub use memory::{MemoryBackend, MemoryCollection};
pub use types::{Backend, Collection, Mutation, ValueDecoder};
