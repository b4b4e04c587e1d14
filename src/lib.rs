// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Cursor Registry
//!
//! Persistent bookkeeping of per-source read positions ("cursors") for
//! ingestion inputs, so that a restarted process resumes where it stopped.
//!
//! ## Features
//!
//! - **Shared Registry**: reference counted stores over one backend
//! - **Two-Phase Cursor Updates**: cursors are committed only once the data
//!   they cover has been acknowledged downstream
//! - **Cursor Reset**: force a resource back to a known position, discarding
//!   in-flight updates
//! - **Source Views**: clean up, rename and take over resources by key prefix
//! - **TTL Collection**: expired resources are removed in the background
//! - **File Backend**: append-only JSON change log with checkpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cursor_registry::{create_update_op, FileBackend, FileBackendConfig, Registry, Store};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> cursor_registry::Result<()> {
//!     let backend = FileBackend::new(FileBackendConfig::new("data/registry"))?;
//!     let registry = Registry::new(Arc::new(backend));
//!     let store = Store::open_in(&registry, "filebeat", "filestream")?;
//!
//!     let resource = store.lock(&CancellationToken::new(), "filestream::in::src").await?;
//!     let op = create_update_op(resource.resource(), serde_json::json!({"offset": 42}))?;
//!     // ... publish events, wait for the ACK ...
//!     op.execute(&store)?;
//!
//!     drop(resource);
//!     drop(store);
//!     registry.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SourceStore   clean_if / update_identifiers / take_over      │
//! └──────────────────────────────┬───────────────────────────────┘
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │ Store   Resource table, lock, UpdateOp, reset_cursor, GC     │
//! └──────────────────────────────┬───────────────────────────────┘
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │ Registry   ref counted StoreHandles                          │
//! └──────────────────────────────┬───────────────────────────────┘
//! ┌──────────────┬───────────────┴───────────────────────────────┐
//! │ MemoryBackend│ FileBackend (log.json + checkpoint.json)      │
//! └──────────────┴───────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Storage backends
pub mod backend;

/// Change log format, replay and tailing
pub mod changelog;

/// Shared store registry
pub mod statestore;

/// Cursor tracking on top of a store
pub mod cursor;

/// Registry configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use backend::{Backend, Collection, FileBackend, FileBackendConfig, MemoryBackend};
pub use config::RegistryConfig;
pub use cursor::{
    create_update_op, Rename, Resource, ResourceGuard, SourceIdentifier, SourceStore, Store,
    UpdateOp,
};
pub use statestore::{Registry, StoreHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
