//! Resource cursor store
//!
//! Tracks how far each source has been read, across restarts.
//!
//! # Overview
//!
//! The cursor module provides:
//! - `Store` - table of resources mirrored against one backend collection
//! - `Resource` - per-key cursor, TTL, metadata and version counters
//! - `UpdateOp` - a pending cursor update, committed by `execute`
//! - `SourceStore` - prefix scoped view with rename and cleanup sweeps
//! - `gc` - TTL based removal of expired resources
//!
//! # Updating a cursor
//!
//! ```rust,ignore
//! let guard = store.lock(&cancel, "filestream::in::/var/log/app.log").await?;
//! let op = create_update_op(guard.resource(), json!({"offset": 42}))?;
//! // ... publish the data, wait for the acknowledgement ...
//! op.execute(&store)?;
//! ```
//!
//! An operation created before `Store::reset_cursor` is silently discarded
//! when it executes; the reset value wins.

pub mod gc;
mod resource;
mod source;
mod store;
mod update;

pub use resource::Resource;
pub use source::{Rename, SourceIdentifier, SourceStore};
pub use store::{ResourceGuard, Store};
pub use update::{create_update_op, UpdateOp};
