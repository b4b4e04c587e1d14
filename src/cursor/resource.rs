//! Per-key tracked state

use crate::error::{Error, Result};
use crate::types::{JsonValue, Record, Ttl};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The in-memory unit of tracked state for one key.
///
/// A resource carries two locks. The consumer lock (`Store::lock`) is held by
/// whoever is currently reading the source and serializes cursor updates; it
/// can be held across await points. The state mutex guards the fields below
/// and is only ever held for short, synchronous sections.
#[derive(Debug)]
pub struct Resource {
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<ResourceState>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResourceState {
    /// Written to the backend at least once
    pub stored: bool,
    /// The backend holds the current internal state (TTL, updated, cursor)
    pub in_sync: bool,
    pub ttl: Ttl,
    pub updated: Option<DateTime<Utc>>,
    /// Last committed cursor
    pub cursor: Option<JsonValue>,
    /// Cursor once the pending update executes
    pub pending_cursor_value: Option<JsonValue>,
    /// Raw update carried by the pending operation
    pub pending_update: Option<JsonValue>,
    pub meta: Option<JsonValue>,
    pub version: u64,
    pub locked_version: u64,
    pub active_cursor_operations: u64,
    /// Id of the operation owning the pending fields
    pub pending_op: Option<u64>,
    pub next_op_id: u64,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            stored: false,
            in_sync: true,
            ttl: Ttl::UNSET,
            updated: None,
            cursor: None,
            pending_cursor_value: None,
            pending_update: None,
            meta: None,
            version: 0,
            locked_version: 0,
            active_cursor_operations: 0,
            pending_op: None,
            next_op_id: 0,
        }
    }
}

impl ResourceState {
    /// Record reflecting the in-memory truth, pending update included
    pub fn memory_record(&self) -> Record {
        Record {
            ttl: self.ttl,
            updated: self.updated,
            cursor: self
                .pending_cursor_value
                .clone()
                .or_else(|| self.cursor.clone()),
            meta: self.meta.clone(),
        }
    }

    /// Record reflecting what is allowed to reach the backend
    pub fn in_sync_record(&self) -> Record {
        Record {
            ttl: self.ttl,
            updated: self.updated,
            cursor: self.cursor.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl Resource {
    /// Create an empty resource
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self::with_state(key, ResourceState::default())
    }

    /// Create a resource from a persisted record
    pub(crate) fn from_record(key: impl Into<String>, record: Record) -> Self {
        Self::with_state(
            key,
            ResourceState {
                stored: true,
                in_sync: true,
                ttl: record.ttl,
                updated: record.updated,
                cursor: record.cursor,
                meta: record.meta,
                ..ResourceState::default()
            },
        )
    }

    fn with_state(key: impl Into<String>, state: ResourceState) -> Self {
        Self {
            key: key.into(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(state),
        }
    }

    /// Copy the committed state under a new key with a fresh lock.
    ///
    /// Pending updates and version counters are not carried over.
    pub(crate) fn copy_with_new_key(&self, key: impl Into<String>, meta: Option<JsonValue>) -> Self {
        let st = self.state();
        Self::with_state(
            key,
            ResourceState {
                stored: false,
                in_sync: false,
                ttl: st.ttl,
                updated: Some(Utc::now()),
                cursor: st.cursor.clone(),
                meta: meta.or_else(|| st.meta.clone()),
                ..ResourceState::default()
            },
        )
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn consumer_lock(&self) -> &Arc<tokio::sync::Mutex<()>> {
        &self.lock
    }

    /// Key of the resource
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a consumer currently holds the resource
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Snapshot of the in-memory state; runs ahead of the persisted state
    /// while an update is pending
    pub fn state_snapshot(&self) -> Record {
        self.state().memory_record()
    }

    /// Snapshot of the state assumed to be persisted already
    pub fn in_sync_state_snapshot(&self) -> Record {
        self.state().in_sync_record()
    }

    /// Committed cursor
    pub fn cursor(&self) -> Option<JsonValue> {
        self.state().cursor.clone()
    }

    /// Cursor value that the pending update will commit
    pub fn pending_cursor_value(&self) -> Option<JsonValue> {
        self.state().pending_cursor_value.clone()
    }

    /// Whether an update operation is waiting to be executed
    pub fn has_pending_update(&self) -> bool {
        self.state().pending_update.is_some()
    }

    /// Metadata
    pub fn meta(&self) -> Option<JsonValue> {
        self.state().meta.clone()
    }

    /// TTL
    pub fn ttl(&self) -> Ttl {
        self.state().ttl
    }

    /// Timestamp of the last TTL or cursor mutation
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.state().updated
    }

    /// Version, bumped whenever the cursor is reset
    pub fn version(&self) -> u64 {
        self.state().version
    }

    /// Version observed when the resource was last locked
    pub fn locked_version(&self) -> u64 {
        self.state().locked_version
    }

    /// Update operations neither executed nor dropped yet
    pub fn active_cursor_operations(&self) -> u64 {
        self.state().active_cursor_operations
    }

    /// Whether the backend holds the current state
    pub fn is_in_sync(&self) -> bool {
        self.state().in_sync
    }

    /// Decode the committed cursor into `T`
    pub fn unpack_cursor<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let cursor = self.cursor();
        self.decode(cursor)
    }

    /// Decode the metadata into `T`
    pub fn unpack_cursor_meta<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let meta = self.meta();
        self.decode(meta)
    }

    fn decode<T: DeserializeOwned>(&self, value: Option<JsonValue>) -> Result<Option<T>> {
        value
            .map(|v| serde_json::from_value(v).map_err(|e| Error::decode(&self.key, e.to_string())))
            .transpose()
    }
}
