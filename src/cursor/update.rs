//! Cursor update operations

use super::resource::{Resource, ResourceState};
use super::store::Store;
use crate::error::{Error, Result};
use crate::types::{merge_json, JsonValue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A cursor update waiting to be committed.
///
/// Created by a consumer once it has produced data up to a new position and
/// executed once that data has been acknowledged downstream. Dropping an
/// operation without executing it abandons the update.
#[derive(Debug)]
pub struct UpdateOp {
    resource: Option<Arc<Resource>>,
    id: u64,
    version: u64,
    timestamp: DateTime<Utc>,
}

/// Register a pending cursor update on `resource`.
///
/// The update is overlaid onto the current cursor to compute the pending
/// cursor value. Fails with `Error::Conflict` while another operation is
/// still pending on the same resource.
pub fn create_update_op(resource: &Arc<Resource>, update: impl Serialize) -> Result<UpdateOp> {
    let timestamp = Utc::now();
    let update = serde_json::to_value(update)?;

    let mut st = resource.state();
    if st.pending_update.is_some() {
        return Err(Error::conflict(resource.key()));
    }

    let mut cursor = st.cursor.clone().unwrap_or(JsonValue::Null);
    merge_json(&mut cursor, &update);
    st.pending_cursor_value = Some(cursor);
    st.pending_update = Some(update);
    st.active_cursor_operations += 1;
    st.next_op_id += 1;
    let id = st.next_op_id;
    st.pending_op = Some(id);

    Ok(UpdateOp {
        resource: Some(Arc::clone(resource)),
        id,
        version: st.locked_version,
        timestamp,
    })
}

impl UpdateOp {
    /// Key of the resource this operation updates
    pub fn key(&self) -> Option<&str> {
        self.resource.as_deref().map(Resource::key)
    }

    /// Commit the pending cursor and persist the resource.
    ///
    /// If the cursor was reset after the resource was locked the update is
    /// discarded: the reset value is authoritative. This is not an error. The
    /// pending state owned by the operation is released either way.
    pub fn execute(mut self, store: &Store) -> Result<()> {
        let Some(resource) = self.resource.take() else {
            return Ok(());
        };

        let mut st = resource.state();
        if !self.release(&mut st) {
            return Ok(());
        }

        let pending = st.pending_cursor_value.take();
        if st.version != self.version {
            debug!(
                key = %resource.key(),
                op_version = self.version,
                version = st.version,
                "discarding stale cursor update"
            );
            return Ok(());
        }

        if let Some(pending) = pending {
            st.cursor = Some(pending);
        }
        if st.updated.map_or(true, |updated| updated < self.timestamp) {
            st.updated = Some(self.timestamp);
        }

        store.write_state(resource.key(), &mut st)
    }

    /// Abandon the operation without committing its cursor
    pub fn done(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };

        let mut st = resource.state();
        if self.release(&mut st) {
            st.pending_cursor_value = None;
            debug!(key = %resource.key(), "cursor update abandoned");
        }
    }

    /// Drop the operation's claim on the pending state.
    ///
    /// Returns false when a reset or a newer operation already owns it.
    fn release(&self, st: &mut ResourceState) -> bool {
        if st.pending_op != Some(self.id) {
            return false;
        }
        st.pending_op = None;
        st.pending_update = None;
        st.active_cursor_operations = st.active_cursor_operations.saturating_sub(1);
        true
    }
}

impl Drop for UpdateOp {
    fn drop(&mut self) {
        self.abandon();
    }
}
