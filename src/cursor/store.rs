//! Resource table mirrored against one backend collection

use super::resource::{Resource, ResourceState};
use crate::error::{Error, Result};
use crate::statestore::{Registry, StoreHandle};
use crate::types::{JsonValue, Record, Ttl, KEY_SEPARATOR};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// In-memory table of resources.
///
/// The table mutex only guards structural changes (insert, delete, iterate);
/// resource state is guarded per resource.
#[derive(Debug, Default)]
pub(crate) struct EphemeralStore {
    table: Mutex<HashMap<String, Arc<Resource>>>,
}

impl EphemeralStore {
    pub fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Resource>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, key: &str, create: bool) -> Option<Arc<Resource>> {
        let mut table = self.lock();
        if let Some(resource) = table.get(key) {
            return Some(Arc::clone(resource));
        }
        if !create {
            return None;
        }
        let resource = Arc::new(Resource::new(key));
        table.insert(key.to_string(), Arc::clone(&resource));
        Some(resource)
    }
}

/// Tracks cursor state for all resources under one key prefix.
///
/// The in-memory state of a resource is always equal to or ahead of the
/// persisted state: cursor values only reach the backend once their update
/// operation has executed.
#[derive(Debug)]
pub struct Store {
    prefix: String,
    pub(crate) ephemeral: EphemeralStore,
    pub(crate) persistent: StoreHandle,
}

impl Store {
    /// Open a store over a backend collection, loading every persisted
    /// resource whose key belongs to `prefix`
    pub fn open(persistent: StoreHandle, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let key_prefix = format!("{prefix}{KEY_SEPARATOR}");

        let mut table = HashMap::new();
        persistent.each(|key, dec| {
            if !key.starts_with(&key_prefix) {
                return Ok(true);
            }
            let record: Record = dec.decode()?;
            table.insert(key.to_string(), Arc::new(Resource::from_record(key, record)));
            Ok(true)
        })?;

        debug!(prefix = %prefix, resources = table.len(), "loaded cursor store");
        Ok(Self {
            prefix,
            ephemeral: EphemeralStore {
                table: Mutex::new(table),
            },
            persistent,
        })
    }

    /// Open a store through the registry
    pub fn open_in(registry: &Registry, name: &str, prefix: impl Into<String>) -> Result<Self> {
        Self::open(registry.get(name)?, prefix)
    }

    /// Key prefix owned by this store
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of resources in memory
    pub fn len(&self) -> usize {
        self.ephemeral.lock().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the resource for `key`, creating an empty one if unknown.
    ///
    /// New resources have an unset TTL and no cursor and are not persisted
    /// until their first update.
    pub fn get(&self, key: &str) -> Arc<Resource> {
        self.ephemeral
            .find(key, true)
            .unwrap_or_else(|| Arc::new(Resource::new(key)))
    }

    /// Get the resource for `key` only if it is known
    pub fn find(&self, key: &str) -> Option<Arc<Resource>> {
        self.ephemeral.find(key, false)
    }

    /// Set the TTL and write the resource to the backend immediately.
    ///
    /// A pending cursor update is not included: the backend receives the last
    /// committed cursor together with the new TTL.
    pub fn update_ttl(&self, resource: &Resource, ttl: impl Into<Ttl>) -> Result<()> {
        let ttl = ttl.into();
        let mut st = resource.state();
        if st.stored && st.ttl == ttl {
            return Ok(());
        }

        st.ttl = ttl;
        st.updated = Some(Utc::now());
        self.write_state(resource.key(), &mut st)
    }

    /// Force the cursor of `key` to `cursor`.
    ///
    /// Bumps the resource version so that update operations created against
    /// the old version are discarded when they execute.
    pub fn reset_cursor(&self, key: &str, cursor: impl Serialize) -> Result<()> {
        let cursor = serde_json::to_value(cursor)?;
        let resource = self.find(key).ok_or_else(|| Error::not_found(key))?;

        let mut st = resource.state();
        st.version += 1;
        st.active_cursor_operations = 0;
        st.pending_cursor_value = None;
        st.pending_update = None;
        st.pending_op = None;
        st.cursor = Some(cursor);
        debug!(key = %key, version = st.version, "cursor reset");
        self.write_state(key, &mut st)
    }

    /// Acquire the consumer lock of `key`.
    ///
    /// Waits until the resource is free or `cancel` fires. On success the
    /// current version is recorded as the locked version.
    pub async fn lock(&self, cancel: &CancellationToken, key: &str) -> Result<ResourceGuard> {
        let resource = self.get(key);
        let lock = Arc::clone(resource.consumer_lock());

        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(key = %key, "resource currently in use, waiting...");
                tokio::select! {
                    guard = lock.lock_owned() => guard,
                    () = cancel.cancelled() => {
                        info!(key = %key, "stopped while waiting for resource");
                        return Err(Error::cancelled(key));
                    }
                }
            }
        };

        {
            let mut st = resource.state();
            st.locked_version = st.version;
        }
        Ok(ResourceGuard {
            resource,
            _guard: guard,
        })
    }

    /// Copy of the in-memory state of every resource
    pub fn memory_snapshot(&self) -> BTreeMap<String, Record> {
        self.ephemeral
            .lock()
            .iter()
            .map(|(k, r)| (k.clone(), r.state_snapshot()))
            .collect()
    }

    /// Copy of the state assumed to be persisted for every resource.
    ///
    /// Equal to `memory_snapshot` only once all pending operations executed.
    pub fn in_sync_snapshot(&self) -> BTreeMap<String, Record> {
        self.ephemeral
            .lock()
            .iter()
            .map(|(k, r)| (k.clone(), r.in_sync_state_snapshot()))
            .collect()
    }

    /// Persist the in-sync view of a resource
    pub(crate) fn write_state(&self, key: &str, st: &mut ResourceState) -> Result<()> {
        let record = serde_json::to_value(st.in_sync_record())?;
        match self.persistent.set_raw(key, record) {
            Ok(()) => {
                st.stored = true;
                st.in_sync = true;
                Ok(())
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to write resource state");
                st.in_sync = false;
                Err(e)
            }
        }
    }

    /// Raw persisted value for `key`
    pub fn persisted(&self, key: &str) -> Result<Option<JsonValue>> {
        self.persistent.get(key)
    }
}

/// Exclusive access to a resource, released on drop
#[derive(Debug)]
pub struct ResourceGuard {
    resource: Arc<Resource>,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    /// The locked resource
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
}

impl Deref for ResourceGuard {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}
