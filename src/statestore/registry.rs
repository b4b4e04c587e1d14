//! Registry of open stores

use crate::backend::{Backend, Collection, Mutation, ValueDecoder};
use crate::error::{Error, Result};
use crate::types::JsonValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// How often `Registry::close` reports stores that are still open
const CLOSE_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Catalog of open stores over a single backend.
///
/// A store is opened lazily on first `get` and shared by every caller asking
/// for the same name. It is closed against the backend once the last
/// `StoreHandle` has been dropped.
///
/// The registry is cheap to clone; clones share the same catalog.
#[derive(Clone)]
pub struct Registry {
    pub(super) inner: Arc<RegistryInner>,
}

pub(super) struct RegistryInner {
    backend: Arc<dyn Backend>,
    state: Mutex<RegistryState>,
    open_count: watch::Sender<usize>,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, SharedStore>,
    closed: bool,
}

struct SharedStore {
    collection: Arc<dyn Collection>,
    refs: usize,
}

impl Registry {
    /// Create a registry on top of a backend
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (open_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                state: Mutex::new(RegistryState::default()),
                open_count,
            }),
        }
    }

    /// Open a shared store
    pub fn get(&self, name: &str) -> Result<StoreHandle> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Error::RegistryClosed);
        }

        let collection = match state.active.get_mut(name) {
            Some(shared) => {
                shared.refs += 1;
                Arc::clone(&shared.collection)
            }
            None => {
                let collection = self
                    .inner
                    .backend
                    .access(name)
                    .map_err(|e| Error::access(name, e))?;
                state.active.insert(
                    name.to_string(),
                    SharedStore {
                        collection: Arc::clone(&collection),
                        refs: 1,
                    },
                );
                self.inner.open_count.send_replace(state.active.len());
                debug!(store = %name, "opened store");
                collection
            }
        };

        Ok(StoreHandle {
            name: name.to_string(),
            collection,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Names of the stores currently open
    pub fn open_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().active.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close the backend once every store handle has been released.
    ///
    /// A leaked handle blocks shutdown forever; the names of the stores still
    /// open are logged periodically while waiting. Use `close_timeout` for a
    /// bounded wait.
    pub async fn close(&self) -> Result<()> {
        let mut rx = self.begin_close();
        loop {
            match tokio::time::timeout(CLOSE_REPORT_INTERVAL, rx.wait_for(|n| *n == 0)).await {
                Ok(_) => break,
                Err(_) => warn!(
                    open = ?self.open_stores(),
                    "registry close waiting for store handles to be released"
                ),
            }
        }
        self.inner.backend.close()
    }

    /// Like `close`, but gives up after `timeout`, reporting the leaked stores.
    /// The backend is left open in that case.
    pub async fn close_timeout(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.begin_close();
        if tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .is_err()
        {
            let open = self.open_stores();
            warn!(?open, "registry close timed out");
            return Err(Error::ShutdownTimeout { open });
        }
        self.inner.backend.close()
    }

    fn begin_close(&self) -> watch::Receiver<usize> {
        self.inner.lock().closed = true;
        self.inner.open_count.subscribe()
    }
}

impl RegistryInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn retain(&self, name: &str) {
        let mut state = self.lock();
        match state.active.get_mut(name) {
            Some(shared) => shared.refs += 1,
            None => panic!("retaining unknown store '{name}'"),
        }
    }

    pub(super) fn release(&self, name: &str) {
        let mut state = self.lock();
        let Some(shared) = state.active.get_mut(name) else {
            panic!("removing an unknown store '{name}'");
        };
        assert!(shared.refs > 0, "store '{name}' released too often");
        shared.refs -= 1;
        if shared.refs > 0 {
            return;
        }

        if let Some(shared) = state.active.remove(name) {
            if let Err(e) = shared.collection.close() {
                warn!(store = %name, error = %e, "failed to close store");
            }
        }
        self.open_count.send_replace(state.active.len());
        debug!(store = %name, "closed store");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("open", &self.open_stores())
            .finish()
    }
}

/// Reference counted access to one shared store.
///
/// Cloning retains the store, dropping releases it.
pub struct StoreHandle {
    name: String,
    collection: Arc<dyn Collection>,
    registry: Arc<RegistryInner>,
}

impl StoreHandle {
    /// Name of the store
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the handle explicitly
    pub fn release(self) {
        drop(self);
    }

    /// Decode the value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.collection
            .get(key)?
            .map(|value| ValueDecoder::new(key, &value).decode())
            .transpose()
    }

    /// Check whether `key` is present
    pub fn has(&self, key: &str) -> Result<bool> {
        self.collection.has(key)
    }

    /// Serialize and store `value` under `key`
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.collection.set(key, serde_json::to_value(value)?)
    }

    /// Store a raw value
    pub fn set_raw(&self, key: &str, value: JsonValue) -> Result<()> {
        self.collection.set(key, value)
    }

    /// Remove `key`
    pub fn remove(&self, key: &str) -> Result<()> {
        self.collection.remove(key)
    }

    /// Visit all key/value pairs
    pub fn each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, ValueDecoder<'_>) -> Result<bool>,
    {
        self.collection.each(&mut visit)
    }

    /// Apply several mutations atomically
    pub fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.collection.apply(mutations)
    }
}

impl Clone for StoreHandle {
    fn clone(&self) -> Self {
        self.registry.retain(&self.name);
        Self {
            name: self.name.clone(),
            collection: Arc::clone(&self.collection),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .finish()
    }
}
