//! In-memory backend
//!
//! Keeps every collection in a `BTreeMap` behind a lock. Nothing survives
//! the process, which makes it the backend of choice for tests.

use super::types::{Backend, Collection, Mutation, ValueDecoder};
use crate::error::{Error, Result};
use crate::types::JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Backend holding all collections in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
    refuse_access: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose `access` always fails
    pub fn unavailable() -> Self {
        let backend = Self::default();
        backend.refuse_access.store(true, Ordering::SeqCst);
        backend
    }

    /// Get the collection if it has been accessed before
    pub fn collection(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl Backend for MemoryBackend {
    fn access(&self, name: &str) -> Result<Arc<dyn Collection>> {
        if self.refuse_access.load(Ordering::SeqCst) {
            return Err(Error::backend(format!("collection '{name}' is unavailable")));
        }

        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)));
        collection.closed.store(false, Ordering::SeqCst);
        Ok(Arc::clone(collection) as Arc<dyn Collection>)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One in-memory collection
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    entries: RwLock<BTreeMap<String, JsonValue>>,
    closed: AtomicBool,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Copy of all stored key/value pairs
    pub fn snapshot(&self) -> BTreeMap<String, JsonValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the collection has been closed by its last user
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::CollectionClosed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl Collection for MemoryCollection {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        self.check_open()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn each(&self, visit: &mut dyn FnMut(&str, ValueDecoder<'_>) -> Result<bool>) -> Result<()> {
        self.check_open()?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries.iter() {
            if !visit(key, ValueDecoder::new(key, value))? {
                break;
            }
        }
        Ok(())
    }

    fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.check_open()?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    entries.insert(key, value);
                }
                Mutation::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
