//! Backend traits
//!
//! Values cross this boundary as `serde_json::Value`. The store never
//! interprets cursor or metadata payloads; it only round-trips them.

use crate::error::{Error, Result};
use crate::types::JsonValue;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A storage engine able to open named collections
pub trait Backend: Send + Sync {
    /// Open (or create) the collection with the given name
    fn access(&self, name: &str) -> Result<Arc<dyn Collection>>;

    /// Release all resources held by the backend
    fn close(&self) -> Result<()>;
}

/// A single named key/value collection
pub trait Collection: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<JsonValue>>;

    /// Check whether `key` is present
    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace the value under `key`
    fn set(&self, key: &str, value: JsonValue) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Visit every key/value pair until `visit` returns `Ok(false)` or an error
    fn each(&self, visit: &mut dyn FnMut(&str, ValueDecoder<'_>) -> Result<bool>) -> Result<()>;

    /// Apply a batch of mutations atomically
    fn apply(&self, mutations: Vec<Mutation>) -> Result<()>;

    /// Flush and close the collection
    fn close(&self) -> Result<()>;
}

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or replace a key
    Set { key: String, value: JsonValue },
    /// Remove a key
    Remove { key: String },
}

impl Mutation {
    /// Key touched by this mutation
    pub fn key(&self) -> &str {
        match self {
            Mutation::Set { key, .. } | Mutation::Remove { key } => key,
        }
    }
}

/// Decodes a stored value into a caller supplied type.
///
/// A decoder is only valid for the duration of the `each` callback it was
/// handed to.
#[derive(Debug, Clone, Copy)]
pub struct ValueDecoder<'a> {
    key: &'a str,
    value: &'a JsonValue,
}

impl<'a> ValueDecoder<'a> {
    /// Wrap a stored value
    pub fn new(key: &'a str, value: &'a JsonValue) -> Self {
        Self { key, value }
    }

    /// Decode into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.value).map_err(|e| Error::decode(self.key, e.to_string()))
    }

    /// Access the raw stored value
    pub fn raw(&self) -> &'a JsonValue {
        self.value
    }
}
