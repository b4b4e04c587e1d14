//! Source scoped views over a store

use super::resource::Resource;
use super::store::Store;
use crate::backend::Mutation;
use crate::error::Result;
use crate::types::{store_key, JsonValue, Ttl, KEY_SEPARATOR};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key prefix owned by one input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentifier {
    prefix: String,
}

impl SourceIdentifier {
    /// Identifier for an input of `input_type` with id `input_id`,
    /// e.g. `filestream::my-input::`
    pub fn new(input_type: &str, input_id: &str) -> Self {
        Self {
            prefix: format!("{}{KEY_SEPARATOR}", store_key(input_type, input_id)),
        }
    }

    /// Identifier from a raw key prefix
    pub fn from_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `key` belongs to this input
    pub fn matches_input(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Full key for a source name
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    /// Move `key` from the `from` prefix into this identifier's prefix
    pub fn rewrite(&self, key: &str, from: &SourceIdentifier) -> Option<String> {
        key.strip_prefix(from.prefix())
            .map(|rest| format!("{}{rest}", self.prefix))
    }
}

/// New key (and optionally new metadata) for a resource
#[derive(Debug, Clone, PartialEq)]
pub struct Rename {
    pub key: String,
    /// Replacement metadata; `None` keeps the current metadata
    pub meta: Option<JsonValue>,
}

impl Rename {
    /// Rename keeping the current metadata
    pub fn to(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            meta: None,
        }
    }

    /// Replace the metadata as part of the rename
    #[must_use]
    pub fn with_meta(mut self, meta: JsonValue) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Replace the metadata with a serialized value
    pub fn with_typed_meta<T: Serialize>(self, meta: &T) -> Result<Self> {
        Ok(self.with_meta(serde_json::to_value(meta)?))
    }
}

/// View of a store restricted to one input's keys.
///
/// The bulk operations hold the store's table lock while iterating and run
/// the callback for each resource; callbacks must not call back into the
/// store. Resources currently held by a consumer are skipped.
#[derive(Debug, Clone)]
pub struct SourceStore {
    identifier: SourceIdentifier,
    identifiers_to_take_over: Vec<SourceIdentifier>,
    store: Arc<Store>,
}

impl SourceStore {
    /// Create a view for `identifier`
    pub fn new(store: Arc<Store>, identifier: SourceIdentifier) -> Self {
        Self {
            identifier,
            identifiers_to_take_over: Vec::new(),
            store,
        }
    }

    /// Claim keys of other identifiers on `take_over`
    #[must_use]
    pub fn with_take_over(mut self, identifiers: Vec<SourceIdentifier>) -> Self {
        self.identifiers_to_take_over = identifiers;
        self
    }

    /// Identifier of this view
    pub fn identifier(&self) -> &SourceIdentifier {
        &self.identifier
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Decode the metadata stored for source `name`
    pub fn find_cursor_meta<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.store.find(&self.identifier.key_for(name)) {
            Some(resource) => resource.unpack_cursor_meta(),
            None => Ok(None),
        }
    }

    /// Reset the cursor of source `name`
    pub fn reset_cursor(&self, name: &str, cursor: impl Serialize) -> Result<()> {
        self.store
            .reset_cursor(&self.identifier.key_for(name), cursor)
    }

    /// Mark source `name` as removed; unknown sources are ignored
    pub fn remove(&self, name: &str) -> Result<()> {
        match self.store.find(&self.identifier.key_for(name)) {
            Some(resource) => self.store.update_ttl(&resource, Ttl::ZERO),
            None => Ok(()),
        }
    }

    /// Mark every resource of this input for which `pred` returns true as
    /// removed. Returns the number of resources marked.
    pub fn clean_if<F>(&self, mut pred: F) -> usize
    where
        F: FnMut(&Resource) -> bool,
    {
        let table = self.store.ephemeral.lock();
        let mut cleaned = 0;
        for (key, resource) in table.iter() {
            if !self.identifier.matches_input(key) {
                continue;
            }
            let Ok(_guard) = resource.consumer_lock().try_lock() else {
                info!(key = %key, "resource in use, not cleaning it");
                continue;
            };
            if !pred(resource) {
                continue;
            }
            match self.store.update_ttl(resource, Ttl::ZERO) {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(key = %key, error = %e, "failed to mark resource as removed"),
            }
        }
        cleaned
    }

    /// Rename resources of this input.
    ///
    /// `rename` is called for every active resource (TTL > 0). Resources with
    /// TTL <= 0 keep their key so that their deletion completes where it was
    /// started. Returns the number of renamed resources.
    pub fn update_identifiers<F>(&self, mut rename: F) -> usize
    where
        F: FnMut(&Resource) -> Option<Rename>,
    {
        let identifier = &self.identifier;
        self.rename_matching(|key| identifier.matches_input(key), &mut rename)
    }

    /// Move resources of the identifiers to take over into this input.
    ///
    /// `rename` computes the new key and metadata for every active resource
    /// owned by one of the take-over identifiers. Returns the number of
    /// resources taken over.
    pub fn take_over<F>(&self, mut rename: F) -> usize
    where
        F: FnMut(&Resource) -> Option<Rename>,
    {
        let previous = &self.identifiers_to_take_over;
        self.rename_matching(|key| previous.iter().any(|id| id.matches_input(key)), &mut rename)
    }

    /// Take over by swapping the owning prefix for this input's prefix and
    /// keeping the metadata
    pub fn take_over_prefixes(&self) -> usize {
        let previous = self.identifiers_to_take_over.clone();
        let identifier = self.identifier.clone();
        self.take_over(|resource| {
            previous
                .iter()
                .find_map(|from| identifier.rewrite(resource.key(), from))
                .map(Rename::to)
        })
    }

    fn rename_matching(
        &self,
        matches: impl Fn(&str) -> bool,
        rename: &mut dyn FnMut(&Resource) -> Option<Rename>,
    ) -> usize {
        let mut table = self.store.ephemeral.lock();
        let candidates: Vec<(String, Arc<Resource>)> = table
            .iter()
            .filter(|(key, _)| matches(key.as_str()))
            .map(|(key, resource)| (key.clone(), Arc::clone(resource)))
            .collect();

        let mut renamed = 0;
        for (key, resource) in candidates {
            if !resource.ttl().is_active() {
                continue;
            }
            let Ok(_guard) = resource.consumer_lock().try_lock() else {
                info!(key = %key, "resource in use, not renaming it");
                continue;
            };
            let Some(target) = rename(&resource) else {
                continue;
            };
            if target.key.is_empty() || target.key == key {
                continue;
            }

            match self.rename_resource(&mut table, &key, &resource, target) {
                Ok(true) => renamed += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "failed to rename resource"),
            }
        }
        renamed
    }

    /// Write the resource under its new key and remove the old key in one
    /// backend batch, then swap the table entries
    fn rename_resource(
        &self,
        table: &mut HashMap<String, Arc<Resource>>,
        old_key: &str,
        resource: &Resource,
        target: Rename,
    ) -> Result<bool> {
        if table.contains_key(&target.key) {
            info!(from = %old_key, to = %target.key, "rename target already exists, skipping");
            return Ok(false);
        }

        let renamed = Arc::new(resource.copy_with_new_key(&target.key, target.meta));
        {
            let mut st = renamed.state();
            let record = serde_json::to_value(st.in_sync_record())?;
            self.store.persistent.apply(vec![
                Mutation::Set {
                    key: target.key.clone(),
                    value: record,
                },
                Mutation::Remove {
                    key: old_key.to_string(),
                },
            ])?;
            st.stored = true;
            st.in_sync = true;
        }

        resource.state().ttl = Ttl::ZERO;
        table.remove(old_key);
        table.insert(target.key.clone(), renamed);
        debug!(from = %old_key, to = %target.key, "resource renamed");
        Ok(true)
    }
}
