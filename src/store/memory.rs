//! In-memory document store.
//!
//! Mirrors the sled backend for tests and for `backend: memory`
//! throwaway runs. The mutex makes each document operation atomic,
//! matching the per-document guarantee of the on-disk store.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;
use crate::store::{doc_name, Collection, Datastore, EntityId};

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, HashMap<EntityId, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl Datastore for MemoryStore {
    fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn find_by_name(&self, collection: Collection, name: &str) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(&collection).and_then(|docs| {
            docs.values()
                .find(|doc| doc_name(doc) == Some(name))
                .cloned()
        }))
    }

    fn put(&self, collection: Collection, id: &EntityId, doc: Value) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), doc);
        Ok(())
    }

    fn remove(&self, collection: Collection, id: &EntityId) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(docs) = collections.get_mut(&collection) {
            docs.remove(id);
        }
        Ok(())
    }

    fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}
