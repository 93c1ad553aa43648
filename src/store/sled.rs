//! On-disk document store backed by sled.
//!
//! One sled tree per collection, keyed by entity id, values are the JSON
//! documents as UTF-8 bytes. sled gives per-key atomic writes, which is
//! exactly the guarantee the entity layer assumes.

use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::store::{doc_name, Collection, Datastore, EntityId};

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(SledStore { db })
    }

    fn tree(&self, collection: Collection) -> Result<sled::Tree> {
        Ok(self.db.open_tree(collection.as_str())?)
    }
}

impl Datastore for SledStore {
    fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<Value>> {
        let tree = self.tree(collection)?;
        match tree.get(id.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_by_name(&self, collection: Collection, name: &str) -> Result<Option<Value>> {
        let tree = self.tree(collection)?;
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            if doc_name(&doc) == Some(name) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    fn put(&self, collection: Collection, id: &EntityId, doc: Value) -> Result<()> {
        let tree = self.tree(collection)?;
        tree.insert(id.as_str(), serde_json::to_vec(&doc)?)?;
        tree.flush()?;
        Ok(())
    }

    fn remove(&self, collection: Collection, id: &EntityId) -> Result<()> {
        let tree = self.tree(collection)?;
        tree.remove(id.as_str())?;
        tree.flush()?;
        Ok(())
    }

    fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let tree = self.tree(collection)?;
        let mut docs = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            docs.push(serde_json::from_slice(&bytes)?);
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let id = EntityId::generate();
        let doc = json!({"name": "net1", "prefix": 16});
        store.put(Collection::Network, &id, doc.clone()).unwrap();

        assert_eq!(store.get(Collection::Network, &id).unwrap(), Some(doc));
        assert!(store.get(Collection::Group, &id).unwrap().is_none());
    }

    #[test]
    fn test_find_by_name_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let id = EntityId::generate();
        store
            .put(Collection::Node, &id, json!({"name": "node001"}))
            .unwrap();

        assert!(store
            .find_by_name(Collection::Node, "node001")
            .unwrap()
            .is_some());
        assert!(store
            .find_by_name(Collection::Node, "node002")
            .unwrap()
            .is_none());

        store.remove(Collection::Node, &id).unwrap();
        assert!(store.get(Collection::Node, &id).unwrap().is_none());
        // removing twice is fine
        store.remove(Collection::Node, &id).unwrap();
    }
}
