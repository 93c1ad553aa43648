//! Document persistence.
//!
//! Entities are stored as whole JSON documents, one per object, keyed by
//! `(collection, id)`. The datastore guarantees per-document atomic
//! read/write and nothing more; there are no multi-document transactions,
//! so every cross-entity operation is a sequence of independent
//! read-modify-write cycles.

pub mod entity;
pub mod memory;
pub mod sled;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

pub use entity::{Entity, EntityStore, Links};
pub use memory::MemoryStore;
pub use self::sled::SledStore;

/// The collections the datastore knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "cluster")]
    Cluster,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "osimage")]
    OsImage,
    #[serde(rename = "bmcsetup")]
    BmcSetup,
    #[serde(rename = "switch")]
    Switch,
    #[serde(rename = "otherdev")]
    OtherDev,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Cluster => "cluster",
            Collection::Network => "network",
            Collection::Group => "group",
            Collection::Node => "node",
            Collection::OsImage => "osimage",
            Collection::BmcSetup => "bmcsetup",
            Collection::Switch => "switch",
            Collection::OtherDev => "otherdev",
        }
    }

    pub fn all() -> &'static [Collection] {
        &[
            Collection::Cluster,
            Collection::Network,
            Collection::Group,
            Collection::Node,
            Collection::OsImage,
            Collection::BmcSetup,
            Collection::Switch,
            Collection::OtherDev,
        ]
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Datastore-assigned object identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generate a fresh id for a new document.
    pub fn generate() -> Self {
        EntityId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// Per-document atomic storage of JSON documents.
pub trait Datastore {
    /// Fetch one document by id.
    fn get(&self, collection: Collection, id: &EntityId) -> Result<Option<Value>>;

    /// Fetch one document by its `name` field.
    fn find_by_name(&self, collection: Collection, name: &str) -> Result<Option<Value>>;

    /// Write one whole document, replacing any previous version.
    fn put(&self, collection: Collection, id: &EntityId, doc: Value) -> Result<()>;

    /// Remove one document. Removing a missing document is a no-op.
    fn remove(&self, collection: Collection, id: &EntityId) -> Result<()>;

    /// All documents of a collection, in unspecified order.
    fn list(&self, collection: Collection) -> Result<Vec<Value>>;
}

/// Extract the `name` field of a raw document, if present.
pub(crate) fn doc_name(doc: &Value) -> Option<&str> {
    doc.get("name").and_then(Value::as_str)
}
