//! Typed entities over the document store, with bidirectional
//! reference-counted dependency links.
//!
//! Every persisted object carries two edge maps: `use` (what it depends
//! on) and `usedby` (what depends on it). For any link A -> B the counter
//! stored on A under B equals the counter stored on B under A; entries
//! disappear when their count reaches zero, and an entity with a
//! non-empty `usedby` map cannot be deleted.
//!
//! Entities are static structs, not free-form documents: the compiler
//! checks field types, and `Entity::validate` covers only genuinely
//! dynamic content such as names.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LunaError, Result};
use crate::store::{Collection, Datastore, EntityId};

/// Reference-counted edge map, keyed by collection then entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Links(BTreeMap<Collection, BTreeMap<EntityId, u32>>);

impl Links {
    /// True when no edge is recorded at all.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Number of distinct linked entities.
    pub fn count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn get(&self, collection: Collection, id: &EntityId) -> u32 {
        self.0
            .get(&collection)
            .and_then(|ids| ids.get(id))
            .copied()
            .unwrap_or(0)
    }

    /// Ids linked under one collection.
    pub fn ids(&self, collection: Collection) -> Vec<EntityId> {
        self.0
            .get(&collection)
            .map(|ids| ids.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every `(collection, id)` pair with a positive count.
    pub fn entries(&self) -> Vec<(Collection, EntityId, u32)> {
        self.0
            .iter()
            .flat_map(|(collection, ids)| {
                ids.iter().map(|(id, count)| (*collection, id.clone(), *count))
            })
            .collect()
    }

    fn inc(&mut self, collection: Collection, id: &EntityId) {
        *self
            .0
            .entry(collection)
            .or_default()
            .entry(id.clone())
            .or_insert(0) += 1;
    }

    fn dec(&mut self, collection: Collection, id: &EntityId) -> Result<()> {
        let ids = self.0.get_mut(&collection).ok_or_else(|| {
            LunaError::Validation(format!("no link to {} '{}' to remove", collection, id))
        })?;
        let count = ids.get_mut(id).ok_or_else(|| {
            LunaError::Validation(format!("no link to {} '{}' to remove", collection, id))
        })?;
        *count -= 1;
        if *count == 0 {
            ids.remove(id);
        }
        if ids.is_empty() {
            self.0.remove(&collection);
        }
        Ok(())
    }
}

/// A persisted, linkable object.
pub trait Entity: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &EntityId;
    fn name(&self) -> &str;

    /// Forward edges: entities this one depends on (`use`).
    fn uses(&self) -> &Links;
    fn uses_mut(&mut self) -> &mut Links;

    /// Backward edges: entities depending on this one (`usedby`).
    fn used_by(&self) -> &Links;
    fn used_by_mut(&mut self) -> &mut Links;

    /// Runtime checks for dynamic fields. Static typing covers the rest.
    fn validate(&self) -> Result<()> {
        validate_name(self.name())
    }
}

/// Names address entities externally, so they must be non-empty and
/// shell-safe.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LunaError::Validation("name must not be empty".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(LunaError::Validation(format!(
            "name '{}' contains characters outside [a-zA-Z0-9._-]",
            name
        )));
    }
    Ok(())
}

/// Implements the [`Entity`] accessors for a struct carrying the
/// conventional `id`, `name`, `links` and `usedby` fields.
#[macro_export]
macro_rules! impl_entity {
    ($type:ty, $collection:expr) => {
        impl $crate::store::Entity for $type {
            const COLLECTION: $crate::store::Collection = $collection;

            fn id(&self) -> &$crate::store::EntityId {
                &self.id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn uses(&self) -> &$crate::store::Links {
                &self.links
            }

            fn uses_mut(&mut self) -> &mut $crate::store::Links {
                &mut self.links
            }

            fn used_by(&self) -> &$crate::store::Links {
                &self.usedby
            }

            fn used_by_mut(&mut self) -> &mut $crate::store::Links {
                &mut self.usedby
            }
        }
    };
}

/// Generic entity operations over a [`Datastore`].
///
/// Every mutating call here is one whole-document read-modify-write;
/// operations touching two entities (link/unlink) write two documents in
/// sequence without any cross-document transaction.
pub struct EntityStore<'a> {
    store: &'a dyn Datastore,
}

impl<'a> EntityStore<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        EntityStore { store }
    }

    pub fn datastore(&self) -> &'a dyn Datastore {
        self.store
    }

    /// Persist a new entity, failing if its name is already taken.
    pub fn create<E: Entity>(&self, entity: E) -> Result<E> {
        entity.validate()?;
        if self
            .store
            .find_by_name(E::COLLECTION, entity.name())?
            .is_some()
        {
            return Err(LunaError::AlreadyExists {
                collection: E::COLLECTION,
                name: entity.name().to_string(),
            });
        }
        self.save(&entity)?;
        log::debug!(
            "created {} '{}' ({})",
            E::COLLECTION,
            entity.name(),
            entity.id()
        );
        Ok(entity)
    }

    /// Resolve an entity by name, falling back to id.
    pub fn resolve<E: Entity>(&self, key: &str) -> Result<E> {
        let doc = match self.store.find_by_name(E::COLLECTION, key)? {
            Some(doc) => Some(doc),
            None => self.store.get(E::COLLECTION, &EntityId::from(key))?,
        };
        let doc = doc.ok_or_else(|| LunaError::NotFound {
            collection: E::COLLECTION,
            key: key.to_string(),
        })?;
        Ok(serde_json::from_value(doc)?)
    }

    pub fn by_id<E: Entity>(&self, id: &EntityId) -> Result<E> {
        let doc = self
            .store
            .get(E::COLLECTION, id)?
            .ok_or_else(|| LunaError::NotFound {
                collection: E::COLLECTION,
                key: id.to_string(),
            })?;
        Ok(serde_json::from_value(doc)?)
    }

    /// Write the entity back as one whole document.
    pub fn save<E: Entity>(&self, entity: &E) -> Result<()> {
        let doc = serde_json::to_value(entity)?;
        self.store.put(E::COLLECTION, entity.id(), doc)
    }

    /// Record a dependency `from -> to`, bumping the paired counters on
    /// both entities and persisting both documents.
    pub fn link<A: Entity, B: Entity>(&self, from: &mut A, to: &mut B) -> Result<()> {
        from.uses_mut().inc(B::COLLECTION, to.id());
        to.used_by_mut().inc(A::COLLECTION, from.id());
        self.save(from)?;
        self.save(to)
    }

    /// Remove one unit of the dependency `from -> to`.
    pub fn unlink<A: Entity, B: Entity>(&self, from: &mut A, to: &mut B) -> Result<()> {
        from.uses_mut().dec(B::COLLECTION, to.id())?;
        to.used_by_mut().dec(A::COLLECTION, from.id())?;
        self.save(from)?;
        self.save(to)
    }

    /// The `(collection, id)` pairs currently depending on `entity`.
    pub fn back_links<E: Entity>(&self, entity: &E) -> Vec<(Collection, EntityId)> {
        entity
            .used_by()
            .entries()
            .into_iter()
            .map(|(collection, id, _)| (collection, id))
            .collect()
    }

    /// Delete an entity.
    ///
    /// Fails with `ReferentialIntegrity` while anything still depends on
    /// it; otherwise drops the document after detaching every forward
    /// link from the linked entities' `usedby` maps.
    pub fn delete<E: Entity>(&self, entity: E) -> Result<()> {
        if !entity.used_by().is_empty() {
            return Err(LunaError::ReferentialIntegrity {
                collection: E::COLLECTION,
                name: entity.name().to_string(),
                count: entity.used_by().count(),
            });
        }

        for (collection, id, _) in entity.uses().entries() {
            match self.store.get(collection, &id)? {
                Some(mut doc) => {
                    strip_back_link(&mut doc, E::COLLECTION, entity.id());
                    self.store.put(collection, &id, doc)?;
                }
                None => {
                    log::warn!(
                        "{} '{}' links to missing {} '{}'",
                        E::COLLECTION,
                        entity.name(),
                        collection,
                        id
                    );
                }
            }
        }

        self.store.remove(E::COLLECTION, entity.id())?;
        log::debug!("deleted {} '{}'", E::COLLECTION, entity.name());
        Ok(())
    }

    /// Sorted names of every document in a collection.
    pub fn list_names(&self, collection: Collection) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list(collection)?
            .iter()
            .filter_map(|doc| crate::store::doc_name(doc).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Drop the `usedby` entry for `(from_collection, from_id)` from a raw
/// document, however many counts it carries.
fn strip_back_link(doc: &mut Value, from_collection: Collection, from_id: &EntityId) {
    let Some(usedby) = doc.get_mut("usedby").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(ids) = usedby
        .get_mut(from_collection.as_str())
        .and_then(Value::as_object_mut)
    {
        ids.remove(from_id.as_str());
        if ids.is_empty() {
            usedby.remove(from_collection.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[derive(Debug, Serialize, Deserialize)]
    struct Image {
        id: EntityId,
        name: String,
        #[serde(default, rename = "use")]
        links: Links,
        #[serde(default)]
        usedby: Links,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pool {
        id: EntityId,
        name: String,
        #[serde(default, rename = "use")]
        links: Links,
        #[serde(default)]
        usedby: Links,
    }

    impl_entity!(Image, Collection::OsImage);
    impl_entity!(Pool, Collection::Group);

    fn image(name: &str) -> Image {
        Image {
            id: EntityId::generate(),
            name: name.to_string(),
            links: Links::default(),
            usedby: Links::default(),
        }
    }

    fn pool(name: &str) -> Pool {
        Pool {
            id: EntityId::generate(),
            name: name.to_string(),
            links: Links::default(),
            usedby: Links::default(),
        }
    }

    #[test]
    fn test_create_and_resolve() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        let img = store.create(image("centos7")).unwrap();
        let by_name: Image = store.resolve("centos7").unwrap();
        assert_eq!(by_name.id, img.id);
        let by_id: Image = store.resolve(img.id.as_str()).unwrap();
        assert_eq!(by_id.name, "centos7");

        assert!(matches!(
            store.resolve::<Image>("missing"),
            Err(LunaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_create_duplicate_name_fails() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        store.create(image("centos7")).unwrap();
        assert!(matches!(
            store.create(image("centos7")),
            Err(LunaError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        assert!(matches!(
            store.create(image("")),
            Err(LunaError::Validation(_))
        ));
        assert!(matches!(
            store.create(image("two words")),
            Err(LunaError::Validation(_))
        ));
    }

    #[test]
    fn test_link_counters_pair_up() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        let mut img = store.create(image("centos7")).unwrap();
        let mut grp = store.create(pool("compute")).unwrap();

        store.link(&mut grp, &mut img).unwrap();
        store.link(&mut grp, &mut img).unwrap();

        let img_db: Image = store.resolve("centos7").unwrap();
        let grp_db: Pool = store.resolve("compute").unwrap();
        assert_eq!(grp_db.links.get(Collection::OsImage, &img.id), 2);
        assert_eq!(img_db.usedby.get(Collection::Group, &grp.id), 2);

        store.unlink(&mut grp, &mut img).unwrap();
        let img_db: Image = store.resolve("centos7").unwrap();
        assert_eq!(img_db.usedby.get(Collection::Group, &grp.id), 1);

        store.unlink(&mut grp, &mut img).unwrap();
        let img_db: Image = store.resolve("centos7").unwrap();
        assert!(img_db.usedby.is_empty());

        assert!(store.unlink(&mut grp, &mut img).is_err());
    }

    #[test]
    fn test_delete_refused_while_referenced() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        let mut img = store.create(image("centos7")).unwrap();
        let mut grp = store.create(pool("compute")).unwrap();
        store.link(&mut grp, &mut img).unwrap();

        let img_db: Image = store.resolve("centos7").unwrap();
        assert!(matches!(
            store.delete(img_db),
            Err(LunaError::ReferentialIntegrity { .. })
        ));

        store.unlink(&mut grp, &mut img).unwrap();
        let img_db: Image = store.resolve("centos7").unwrap();
        store.delete(img_db).unwrap();
        assert!(store.resolve::<Image>("centos7").is_err());
    }

    #[test]
    fn test_delete_detaches_forward_links() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        let mut img = store.create(image("centos7")).unwrap();
        let mut grp = store.create(pool("compute")).unwrap();
        store.link(&mut grp, &mut img).unwrap();

        // deleting the dependent group must clear the image's usedby
        let grp_db: Pool = store.resolve("compute").unwrap();
        store.delete(grp_db).unwrap();

        let img_db: Image = store.resolve("centos7").unwrap();
        assert!(img_db.usedby.is_empty());
    }

    #[test]
    fn test_back_links() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);

        let mut img = store.create(image("centos7")).unwrap();
        let mut grp = store.create(pool("compute")).unwrap();
        store.link(&mut grp, &mut img).unwrap();

        let img_db: Image = store.resolve("centos7").unwrap();
        assert_eq!(
            store.back_links(&img_db),
            vec![(Collection::Group, grp.id().clone())]
        );
    }

    #[test]
    fn test_list_names_sorted() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);
        store.create(image("b-image")).unwrap();
        store.create(image("a-image")).unwrap();
        assert_eq!(
            store.list_names(Collection::OsImage).unwrap(),
            vec!["a-image".to_string(), "b-image".to_string()]
        );
    }
}
