//! Unit-of-work for cascade operations.
//!
//! Cascades (bind/unbind/change-group) touch one Group, a handful of
//! Networks and every member Node. A [`Session`] caches the Network
//! documents for the duration of one cascade so the per-node loop does
//! not re-read them, while writing every mutation straight through to
//! the datastore: each change stays a single whole-document
//! read-modify-write, and a crash mid-cascade leaves the same partial
//! state the uncached implementation would.

use std::collections::HashMap;

use crate::error::Result;
use crate::network::Network;
use crate::store::{Datastore, EntityId, EntityStore};

pub struct Session<'a> {
    store: &'a dyn Datastore,
    networks: HashMap<EntityId, Network>,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Session {
            store,
            networks: HashMap::new(),
        }
    }

    /// The generic entity operations, sharing this session's datastore.
    pub fn entities(&self) -> EntityStore<'a> {
        EntityStore::new(self.store)
    }

    /// Fetch a network through the cache.
    pub fn network(&mut self, id: &EntityId) -> Result<&Network> {
        if !self.networks.contains_key(id) {
            let network: Network = self.entities().by_id(id)?;
            self.networks.insert(id.clone(), network);
        }
        Ok(&self.networks[id])
    }

    /// Resolve a network by name or id and cache it, returning its id.
    pub fn resolve_network(&mut self, key: &str) -> Result<EntityId> {
        let network: Network = self.entities().resolve(key)?;
        let id = network.id.clone();
        self.networks.insert(id.clone(), network);
        Ok(id)
    }

    /// Mutate a cached network and write it through on success.
    ///
    /// The closure must leave the network untouched when it fails; the
    /// freelist operations all satisfy that.
    pub fn update_network<R>(
        &mut self,
        id: &EntityId,
        f: impl FnOnce(&mut Network) -> Result<R>,
    ) -> Result<R> {
        if !self.networks.contains_key(id) {
            let network: Network = self.entities().by_id(id)?;
            self.networks.insert(id.clone(), network);
        }
        let store = EntityStore::new(self.store);
        let Some(network) = self.networks.get_mut(id) else {
            return Err(crate::error::LunaError::NotFound {
                collection: crate::store::Collection::Network,
                key: id.to_string(),
            });
        };
        let result = f(network)?;
        store.save(network)?;
        Ok(result)
    }

    /// Replace the cached copy after the caller mutated and saved a
    /// network through the entity layer (link/unlink cascades).
    pub fn cache_network(&mut self, network: Network) {
        self.networks.insert(network.id.clone(), network);
    }
}

/// Per-subject outcome of one cascade step.
#[derive(Debug)]
pub struct Outcome {
    pub subject: String,
    pub detail: String,
    pub ok: bool,
}

/// Accumulated results of a cascade.
///
/// Cascades do not roll back completed members; the report makes the
/// partial state visible to the caller instead.
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub outcomes: Vec<Outcome>,
}

impl CascadeReport {
    pub fn success(&mut self, subject: impl Into<String>, detail: impl Into<String>) {
        self.outcomes.push(Outcome {
            subject: subject.into(),
            detail: detail.into(),
            ok: true,
        });
    }

    pub fn failure(&mut self, subject: impl Into<String>, detail: impl Into<String>) {
        let outcome = Outcome {
            subject: subject.into(),
            detail: detail.into(),
            ok: false,
        };
        log::error!("{}: {}", outcome.subject, outcome.detail);
        self.outcomes.push(outcome);
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }
}
