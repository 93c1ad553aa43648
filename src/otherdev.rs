//! Entity for other addressable devices (PDUs, consoles, storage
//! controllers) that occupy addresses without being provisioned nodes.
//!
//! One device may hold one address on each of several networks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::network::Network;
use crate::session::Session;
use crate::store::{Collection, EntityId, Links};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherDev {
    pub id: EntityId,
    pub name: String,
    /// Network id -> relative offset held on it.
    pub connections: BTreeMap<EntityId, u128>,
    pub comment: String,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(OtherDev, Collection::OtherDev);

impl OtherDev {
    pub fn create(session: &mut Session, name: &str) -> Result<OtherDev> {
        let store = session.entities();
        let mut cluster = Cluster::resolve(&store)?;
        let mut dev = store.create(OtherDev {
            id: EntityId::generate(),
            name: name.to_string(),
            connections: BTreeMap::new(),
            comment: String::new(),
            links: Links::default(),
            usedby: Links::default(),
        })?;
        store.link(&mut dev, &mut cluster)?;
        Ok(dev)
    }

    /// Reserve an address for this device on a network.
    pub fn add_connection(
        &mut self,
        session: &mut Session,
        network_key: &str,
        address: &str,
    ) -> Result<()> {
        let net_id = session.resolve_network(network_key)?;
        if self.connections.contains_key(&net_id) {
            return Err(LunaError::Validation(format!(
                "device '{}' already holds an address on network '{}'",
                self.name, network_key
            )));
        }
        let rel = session.network(&net_id)?.offset_of(address)?;
        session.update_network(&net_id, |n| {
            n.reserve(rel, None)?;
            Ok(())
        })?;

        self.connections.insert(net_id.clone(), rel);
        let store = session.entities();
        let mut network: Network = store.by_id(&net_id)?;
        store.link(self, &mut network)?;
        session.cache_network(network);
        Ok(())
    }

    /// Release this device's address on a network.
    pub fn del_connection(&mut self, session: &mut Session, network_key: &str) -> Result<()> {
        let net_id = session.resolve_network(network_key)?;
        let Some(rel) = self.connections.remove(&net_id) else {
            return Err(LunaError::Validation(format!(
                "device '{}' holds no address on network '{}'",
                self.name, network_key
            )));
        };
        session.update_network(&net_id, |n| n.release(rel, None))?;

        let store = session.entities();
        let mut network: Network = store.by_id(&net_id)?;
        store.unlink(self, &mut network)?;
        session.cache_network(network);
        Ok(())
    }

    /// The offset held on one network, if any.
    pub fn get_ip(&self, network_id: &EntityId) -> Option<u128> {
        self.connections.get(network_id).copied()
    }

    /// Release every connection and delete the device.
    pub fn remove(mut self, session: &mut Session) -> Result<()> {
        if !self.usedby.is_empty() {
            return Err(LunaError::ReferentialIntegrity {
                collection: Collection::OtherDev,
                name: self.name.clone(),
                count: self.usedby.count(),
            });
        }
        let net_ids: Vec<EntityId> = self.connections.keys().cloned().collect();
        for net_id in net_ids {
            if let Some(rel) = self.connections.remove(&net_id) {
                match session.update_network(&net_id, |n| n.release(rel, None)) {
                    Ok(_) => {
                        let store = session.entities();
                        let mut network: Network = store.by_id(&net_id)?;
                        store.unlink(&mut self, &mut network)?;
                        session.cache_network(network);
                    }
                    Err(LunaError::NotFound { .. }) => {
                        log::warn!("device '{}' referenced missing network", self.name);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        session.entities().delete(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterOptions;
    use crate::store::{EntityStore, MemoryStore};

    #[test]
    fn test_connections_reserve_and_release() {
        let backend = MemoryStore::new();
        let store = EntityStore::new(&backend);
        Cluster::init(&store, ClusterOptions::default()).unwrap();
        let net = Network::create(&store, "mgmt", "10.40.0.0", 16, None, None, None).unwrap();

        let mut session = Session::new(&backend);
        let mut dev = OtherDev::create(&mut session, "pdu01").unwrap();
        dev.add_connection(&mut session, "mgmt", "10.40.0.100").unwrap();
        assert_eq!(dev.get_ip(&net.id), Some(100));

        // one address per network
        assert!(dev
            .add_connection(&mut session, "mgmt", "10.40.0.101")
            .is_err());

        let stored: Network = store.resolve("mgmt").unwrap();
        assert!(!stored.freelist.is_free(100));

        dev.del_connection(&mut session, "mgmt").unwrap();
        let stored: Network = store.resolve("mgmt").unwrap();
        assert!(stored.freelist.is_free(100));
    }
}
