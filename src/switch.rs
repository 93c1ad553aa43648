//! Switch entity.
//!
//! Port/MAC discovery over SNMP is an external collaborator; the
//! document persists the switch's management address (one reserved slot
//! on a network) and the SNMP coordinates the collaborator needs.

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::network::Network;
use crate::session::Session;
use crate::store::{Collection, EntityId, Links};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Switch {
    pub id: EntityId,
    pub name: String,
    pub network: Option<EntityId>,
    /// Relative offset of the management address.
    pub ip: Option<u128>,
    pub oid: String,
    pub read_community: String,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(Switch, Collection::Switch);

impl Switch {
    /// Create a switch, reserving its management address on `network`.
    pub fn create(
        session: &mut Session,
        name: &str,
        network_key: &str,
        address: &str,
    ) -> Result<Switch> {
        let store = session.entities();
        let mut cluster = Cluster::resolve(&store)?;

        let net_id = session.resolve_network(network_key)?;
        let rel = session.network(&net_id)?.offset_of(address)?;
        session.update_network(&net_id, |n| {
            n.reserve(rel, None)?;
            Ok(())
        })?;

        let mut switch = match store.create(Switch {
            id: EntityId::generate(),
            name: name.to_string(),
            network: Some(net_id.clone()),
            ip: Some(rel),
            oid: String::new(),
            read_community: "public".to_string(),
            links: Links::default(),
            usedby: Links::default(),
        }) {
            Ok(switch) => switch,
            Err(err) => {
                // hand the reserved slot back before failing
                session.update_network(&net_id, |n| n.release(rel, None))?;
                return Err(err);
            }
        };

        let mut network: Network = store.by_id(&net_id)?;
        store.link(&mut switch, &mut network)?;
        session.cache_network(network);
        store.link(&mut switch, &mut cluster)?;
        log::info!("switch '{}' created at {}", name, address);
        Ok(switch)
    }

    /// Release the management address and delete the switch.
    ///
    /// Fails with `ReferentialIntegrity` while nodes are still attached.
    pub fn remove(mut self, session: &mut Session) -> Result<()> {
        if !self.usedby.is_empty() {
            return Err(LunaError::ReferentialIntegrity {
                collection: Collection::Switch,
                name: self.name.clone(),
                count: self.usedby.count(),
            });
        }
        if let (Some(net_id), Some(rel)) = (self.network.take(), self.ip.take()) {
            match session.update_network(&net_id, |n| n.release(rel, None)) {
                Ok(_) => {}
                Err(LunaError::NotFound { .. }) => {
                    log::warn!("switch '{}' referenced missing network", self.name);
                }
                Err(err) => return Err(err),
            }
        }
        session.entities().delete(self)
    }
}
