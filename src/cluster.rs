//! The cluster singleton.
//!
//! One document named `general` holds cluster-wide settings: node naming,
//! the frontend endpoint nodes boot against, and the DHCP range handed to
//! the external dhcpd collaborator. Every other entity requires the
//! cluster to exist and links itself to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LunaError, Result};
use crate::group::Group;
use crate::ip::{codec, IpVersion};
use crate::network::Network;
use crate::node::Node;
use crate::session::Session;
use crate::store::{Collection, Datastore, EntityId, EntityStore, Links};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: EntityId,
    pub name: String,
    pub nodeprefix: String,
    pub nodedigits: u8,
    pub frontend_address: Option<String>,
    pub frontend_port: u16,
    pub named_include_file: String,
    pub named_zone_dir: String,
    pub dhcp_net: Option<EntityId>,
    pub dhcp_range_start: Option<u128>,
    pub dhcp_range_end: Option<u128>,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(Cluster, Collection::Cluster);

/// Settings accepted at `cluster init` time.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub nodeprefix: String,
    pub nodedigits: u8,
    pub frontend_address: Option<String>,
    pub frontend_port: u16,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            nodeprefix: "node".to_string(),
            nodedigits: 3,
            frontend_address: None,
            frontend_port: 7050,
        }
    }
}

/// DHCP configuration handed to the external templating collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct DhcpConfig {
    pub frontend_address: Option<String>,
    pub range_start: String,
    pub range_end: String,
    pub netmask: String,
    pub network_address: String,
    pub reservations: BTreeMap<String, DhcpReservation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DhcpReservation {
    pub address: String,
    pub mac: String,
}

impl Cluster {
    pub const NAME: &'static str = "general";

    /// Create the singleton. Fails with `AlreadyExists` on re-init.
    pub fn init(store: &EntityStore, options: ClusterOptions) -> Result<Cluster> {
        if let Some(address) = &options.frontend_address {
            if codec::version_of(address).is_none() {
                return Err(LunaError::InvalidAddress(address.clone()));
            }
        }
        if options.nodedigits < 1 {
            return Err(LunaError::Validation(
                "nodedigits must be at least 1".into(),
            ));
        }

        let cluster = store.create(Cluster {
            id: EntityId::generate(),
            name: Cluster::NAME.to_string(),
            nodeprefix: options.nodeprefix,
            nodedigits: options.nodedigits,
            frontend_address: options.frontend_address,
            frontend_port: options.frontend_port,
            named_include_file: "/etc/named.luna.zones".to_string(),
            named_zone_dir: "/var/named".to_string(),
            dhcp_net: None,
            dhcp_range_start: None,
            dhcp_range_end: None,
            links: Links::default(),
            usedby: Links::default(),
        })?;
        log::info!("cluster initialized");
        Ok(cluster)
    }

    pub fn resolve(store: &EntityStore) -> Result<Cluster> {
        store.resolve(Cluster::NAME)
    }

    /// Generate the next free node name from `nodeprefix`/`nodedigits`,
    /// based on every node currently linked to the cluster.
    pub fn next_node_name(&self, store: &EntityStore) -> Result<String> {
        let mut max_num = 0u64;
        for id in self.usedby.ids(Collection::Node) {
            let Some(doc) = store.datastore().get(Collection::Node, &id)? else {
                continue;
            };
            let Some(name) = doc.get("name").and_then(serde_json::Value::as_str) else {
                continue;
            };
            if let Some(number) = name
                .strip_prefix(self.nodeprefix.as_str())
                .and_then(|suffix| suffix.parse::<u64>().ok())
            {
                max_num = max_num.max(number);
            }
        }
        Ok(format!(
            "{}{:0width$}",
            self.nodeprefix,
            max_num + 1,
            width = self.nodedigits as usize
        ))
    }

    /// Point the DHCP range at `[start, end]` on a v4 network, reserving
    /// it in the network's freelist. A previously configured range is
    /// released first.
    pub fn make_dhcp(
        &mut self,
        session: &mut Session,
        network_key: &str,
        start: &str,
        end: &str,
    ) -> Result<()> {
        let net_id = session.resolve_network(network_key)?;
        let (rel_start, rel_end) = {
            let network = session.network(&net_id)?;
            if network.version != IpVersion::V4 {
                return Err(LunaError::Validation(
                    "only IPv4 networks can serve DHCP".into(),
                ));
            }
            (network.offset_of(start)?, network.offset_of(end)?)
        };
        if rel_end < rel_start {
            return Err(LunaError::Validation(format!(
                "DHCP range end {} lies before start {}",
                end, start
            )));
        }

        // drop the old reservation before touching the new one
        if let (Some(old_id), Some(old_start)) = (self.dhcp_net.clone(), self.dhcp_range_start) {
            let old_end = self.dhcp_range_end.filter(|e| *e > old_start);
            match session.update_network(&old_id, |n| n.release(old_start, old_end)) {
                Ok(_) => {}
                Err(LunaError::NotFound { .. }) => {
                    log::warn!("previous DHCP network '{}' no longer exists", old_id);
                }
                Err(err) => return Err(err),
            }
            if old_id != net_id {
                if let Ok(mut old_net) = session.entities().by_id::<Network>(&old_id) {
                    session.entities().unlink(self, &mut old_net)?;
                    session.cache_network(old_net);
                }
            }
        }

        let range_end = if rel_end > rel_start { Some(rel_end) } else { None };
        session.update_network(&net_id, |n| n.reserve(rel_start, range_end))?;

        if self.dhcp_net.as_ref() != Some(&net_id) {
            let mut network: Network = session.entities().by_id(&net_id)?;
            session.entities().link(self, &mut network)?;
            session.cache_network(network);
        }

        self.dhcp_net = Some(net_id);
        self.dhcp_range_start = Some(rel_start);
        self.dhcp_range_end = Some(rel_end);
        session.entities().save(self)?;
        log::info!("DHCP range set to {} - {}", start, end);
        Ok(())
    }

    /// DHCP data for the external dhcpd template: frontend endpoint, range, and one static
    /// reservation per node with a known MAC on the DHCP network.
    pub fn dhcp_config(&self, session: &mut Session) -> Result<DhcpConfig> {
        let net_id = self.dhcp_net.clone().ok_or_else(|| {
            LunaError::Validation("no DHCP network configured".into())
        })?;
        let (start, end) = match (self.dhcp_range_start, self.dhcp_range_end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(LunaError::Validation("no DHCP range configured".into()));
            }
        };
        let network = session.network(&net_id)?.clone();

        let mut reservations = BTreeMap::new();
        let mut groups: BTreeMap<EntityId, Group> = BTreeMap::new();
        for doc in session.entities().datastore().list(Collection::Node)? {
            let node: Node = serde_json::from_value(doc)?;
            let Some(mac) = node.mac.clone() else {
                continue;
            };
            if !groups.contains_key(&node.group) {
                let group: Group = session.entities().by_id(&node.group)?;
                groups.insert(node.group.clone(), group);
            }
            let group = &groups[&node.group];
            // first interface (by name) of the node's group on the DHCP net
            let mut ifaces: Vec<_> = group
                .interfaces
                .iter()
                .filter(|(_, iface)| iface.network.get(IpVersion::V4) == Some(&net_id))
                .collect();
            ifaces.sort_by(|a, b| a.1.name.cmp(&b.1.name));
            for (iface_id, _) in ifaces {
                if let Some(offset) = node
                    .interfaces
                    .get(iface_id)
                    .and_then(|slots| slots.get(IpVersion::V4).copied())
                {
                    reservations.insert(
                        node.name.clone(),
                        DhcpReservation {
                            address: network.address_of(offset)?,
                            mac: mac.clone(),
                        },
                    );
                    break;
                }
            }
        }

        Ok(DhcpConfig {
            frontend_address: self.frontend_address.clone(),
            range_start: network.address_of(start)?,
            range_end: network.address_of(end)?,
            netmask: network.netmask_text()?,
            network_address: network.network_text()?,
            reservations,
        })
    }
}
