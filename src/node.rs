//! Node entity: one cluster member with its own identity and
//! per-interface address slots.
//!
//! A node's interface map is keyed by its group's interface ids; the
//! cascade keeps it a subset of the group's current interface set.
//! Addresses are allocated implicitly at creation, mutated only through
//! the cascade operations, and released when the node is deleted or its
//! binding removed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::group::{BootParams, Group, GroupInterface, InstallParams, InterfaceId};
use crate::ip::{codec, FamilyPair, IpVersion};
use crate::session::{CascadeReport, Session};
use crate::store::{Collection, Datastore, EntityId, EntityStore, Links};
use crate::switch::Switch;

const MAC_PATTERN: &str = "^([a-fA-F0-9]{2}:){5}[a-fA-F0-9]{2}$";
const STATUS_PATTERN: &str = r"^[ a-zA-Z0-9.\-_]+$";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub step: String,
    pub time: DateTime<Utc>,
}

/// Boot-time behavior switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Boot from local disk instead of the provisioned image.
    pub localboot: bool,
    /// Configure the BMC during install.
    pub setupbmc: bool,
    /// Boot into the installer environment and stop.
    pub service: bool,
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags {
            localboot: false,
            setupbmc: true,
            service: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: EntityId,
    pub name: String,
    pub group: EntityId,
    pub interfaces: BTreeMap<InterfaceId, FamilyPair<u128>>,
    pub mac: Option<String>,
    pub switch: Option<EntityId>,
    pub port: Option<String>,
    #[serde(flatten)]
    pub flags: NodeFlags,
    pub status: Option<NodeStatus>,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(Node, Collection::Node);

/// Boot data for one node, extending the group's parameters.
#[derive(Debug, Clone, Serialize)]
pub struct NodeBootParams {
    #[serde(flatten)]
    pub group: BootParams,
    pub name: String,
    pub hostname: String,
    pub service: bool,
    pub localboot: bool,
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub bootproto: String,
}

/// Install data for one node, extending the group's parameters.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInstallParams {
    #[serde(flatten)]
    pub group: InstallParams,
    pub name: String,
    pub hostname: String,
    pub setupbmc: bool,
    pub mac: Option<String>,
    /// Interface name -> assigned addresses, textual form.
    pub addresses: BTreeMap<String, FamilyPair<String>>,
}

impl Node {
    /// Create a node in a group, allocating an address for every bound
    /// family of every group interface.
    ///
    /// A failure on one family rolls back only this node's already
    /// acquired slots for the same interface; other interfaces keep
    /// what they got (the cascade is not atomic).
    pub fn create(
        session: &mut Session,
        name: Option<&str>,
        group_key: &str,
        flags: NodeFlags,
    ) -> Result<Node> {
        let store = session.entities();
        let mut cluster = Cluster::resolve(&store)?;
        let mut group: Group = store.resolve(group_key)?;

        let name = match name {
            Some(n) => n.to_string(),
            None => cluster.next_node_name(&store)?,
        };

        let mut interfaces = BTreeMap::new();
        for iface_id in group.interfaces.keys() {
            interfaces.insert(iface_id.clone(), FamilyPair::default());
        }

        let mut node = store.create(Node {
            id: EntityId::generate(),
            name,
            group: group.id.clone(),
            interfaces,
            mac: None,
            switch: None,
            port: None,
            flags,
            status: None,
            links: Links::default(),
            usedby: Links::default(),
        })?;

        for (iface_id, iface) in sorted_ifaces(&group) {
            let versions = iface.network.versions();
            if versions.is_empty() {
                continue;
            }
            if let Err(err) =
                node.assign_interface(session, &group, iface_id, &versions, None)
            {
                log::error!(
                    "node '{}': could not assign addresses on '{}': {}",
                    node.name,
                    iface.name,
                    err
                );
            }
        }

        let store = session.entities();
        store.link(&mut node, &mut group)?;
        store.link(&mut node, &mut cluster)?;
        log::info!("node '{}' created in group '{}'", node.name, group.name);
        Ok(node)
    }

    /// Allocate addresses on one interface for the given families.
    ///
    /// Either every requested family gets its offset or none does: a
    /// failure releases the offsets acquired by this call (node-local
    /// rollback) and propagates the error.
    pub fn assign_interface(
        &mut self,
        session: &mut Session,
        group: &Group,
        iface_id: &InterfaceId,
        versions: &[IpVersion],
        specific: Option<(IpVersion, u128)>,
    ) -> Result<Vec<(IpVersion, u128)>> {
        let mut acquired: Vec<(IpVersion, u128, EntityId)> = Vec::new();

        let rollback = |session: &mut Session, acquired: &[(IpVersion, u128, EntityId)]| {
            for (_, offset, net_id) in acquired {
                if let Err(err) = session.update_network(net_id, |n| n.release(*offset, None)) {
                    log::error!("rollback failed for offset {}: {}", offset, err);
                }
            }
        };

        for &version in versions {
            let Some(net_id) = group.network_for(iface_id, version) else {
                continue;
            };
            if self
                .interfaces
                .get(iface_id)
                .and_then(|slots| slots.get(version))
                .is_some()
            {
                rollback(session, &acquired);
                return Err(LunaError::Validation(format!(
                    "node '{}' already holds an IPv{} address on this interface",
                    self.name, version
                )));
            }

            let result = match specific {
                Some((v, offset)) if v == version => {
                    session.update_network(net_id, |n| n.reserve(offset, None))
                }
                _ => session.update_network(net_id, |n| n.reserve_next()),
            };
            match result {
                Ok(offset) => acquired.push((version, offset, net_id.clone())),
                Err(err) => {
                    rollback(session, &acquired);
                    return Err(err);
                }
            }
        }

        for (version, offset, _) in &acquired {
            self.interfaces
                .entry(iface_id.clone())
                .or_default()
                .set(*version, Some(*offset));
        }
        session.entities().save(self)?;
        Ok(acquired.into_iter().map(|(v, o, _)| (v, o)).collect())
    }

    /// Release an interface's address for one family, or for both when
    /// no family is given. Returns whether anything was released.
    pub fn del_ip(
        &mut self,
        session: &mut Session,
        iface_name: &str,
        version: Option<IpVersion>,
    ) -> Result<bool> {
        let group: Group = session.entities().by_id(&self.group)?;
        let iface_id = group.iface_id(iface_name)?;
        let versions = match version {
            Some(v) => vec![v],
            None => vec![IpVersion::V4, IpVersion::V6],
        };

        let mut released_any = false;
        for v in versions {
            let offset = self
                .interfaces
                .get_mut(&iface_id)
                .and_then(|slots| slots.set(v, None));
            let Some(offset) = offset else {
                continue;
            };
            match group.network_for(&iface_id, v) {
                Some(net_id) => {
                    session.update_network(net_id, |n| n.release(offset, None))?;
                }
                None => log::warn!(
                    "node '{}': offset {} recorded on '{}' without a bound IPv{} network",
                    self.name,
                    offset,
                    iface_name,
                    v
                ),
            }
            released_any = true;
        }
        if released_any {
            session.entities().save(self)?;
        }
        Ok(released_any)
    }

    /// Release every address this node holds.
    pub fn release_addresses(&mut self, session: &mut Session) -> Result<()> {
        let group: Group = session.entities().by_id(&self.group)?;
        let iface_ids: Vec<InterfaceId> = self.interfaces.keys().cloned().collect();
        for iface_id in iface_ids {
            for version in [IpVersion::V4, IpVersion::V6] {
                let offset = self
                    .interfaces
                    .get_mut(&iface_id)
                    .and_then(|slots| slots.set(version, None));
                let Some(offset) = offset else {
                    continue;
                };
                match group.network_for(&iface_id, version) {
                    Some(net_id) => {
                        session.update_network(net_id, |n| n.release(offset, None))?;
                    }
                    None => log::warn!(
                        "node '{}': offset {} recorded without a bound IPv{} network",
                        self.name,
                        offset,
                        version
                    ),
                }
            }
        }
        session.entities().save(self)
    }

    /// Move a node to another group.
    ///
    /// All current addresses are released, the group link moved and
    /// placeholders created; restoration then runs in two passes:
    /// first by identical interface name bound to the same network,
    /// then by the same network on any interface, both in lexical
    /// interface-name order. Unmatched old addresses stay released.
    pub fn change_group(
        &mut self,
        session: &mut Session,
        new_group_key: &str,
    ) -> Result<CascadeReport> {
        let store = session.entities();
        let mut old_group: Group = store.by_id(&self.group)?;
        let mut new_group: Group = store.resolve(new_group_key)?;
        if new_group.id == old_group.id {
            return Err(LunaError::Validation(format!(
                "node '{}' is already in group '{}'",
                self.name, new_group.name
            )));
        }

        struct OldAddr {
            iface_name: String,
            version: IpVersion,
            network: EntityId,
            offset: u128,
        }

        let mut old_addrs: Vec<OldAddr> = Vec::new();
        for (iface_id, iface) in sorted_ifaces(&old_group) {
            for version in [IpVersion::V4, IpVersion::V6] {
                let net = iface.network.get(version);
                let offset = self
                    .interfaces
                    .get(iface_id)
                    .and_then(|slots| slots.get(version));
                if let (Some(net), Some(offset)) = (net, offset) {
                    old_addrs.push(OldAddr {
                        iface_name: iface.name.clone(),
                        version,
                        network: net.clone(),
                        offset: *offset,
                    });
                }
            }
        }

        self.release_addresses(session)?;
        self.interfaces.clear();

        let store = session.entities();
        store.unlink(self, &mut old_group)?;
        self.group = new_group.id.clone();
        store.link(self, &mut new_group)?;

        for iface_id in new_group.interfaces.keys() {
            self.interfaces.insert(iface_id.clone(), FamilyPair::default());
        }
        store.save(self)?;

        let new_ifaces = sorted_ifaces(&new_group);
        let mut report = CascadeReport::default();
        let mut restored = vec![false; old_addrs.len()];

        // pass 1: same interface name, same network
        for (idx, old) in old_addrs.iter().enumerate() {
            let candidate = new_ifaces.iter().find(|(_, iface)| {
                iface.name == old.iface_name
                    && iface.network.get(old.version) == Some(&old.network)
            });
            if let Some((iface_id, iface)) = candidate {
                if self.slot_empty(iface_id, old.version) {
                    match self.assign_interface(
                        session,
                        &new_group,
                        iface_id,
                        &[old.version],
                        Some((old.version, old.offset)),
                    ) {
                        Ok(_) => {
                            restored[idx] = true;
                            report.success(
                                iface.name.clone(),
                                format!("restored IPv{} offset {}", old.version, old.offset),
                            );
                        }
                        Err(err) => report.failure(iface.name.clone(), err.to_string()),
                    }
                }
            }
        }

        // pass 2: same network on any interface
        for (idx, old) in old_addrs.iter().enumerate() {
            if restored[idx] {
                continue;
            }
            let candidate = new_ifaces.iter().find(|(iface_id, iface)| {
                iface.network.get(old.version) == Some(&old.network)
                    && self.slot_empty(iface_id, old.version)
            });
            match candidate {
                Some((iface_id, iface)) => {
                    match self.assign_interface(
                        session,
                        &new_group,
                        iface_id,
                        &[old.version],
                        Some((old.version, old.offset)),
                    ) {
                        Ok(_) => {
                            restored[idx] = true;
                            report.success(
                                iface.name.clone(),
                                format!(
                                    "restored IPv{} offset {} from '{}'",
                                    old.version, old.offset, old.iface_name
                                ),
                            );
                        }
                        Err(err) => report.failure(iface.name.clone(), err.to_string()),
                    }
                }
                None => {
                    report.success(
                        old.iface_name.clone(),
                        format!(
                            "discarded IPv{} offset {} (network not bound in new group)",
                            old.version, old.offset
                        ),
                    );
                }
            }
        }

        // fresh allocations for everything still unassigned
        for (iface_id, iface) in &new_ifaces {
            let missing: Vec<IpVersion> = iface
                .network
                .versions()
                .into_iter()
                .filter(|v| self.slot_empty(iface_id, *v))
                .collect();
            if missing.is_empty() {
                continue;
            }
            match self.assign_interface(session, &new_group, iface_id, &missing, None) {
                Ok(assigned) => {
                    for (v, offset) in assigned {
                        report.success(
                            iface.name.clone(),
                            format!("assigned IPv{} offset {}", v, offset),
                        );
                    }
                }
                Err(err) => report.failure(iface.name.clone(), err.to_string()),
            }
        }

        log::info!(
            "node '{}' moved from group '{}' to '{}'",
            self.name,
            old_group.name,
            new_group.name
        );
        Ok(report)
    }

    fn slot_empty(&self, iface_id: &InterfaceId, version: IpVersion) -> bool {
        self.interfaces
            .get(iface_id)
            .and_then(|slots| slots.get(version))
            .is_none()
    }

    /// Move one interface's address to a caller-chosen one on the same
    /// network. The new address is reserved before the old one is
    /// released, so a failed move changes nothing.
    pub fn set_ip(&mut self, session: &mut Session, iface_name: &str, address: &str) -> Result<()> {
        let version = codec::version_of(address)
            .ok_or_else(|| LunaError::InvalidAddress(address.to_string()))?;
        let group: Group = session.entities().by_id(&self.group)?;
        let iface_id = group.iface_id(iface_name)?;
        let Some(net_id) = group.network_for(&iface_id, version) else {
            return Err(LunaError::Validation(format!(
                "interface '{}' has no IPv{} network",
                iface_name, version
            )));
        };

        let rel = session.network(net_id)?.offset_of(address)?;
        let old = self
            .interfaces
            .get(&iface_id)
            .and_then(|slots| slots.get(version))
            .copied();
        if old == Some(rel) {
            return Ok(());
        }

        session.update_network(net_id, |n| n.reserve(rel, None))?;
        if let Some(old) = old {
            session.update_network(net_id, |n| n.release(old, None))?;
        }
        self.interfaces
            .entry(iface_id)
            .or_default()
            .set(version, Some(rel));
        session.entities().save(self)
    }

    /// Textual address of one interface. Dual-stack interfaces need an
    /// explicit family.
    pub fn get_ip(
        &self,
        session: &mut Session,
        iface_name: &str,
        version: Option<IpVersion>,
    ) -> Result<String> {
        let group: Group = session.entities().by_id(&self.group)?;
        let iface_id = group.iface_id(iface_name)?;
        let slots = self.interfaces.get(&iface_id).ok_or_else(|| {
            LunaError::Validation(format!(
                "node '{}' has no slots for interface '{}'",
                self.name, iface_name
            ))
        })?;
        let version = match version {
            Some(v) => v,
            None => match slots.versions().as_slice() {
                [v] => *v,
                [] => {
                    return Err(LunaError::Validation(format!(
                        "interface '{}' has no address",
                        iface_name
                    )));
                }
                _ => {
                    return Err(LunaError::AmbiguousVersion {
                        interface: iface_name.to_string(),
                    });
                }
            },
        };
        let offset = *slots.get(version).ok_or_else(|| {
            LunaError::Validation(format!(
                "interface '{}' has no IPv{} address",
                iface_name, version
            ))
        })?;
        let net_id = group.network_for(&iface_id, version).ok_or_else(|| {
            LunaError::Validation(format!(
                "interface '{}' has no IPv{} network",
                iface_name, version
            ))
        })?;
        session.network(net_id)?.address_of(offset)
    }

    /// Assign or clear the MAC address. MACs are unique across nodes.
    pub fn set_mac(&mut self, store: &EntityStore, mac: Option<&str>) -> Result<()> {
        match mac {
            None => {
                self.mac = None;
            }
            Some(mac) => {
                let pattern = Regex::new(MAC_PATTERN)
                    .map_err(|e| LunaError::Validation(e.to_string()))?;
                if !pattern.is_match(mac) {
                    return Err(LunaError::Validation(format!(
                        "invalid MAC address '{}'",
                        mac
                    )));
                }
                let mac = mac.to_lowercase();
                for doc in store.datastore().list(Collection::Node)? {
                    let other_mac = doc.get("mac").and_then(serde_json::Value::as_str);
                    let other_name = doc.get("name").and_then(serde_json::Value::as_str);
                    if other_mac == Some(mac.as_str()) && other_name != Some(self.name.as_str()) {
                        return Err(LunaError::Validation(format!(
                            "MAC '{}' is already assigned to node '{}'",
                            mac,
                            other_name.unwrap_or("?")
                        )));
                    }
                }
                self.mac = Some(mac);
            }
        }
        store.save(self)
    }

    /// Bind the node to a switch port (or detach it with `None`).
    pub fn set_switch(
        &mut self,
        store: &EntityStore,
        switch: Option<&str>,
        port: Option<&str>,
    ) -> Result<()> {
        if let Some(old_id) = self.switch.take() {
            let mut old: Switch = store.by_id(&old_id)?;
            store.unlink(self, &mut old)?;
        }
        match switch {
            Some(key) => {
                let mut switch_obj: Switch = store.resolve(key)?;
                self.switch = Some(switch_obj.id.clone());
                self.port = port.map(str::to_string);
                store.link(self, &mut switch_obj)
            }
            None => {
                self.port = None;
                store.save(self)
            }
        }
    }

    /// Record the current install step with a UTC timestamp.
    pub fn update_status(&mut self, store: &EntityStore, step: &str) -> Result<()> {
        let pattern =
            Regex::new(STATUS_PATTERN).map_err(|e| LunaError::Validation(e.to_string()))?;
        if !pattern.is_match(step) {
            return Err(LunaError::Validation(format!(
                "status step '{}' contains invalid characters",
                step
            )));
        }
        self.status = Some(NodeStatus {
            step: step.to_string(),
            time: Utc::now(),
        });
        store.save(self)
    }

    /// The last recorded step and its age in seconds.
    pub fn get_status(&self) -> Option<(String, i64)> {
        self.status
            .as_ref()
            .map(|s| (s.step.clone(), (Utc::now() - s.time).num_seconds()))
    }

    /// Boot data for this node.
    pub fn boot_params(&self, session: &mut Session) -> Result<NodeBootParams> {
        let group: Group = session.entities().by_id(&self.group)?;
        let group_params = group.boot_params(session)?;

        let ip = match &group_params.boot_interface {
            Some(iface) => self
                .get_ip(session, iface, Some(IpVersion::V4))
                .ok()
                .or_else(|| self.get_ip(session, iface, Some(IpVersion::V6)).ok()),
            None => None,
        };
        let hostname = match &group_params.domain {
            Some(domain) => format!("{}.{}", self.name, domain),
            None => self.name.clone(),
        };
        let bootproto = if ip.is_some() && self.mac.is_some() && group_params.net_prefix.is_some()
        {
            "static"
        } else {
            "dhcp"
        };

        Ok(NodeBootParams {
            group: group_params,
            name: self.name.clone(),
            hostname,
            service: self.flags.service,
            localboot: self.flags.localboot,
            mac: self.mac.clone(),
            ip,
            bootproto: bootproto.to_string(),
        })
    }

    /// Install data for this node.
    pub fn install_params(&self, session: &mut Session) -> Result<NodeInstallParams> {
        let group: Group = session.entities().by_id(&self.group)?;
        let group_params = group.install_params(session)?;

        let mut addresses = BTreeMap::new();
        for (iface_id, iface) in &group.interfaces {
            let mut pair = FamilyPair::default();
            for version in [IpVersion::V4, IpVersion::V6] {
                if let Some(offset) = self
                    .interfaces
                    .get(iface_id)
                    .and_then(|slots| slots.get(version))
                {
                    if let Some(net_id) = iface.network.get(version) {
                        let text = session.network(net_id)?.address_of(*offset)?;
                        pair.set(version, Some(text));
                    }
                }
            }
            if !pair.is_empty() {
                addresses.insert(iface.name.clone(), pair);
            }
        }

        let hostname = match &group_params.domain {
            Some(domain) => format!("{}.{}", self.name, domain),
            None => self.name.clone(),
        };

        Ok(NodeInstallParams {
            group: group_params,
            name: self.name.clone(),
            hostname,
            setupbmc: self.flags.setupbmc,
            mac: self.mac.clone(),
            addresses,
        })
    }

    /// Release every resource and delete the node document.
    pub fn remove(mut self, session: &mut Session) -> Result<()> {
        if !self.usedby.is_empty() {
            return Err(LunaError::ReferentialIntegrity {
                collection: Collection::Node,
                name: self.name.clone(),
                count: self.usedby.count(),
            });
        }
        self.release_addresses(session)?;
        session.entities().delete(self)
    }
}

/// A group's interfaces in lexical name order, the order every cascade
/// walks them in.
fn sorted_ifaces(group: &Group) -> Vec<(&InterfaceId, &GroupInterface)> {
    let mut ifaces: Vec<_> = group.interfaces.iter().collect();
    ifaces.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    ifaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterOptions;
    use crate::network::Network;
    use crate::osimage::OsImage;
    use crate::store::MemoryStore;

    fn setup(backend: &MemoryStore) -> EntityStore<'_> {
        let store = EntityStore::new(backend);
        Cluster::init(&store, ClusterOptions::default()).unwrap();
        OsImage::create(&store, "centos7", "/opt/osimages/centos7").unwrap();
        Group::create(&store, "compute", "centos7", None, &["eth0"]).unwrap();
        store
    }

    #[test]
    fn test_create_generates_names() {
        let backend = MemoryStore::new();
        let store = setup(&backend);
        let mut session = Session::new(&backend);

        let n1 = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
        let n2 = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
        assert_eq!(n1.name, "node001");
        assert_eq!(n2.name, "node002");

        let group: Group = store.resolve("compute").unwrap();
        assert_eq!(group.usedby.ids(Collection::Node).len(), 2);
    }

    #[test]
    fn test_create_in_missing_group() {
        let backend = MemoryStore::new();
        let _store = setup(&backend);
        let mut session = Session::new(&backend);
        assert!(matches!(
            Node::create(&mut session, None, "missing", NodeFlags::default()),
            Err(LunaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_set_mac_validates_and_deduplicates() {
        let backend = MemoryStore::new();
        let store = setup(&backend);
        let mut session = Session::new(&backend);

        let mut n1 = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
        let mut n2 = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();

        assert!(n1.set_mac(&store, Some("not-a-mac")).is_err());
        n1.set_mac(&store, Some("AA:BB:CC:00:11:22")).unwrap();
        assert_eq!(n1.mac.as_deref(), Some("aa:bb:cc:00:11:22"));

        assert!(matches!(
            n2.set_mac(&store, Some("aa:bb:cc:00:11:22")),
            Err(LunaError::Validation(_))
        ));

        n1.set_mac(&store, None).unwrap();
        n2.set_mac(&store, Some("aa:bb:cc:00:11:22")).unwrap();
    }

    #[test]
    fn test_update_status() {
        let backend = MemoryStore::new();
        let store = setup(&backend);
        let mut session = Session::new(&backend);

        let mut node = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
        assert!(node.get_status().is_none());
        assert!(node.update_status(&store, "bad step!").is_err());

        node.update_status(&store, "install.download").unwrap();
        let (step, age) = node.get_status().unwrap();
        assert_eq!(step, "install.download");
        assert!(age >= 0);
    }

    #[test]
    fn test_remove_releases_addresses() {
        let backend = MemoryStore::new();
        let store = setup(&backend);
        let mut session = Session::new(&backend);

        let mut group: Group = store.resolve("compute").unwrap();
        Network::create(&store, "net1", "10.50.0.0", 16, None, None, None).unwrap();
        group.bind_network(&mut session, "eth0", "net1").unwrap();

        let node = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
        let net: Network = store.resolve("net1").unwrap();
        assert!(!net.freelist.is_free(1));

        node.remove(&mut session).unwrap();
        let net: Network = store.resolve("net1").unwrap();
        assert!(net.freelist.is_free(1));
        assert!(store.resolve::<Node>("node001").is_err());
    }
}
