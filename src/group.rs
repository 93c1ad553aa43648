//! Group entity: a named class of nodes sharing an OS image, scripts and
//! interface/network topology.
//!
//! Interfaces are keyed by opaque generated ids, so renaming an interface
//! never touches the addresses stored against it on the member nodes.
//! Binding a network to an interface cascades an allocation to every
//! member node; the cascade is deliberately not atomic and reports
//! per-node outcomes instead (see the session module).

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bmcsetup::BmcSetup;
use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::ip::{FamilyPair, IpVersion};
use crate::network::Network;
use crate::node::Node;
use crate::osimage::OsImage;
use crate::session::{CascadeReport, Session};
use crate::store::{Collection, EntityId, EntityStore, Links};

/// Opaque interface identifier, generated once and stable across
/// renames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(String);

impl InterfaceId {
    pub fn generate() -> Self {
        InterfaceId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInterface {
    pub name: String,
    /// Independent per-family network bindings.
    #[serde(default)]
    pub network: FamilyPair<EntityId>,
    /// Free-text interface configuration handed to install templates.
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: EntityId,
    pub name: String,
    pub interfaces: BTreeMap<InterfaceId, GroupInterface>,
    pub osimage: EntityId,
    pub bmcsetup: Option<EntityId>,
    pub prescript: String,
    pub partscript: String,
    pub postscript: String,
    pub boot_if: Option<String>,
    pub torrent_if: Option<String>,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(Group, Collection::Group);

/// Boot data for the external boot-script collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct BootParams {
    pub kernel_file: String,
    pub initrd_file: String,
    pub kernel_opts: String,
    pub boot_interface: Option<String>,
    pub net_prefix: Option<u8>,
    pub domain: Option<String>,
}

/// Install data for the external install-script collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct InstallParams {
    pub prescript: String,
    pub partscript: String,
    pub postscript: String,
    pub boot_interface: Option<String>,
    pub torrent_interface: Option<String>,
    pub domain: Option<String>,
    pub interfaces: BTreeMap<String, InterfaceInstall>,
    pub kernver: String,
    pub kernel_opts: String,
    pub tarball: String,
    pub torrent: String,
    pub bmcsetup: Option<BmcInstall>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInstall {
    pub params: String,
    pub prefix4: Option<u8>,
    pub prefix6: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BmcInstall {
    pub user: String,
    pub password: String,
    pub userid: u16,
    pub mgmtchannel: u16,
    pub netchannel: u16,
}

impl Group {
    /// Create and persist a group, linking it to the cluster, its OS
    /// image and (optionally) a BMC profile.
    pub fn create(
        store: &EntityStore,
        name: &str,
        osimage: &str,
        bmcsetup: Option<&str>,
        interfaces: &[&str],
    ) -> Result<Group> {
        let mut cluster = Cluster::resolve(store)?;
        let mut osimage_obj: OsImage = store.resolve(osimage)?;
        let mut bmc_obj: Option<BmcSetup> = match bmcsetup {
            Some(key) => Some(store.resolve(key)?),
            None => None,
        };

        let mut iface_map = BTreeMap::new();
        let mut seen = HashSet::new();
        for iface in interfaces {
            if !seen.insert(*iface) {
                return Err(LunaError::Validation(format!(
                    "interface '{}' listed twice",
                    iface
                )));
            }
            iface_map.insert(
                InterfaceId::generate(),
                GroupInterface {
                    name: iface.to_string(),
                    network: FamilyPair::default(),
                    params: String::new(),
                },
            );
        }

        let mut group = store.create(Group {
            id: EntityId::generate(),
            name: name.to_string(),
            interfaces: iface_map,
            osimage: osimage_obj.id.clone(),
            bmcsetup: bmc_obj.as_ref().map(|b| b.id.clone()),
            prescript: String::new(),
            partscript: "mount -t tmpfs tmpfs /sysroot".to_string(),
            postscript: concat!(
                "cat << EOF >> /sysroot/etc/fstab\n",
                "tmpfs   /       tmpfs    defaults        0 0\n",
                "EOF"
            )
            .to_string(),
            boot_if: None,
            torrent_if: None,
            links: Links::default(),
            usedby: Links::default(),
        })?;

        store.link(&mut group, &mut cluster)?;
        store.link(&mut group, &mut osimage_obj)?;
        if let Some(bmc) = bmc_obj.as_mut() {
            store.link(&mut group, bmc)?;
        }
        log::info!("group '{}' created", name);
        Ok(group)
    }

    /// Interface name -> id, the inverse of the interface map.
    pub fn list_ifs(&self) -> BTreeMap<String, InterfaceId> {
        self.interfaces
            .iter()
            .map(|(id, iface)| (iface.name.clone(), id.clone()))
            .collect()
    }

    pub fn iface_id(&self, name: &str) -> Result<InterfaceId> {
        self.interfaces
            .iter()
            .find(|(_, iface)| iface.name == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| {
                LunaError::Validation(format!(
                    "group '{}' has no interface '{}'",
                    self.name, name
                ))
            })
    }

    /// Member nodes, sorted by name for deterministic cascades.
    pub fn member_nodes(&self, session: &mut Session) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for id in self.usedby.ids(Collection::Node) {
            nodes.push(session.entities().by_id::<Node>(&id)?);
        }
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    /// Add an interface with both family slots unbound, creating a
    /// matching placeholder on every member node.
    pub fn add_interface(&mut self, session: &mut Session, name: &str) -> Result<()> {
        if self.iface_id(name).is_ok() {
            return Err(LunaError::Validation(format!(
                "interface '{}' already exists",
                name
            )));
        }
        let iface_id = InterfaceId::generate();
        self.interfaces.insert(
            iface_id.clone(),
            GroupInterface {
                name: name.to_string(),
                network: FamilyPair::default(),
                params: String::new(),
            },
        );
        session.entities().save(self)?;

        for mut node in self.member_nodes(session)? {
            node.interfaces.insert(iface_id.clone(), FamilyPair::default());
            session.entities().save(&node)?;
        }
        Ok(())
    }

    /// Rename an interface. The id and every stored address survive.
    pub fn rename_interface(
        &mut self,
        store: &EntityStore,
        name: &str,
        new_name: &str,
    ) -> Result<()> {
        if self.iface_id(new_name).is_ok() {
            return Err(LunaError::Validation(format!(
                "interface '{}' already exists",
                new_name
            )));
        }
        let iface_id = self.iface_id(name)?;
        if let Some(iface) = self.interfaces.get_mut(&iface_id) {
            iface.name = new_name.to_string();
        }
        store.save(self)
    }

    pub fn set_if_params(&mut self, store: &EntityStore, name: &str, params: &str) -> Result<()> {
        let iface_id = self.iface_id(name)?;
        if let Some(iface) = self.interfaces.get_mut(&iface_id) {
            iface.params = params.trim().to_string();
        }
        store.save(self)
    }

    /// Drop an interface, releasing every member node's addresses on it
    /// first.
    pub fn remove_interface(&mut self, session: &mut Session, name: &str) -> Result<()> {
        let iface_id = self.iface_id(name)?;
        for version in [IpVersion::V4, IpVersion::V6] {
            if self.interfaces[&iface_id].network.get(version).is_some() {
                self.unbind_network(session, name, Some(version))?;
            }
        }
        for mut node in self.member_nodes(session)? {
            node.interfaces.remove(&iface_id);
            session.entities().save(&node)?;
        }
        self.interfaces.remove(&iface_id);
        session.entities().save(self)
    }

    /// Bind a network to one family slot of an interface, then allocate
    /// an address on it for every member node in name order.
    ///
    /// Per-node failures are reported, not rolled back: nodes already
    /// provisioned keep their addresses.
    pub fn bind_network(
        &mut self,
        session: &mut Session,
        iface_name: &str,
        network_key: &str,
    ) -> Result<CascadeReport> {
        let iface_id = self.iface_id(iface_name)?;
        let net_id = session.resolve_network(network_key)?;
        let version = session.network(&net_id)?.version;

        if self.interfaces[&iface_id].network.get(version).is_some() {
            return Err(LunaError::Validation(format!(
                "interface '{}' already has an IPv{} network",
                iface_name, version
            )));
        }
        if let Some(iface) = self.interfaces.get_mut(&iface_id) {
            iface.network.set(version, Some(net_id.clone()));
        }

        let mut network: Network = session.entities().by_id(&net_id)?;
        session.entities().link(self, &mut network)?;
        session.cache_network(network);

        let mut report = CascadeReport::default();
        let group_snapshot = self.clone();
        for mut node in self.member_nodes(session)? {
            match node.assign_interface(session, &group_snapshot, &iface_id, &[version], None) {
                Ok(assigned) => {
                    for (v, offset) in assigned {
                        report.success(
                            node.name.clone(),
                            format!("assigned IPv{} offset {} on '{}'", v, offset, iface_name),
                        );
                    }
                }
                Err(err) => report.failure(node.name.clone(), err.to_string()),
            }
        }
        log::info!(
            "bound network '{}' to {}.{} ({} nodes)",
            network_key,
            self.name,
            iface_name,
            report.outcomes.len()
        );
        Ok(report)
    }

    /// Release every member node's address for one family slot, then
    /// unlink the network and clear the binding.
    pub fn unbind_network(
        &mut self,
        session: &mut Session,
        iface_name: &str,
        version: Option<IpVersion>,
    ) -> Result<CascadeReport> {
        let iface_id = self.iface_id(iface_name)?;
        let bound = self.interfaces[&iface_id].network.versions();
        let version = match version {
            Some(v) => {
                if !bound.contains(&v) {
                    return Err(LunaError::Validation(format!(
                        "interface '{}' has no IPv{} network",
                        iface_name, v
                    )));
                }
                v
            }
            None => match bound.as_slice() {
                [v] => *v,
                [] => {
                    return Err(LunaError::Validation(format!(
                        "interface '{}' has no network bound",
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
        let Some(net_id) = self.interfaces[&iface_id].network.get(version).cloned() else {
            return Err(LunaError::Validation(format!(
                "interface '{}' has no IPv{} network",
                iface_name, version
            )));
        };

        let mut report = CascadeReport::default();
        for mut node in self.member_nodes(session)? {
            let released = match node.interfaces.get_mut(&iface_id) {
                Some(slots) => slots.set(version, None),
                None => None,
            };
            if let Some(offset) = released {
                if let Err(err) = session.update_network(&net_id, |n| n.release(offset, None)) {
                    report.failure(node.name.clone(), err.to_string());
                    continue;
                }
                session.entities().save(&node)?;
                report.success(
                    node.name.clone(),
                    format!("released IPv{} offset {} on '{}'", version, offset, iface_name),
                );
            }
        }

        let mut network: Network = session.entities().by_id(&net_id)?;
        session.entities().unlink(self, &mut network)?;
        session.cache_network(network);

        if let Some(iface) = self.interfaces.get_mut(&iface_id) {
            iface.network.set(version, None);
        }
        session.entities().save(self)?;
        Ok(report)
    }

    /// Offsets of every member node on `network`, by display name.
    ///
    /// A node binding the network through more than one interface gets
    /// `name-ifname` entries instead of the bare name. Collisions
    /// (case-insensitive) are an error, never silently overwritten.
    pub fn allocated_addresses(
        &self,
        session: &mut Session,
        network: &Network,
    ) -> Result<BTreeMap<String, u128>> {
        let mut bound_ifaces: Vec<(&InterfaceId, &GroupInterface)> = self
            .interfaces
            .iter()
            .filter(|(_, iface)| iface.network.get(network.version) == Some(&network.id))
            .collect();
        bound_ifaces.sort_by(|a, b| a.1.name.cmp(&b.1.name));

        let mut out = BTreeMap::new();
        let mut seen_folded = HashSet::new();
        for node in self.member_nodes(session)? {
            let assigned: Vec<(&str, u128)> = bound_ifaces
                .iter()
                .filter_map(|(id, iface)| {
                    node.interfaces
                        .get(id)
                        .and_then(|slots| slots.get(network.version))
                        .map(|offset| (iface.name.as_str(), *offset))
                })
                .collect();
            let multiple = assigned.len() > 1;
            for (iface_name, offset) in assigned {
                let display = if multiple {
                    format!("{}-{}", node.name, iface_name)
                } else {
                    node.name.clone()
                };
                if !seen_folded.insert(display.to_lowercase()) {
                    return Err(LunaError::Validation(format!(
                        "duplicate name '{}' on network '{}'",
                        display, network.name
                    )));
                }
                out.insert(display, offset);
            }
        }
        Ok(out)
    }

    /// Network id bound to an interface for one family, if any.
    pub fn network_for(&self, iface_id: &InterfaceId, version: IpVersion) -> Option<&EntityId> {
        self.interfaces
            .get(iface_id)
            .and_then(|iface| iface.network.get(version))
    }

    /// Boot data for the boot-script collaborator.
    pub fn boot_params(&self, session: &mut Session) -> Result<BootParams> {
        let osimage: OsImage = session.entities().by_id(&self.osimage)?;
        let mut params = BootParams {
            kernel_file: osimage.kernfile,
            initrd_file: osimage.initrdfile,
            kernel_opts: osimage.kernopts,
            boot_interface: None,
            net_prefix: None,
            domain: None,
        };

        let Some(boot_if) = self.boot_if.clone() else {
            return Ok(params);
        };
        let Ok(iface_id) = self.iface_id(&boot_if) else {
            log::error!("group '{}': unknown boot interface '{}'", self.name, boot_if);
            return Ok(params);
        };
        let slots = &self.interfaces[&iface_id].network;
        let net_id = slots.get(IpVersion::V4).or_else(|| slots.get(IpVersion::V6));
        match net_id {
            Some(net_id) => {
                let network = session.network(net_id)?;
                params.net_prefix = Some(network.prefix);
                params.domain = Some(network.name.clone());
                params.boot_interface = Some(boot_if);
            }
            None => {
                log::error!(
                    "group '{}': boot interface '{}' has no network configured",
                    self.name,
                    boot_if
                );
            }
        }
        Ok(params)
    }

    /// Install data for the install-script collaborator.
    pub fn install_params(&self, session: &mut Session) -> Result<InstallParams> {
        let osimage: OsImage = session.entities().by_id(&self.osimage)?;
        let boot = self.boot_params(session)?;

        let mut interfaces = BTreeMap::new();
        for iface in self.interfaces.values() {
            let prefix_of = |session: &mut Session, id: Option<&EntityId>| -> Result<Option<u8>> {
                Ok(match id {
                    Some(id) => Some(session.network(id)?.prefix),
                    None => None,
                })
            };
            let prefix4 = prefix_of(session, iface.network.get(IpVersion::V4))?;
            let prefix6 = prefix_of(session, iface.network.get(IpVersion::V6))?;
            interfaces.insert(
                iface.name.clone(),
                InterfaceInstall {
                    params: iface.params.clone(),
                    prefix4,
                    prefix6,
                },
            );
        }

        let torrent_interface = self
            .torrent_if
            .clone()
            .filter(|name| self.iface_id(name).is_ok());

        let bmcsetup = match &self.bmcsetup {
            Some(id) => {
                let bmc: BmcSetup = session.entities().by_id(id)?;
                Some(BmcInstall {
                    user: bmc.user,
                    password: bmc.password,
                    userid: bmc.userid,
                    mgmtchannel: bmc.mgmtchannel,
                    netchannel: bmc.netchannel,
                })
            }
            None => None,
        };

        Ok(InstallParams {
            prescript: self.prescript.clone(),
            partscript: self.partscript.clone(),
            postscript: self.postscript.clone(),
            boot_interface: boot.boot_interface,
            torrent_interface,
            domain: boot.domain,
            interfaces,
            kernver: osimage.kernver,
            kernel_opts: osimage.kernopts,
            tarball: osimage.tarball,
            torrent: osimage.torrent,
            bmcsetup,
        })
    }
}
