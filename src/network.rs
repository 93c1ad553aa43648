//! Network entity: a named address range owning one freelist.
//!
//! Every network is single-family; a dual-stack interface links two
//! independent networks. The freelist tracks relative offsets, so the
//! base address and prefix can change without rewriting allocations as
//! long as the usable range still covers them.

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::error::{LunaError, Result};
use crate::group::Group;
use crate::ip::{codec, AddressSpace, IpVersion};
use crate::otherdev::OtherDev;
use crate::session::Session;
use crate::store::{Collection, EntityId, EntityStore, Links};
use crate::switch::Switch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: EntityId,
    pub name: String,
    pub version: IpVersion,
    /// Base address of the range, masked to the prefix.
    pub address: u128,
    pub prefix: u8,
    pub freelist: AddressSpace,
    pub ns_hostname: String,
    /// Relative offset of the nameserver address.
    pub ns_ip: Option<u128>,
    #[serde(default, rename = "use")]
    pub links: Links,
    #[serde(default)]
    pub usedby: Links,
}

crate::impl_entity!(Network, Collection::Network);

/// Structured DNS zone description, consumed by the external zonefile
/// collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneData {
    pub zone_name: String,
    pub ns_hostname: String,
    pub ns_address: String,
    pub hosts: BTreeMap<String, String>,
    pub reverse_zone_name: String,
    pub reverse_hosts: BTreeMap<String, String>,
}

impl Network {
    /// Create and persist a network, linking it to the cluster.
    ///
    /// The nameserver defaults to this host's name and the last usable
    /// offset of the new range.
    pub fn create(
        store: &EntityStore,
        name: &str,
        address: &str,
        prefix: u8,
        version: Option<IpVersion>,
        ns_hostname: Option<String>,
        ns_ip: Option<&str>,
    ) -> Result<Network> {
        let version = match version.or_else(|| codec::version_of(address)) {
            Some(v) => v,
            None => return Err(LunaError::InvalidAddress(address.to_string())),
        };

        let base = codec::network_base(codec::parse(address, version)?, prefix, version)?;
        let limit = version.host_limit(prefix);
        if limit < 1 {
            return Err(LunaError::Validation(format!(
                "prefix /{} leaves no usable addresses",
                prefix
            )));
        }

        let mut cluster = Cluster::resolve(store)?;

        let mut freelist = AddressSpace::new(limit);
        let ns_rel = match ns_ip {
            Some(text) => codec::text_to_relative(text, base, prefix, version)?,
            None => limit,
        };
        freelist.allocate(ns_rel, None)?;

        let mut network = store.create(Network {
            id: EntityId::generate(),
            name: name.to_string(),
            version,
            address: base,
            prefix,
            freelist,
            ns_hostname: ns_hostname.unwrap_or_else(default_ns_hostname),
            ns_ip: Some(ns_rel),
            links: Links::default(),
            usedby: Links::default(),
        })?;

        store.link(&mut network, &mut cluster)?;
        log::info!(
            "network '{}' created: {}/{} (IPv{})",
            name,
            network.network_text()?,
            prefix,
            version
        );
        Ok(network)
    }

    /// Last usable relative offset.
    pub fn limit(&self) -> u128 {
        self.freelist.limit()
    }

    /// The base address in textual form.
    pub fn network_text(&self) -> Result<String> {
        codec::format(self.address, self.version)
    }

    /// The netmask in textual form.
    pub fn netmask_text(&self) -> Result<String> {
        codec::format(codec::prefix_mask(self.prefix, self.version), self.version)
    }

    /// Relative offset of a textual address inside this network.
    pub fn offset_of(&self, text: &str) -> Result<u128> {
        codec::text_to_relative(text, self.address, self.prefix, self.version)
    }

    /// Textual address of a relative offset.
    pub fn address_of(&self, offset: u128) -> Result<String> {
        codec::relative_to_text(self.address, offset, self.version)
    }

    /// Reserve the smallest free offset.
    pub fn reserve_next(&mut self) -> Result<u128> {
        self.freelist.allocate_next()
    }

    /// Reserve a specific offset or range, returning its start.
    pub fn reserve(&mut self, start: u128, end: Option<u128>) -> Result<u128> {
        self.freelist.allocate(start, end)?;
        Ok(start)
    }

    /// Release an offset or range back into the freelist.
    pub fn release(&mut self, start: u128, end: Option<u128>) -> Result<bool> {
        self.freelist.release(start, end)
    }

    /// Move the nameserver address. The old slot is released first so
    /// the new one may equal it.
    pub fn set_ns_ip(&mut self, text: &str) -> Result<()> {
        let rel = self.offset_of(text)?;
        if let Some(old) = self.ns_ip {
            self.freelist.release(old, None)?;
        }
        if let Err(err) = self.freelist.allocate(rel, None) {
            // put the old reservation back before reporting
            if let Some(old) = self.ns_ip {
                self.freelist.allocate(old, None)?;
            }
            return Err(err);
        }
        self.ns_ip = Some(rel);
        Ok(())
    }

    /// Re-point the base address, keeping every relative allocation.
    pub fn set_address(&mut self, text: &str) -> Result<()> {
        let parsed = codec::parse(text, self.version)?;
        self.address = codec::network_base(parsed, self.prefix, self.version)?;
        Ok(())
    }

    /// Change the prefix, recomputing the base and resizing the
    /// freelist. Shrinking below any live allocation fails.
    pub fn set_prefix(&mut self, prefix: u8) -> Result<()> {
        let new_base = codec::network_base(self.address, prefix, self.version)?;
        let new_limit = self.version.host_limit(prefix);
        if new_limit < 1 {
            return Err(LunaError::Validation(format!(
                "prefix /{} leaves no usable addresses",
                prefix
            )));
        }
        self.freelist.resize(new_limit)?;
        self.prefix = prefix;
        self.address = new_base;
        Ok(())
    }

    /// Every address currently handed out on this network, by owner
    /// display name, gathered from the dependents recorded in `usedby`.
    ///
    /// Groups enumerate their member nodes; switches and other devices
    /// answer for themselves. Duplicate names across owners are logged
    /// and the first occurrence kept.
    pub fn resolve_used_addresses(&self, session: &mut Session) -> Result<BTreeMap<String, String>> {
        let mut out: BTreeMap<String, u128> = BTreeMap::new();
        let add = |out: &mut BTreeMap<String, u128>, name: String, offset: u128| {
            if out.contains_key(&name) {
                log::error!("duplicate name '{}' in network '{}'", name, self.name);
            } else {
                out.insert(name, offset);
            }
        };

        for (collection, id, _) in self.usedby.entries() {
            match collection {
                Collection::Group => {
                    let group: Group = session.entities().by_id(&id)?;
                    for (name, offset) in group.allocated_addresses(session, self)? {
                        add(&mut out, name, offset);
                    }
                }
                Collection::Switch => {
                    let switch: Switch = session.entities().by_id(&id)?;
                    if let Some(offset) = switch.ip {
                        add(&mut out, switch.name.clone(), offset);
                    }
                }
                Collection::OtherDev => {
                    let dev: OtherDev = session.entities().by_id(&id)?;
                    if let Some(offset) = dev.get_ip(&self.id) {
                        add(&mut out, dev.name.clone(), offset);
                    }
                }
                _ => {}
            }
        }

        if let Some(ns_rel) = self.ns_ip {
            add(&mut out, self.ns_hostname.clone(), ns_rel);
        }

        out.into_iter()
            .map(|(name, offset)| Ok((name, self.address_of(offset)?)))
            .collect()
    }

    /// Structured zone description for the external DNS collaborator.
    pub fn zone_data(&self, session: &mut Session) -> Result<ZoneData> {
        let ns_rel = self.ns_ip.ok_or_else(|| {
            LunaError::Validation(format!("network '{}' has no nameserver address", self.name))
        })?;
        let hosts = self.resolve_used_addresses(session)?;

        let mut reverse_hosts = BTreeMap::new();
        for (name, address) in &hosts {
            let ptr = self.reverse_label(codec::parse(address, self.version)?);
            reverse_hosts.insert(ptr, format!("{}.{}.", name, self.name));
        }

        Ok(ZoneData {
            zone_name: self.name.clone(),
            ns_hostname: self.ns_hostname.clone(),
            ns_address: self.address_of(ns_rel)?,
            hosts,
            reverse_zone_name: self.reverse_zone_name(),
            reverse_hosts,
        })
    }

    /// `in-addr.arpa` / `ip6.arpa` zone covering this network's prefix.
    pub fn reverse_zone_name(&self) -> String {
        match self.version {
            IpVersion::V4 => {
                let octets = (u32::from(self.prefix) / 8).max(1) as usize;
                let base = (self.address as u32).to_be_bytes();
                let labels: Vec<String> = base[..octets]
                    .iter()
                    .rev()
                    .map(u8::to_string)
                    .collect();
                format!("{}.in-addr.arpa", labels.join("."))
            }
            IpVersion::V6 => {
                let nibbles = (u32::from(self.prefix) / 4).max(1) as usize;
                let labels: Vec<String> = hex_nibbles(self.address)[..nibbles]
                    .iter()
                    .rev()
                    .map(char::to_string)
                    .collect();
                format!("{}.ip6.arpa", labels.join("."))
            }
        }
    }

    /// PTR label for one absolute address, relative to the reverse zone.
    fn reverse_label(&self, address: u128) -> String {
        match self.version {
            IpVersion::V4 => {
                let skip = (u32::from(self.prefix) / 8).max(1) as usize;
                let bytes = (address as u32).to_be_bytes();
                let labels: Vec<String> =
                    bytes[skip..].iter().rev().map(u8::to_string).collect();
                labels.join(".")
            }
            IpVersion::V6 => {
                let skip = (u32::from(self.prefix) / 4).max(1) as usize;
                let labels: Vec<String> = hex_nibbles(address)[skip..]
                    .iter()
                    .rev()
                    .map(char::to_string)
                    .collect();
                labels.join(".")
            }
        }
    }
}

fn hex_nibbles(address: u128) -> Vec<char> {
    format!("{:032x}", address).chars().collect()
}

fn default_ns_hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .and_then(|h| h.split('.').next().map(str::to_string))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "master".to_string())
}
