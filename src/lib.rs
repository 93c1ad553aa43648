//! # Luna - Bare-metal cluster provisioning tool
//!
//! This library models clusters, node groups, individual nodes, networks,
//! OS images, BMC credentials and switches as persisted entities, and
//! derives boot/installation configuration from them.
//!
//! ## Overview
//!
//! Entities are whole JSON documents in a per-document-atomic datastore.
//! Every object carries bidirectional reference-counted dependency links
//! (`use`/`usedby`) enforcing referential integrity: an entity that is
//! still depended on cannot be deleted. Networks own an interval freelist
//! of relative address offsets; binding a network to a group interface
//! cascades address allocation across every member node.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `ip`: address arithmetic (`codec`) and the interval allocator
//!   (`freelist`), shared by IPv4 and IPv6
//! - `store`: the datastore trait with sled and in-memory backends, and
//!   the typed entity layer with the link graph
//! - `session`: unit-of-work cache and per-member reporting for cascades
//! - `network`: networks owning one address space each, DNS zone data
//! - `cluster`: the cluster singleton, node naming and DHCP ranges
//! - `group`: node classes, interface definitions and the group half of
//!   the assignment cascade
//! - `node`: cluster members, address slots and group migration
//! - `osimage`, `bmcsetup`, `switch`, `otherdev`: the remaining persisted
//!   entities
//! - `config`: YAML configuration for the `luna` binary
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use luna::cluster::{Cluster, ClusterOptions};
//! use luna::group::Group;
//! use luna::network::Network;
//! use luna::node::{Node, NodeFlags};
//! use luna::osimage::OsImage;
//! use luna::session::Session;
//! use luna::store::{EntityStore, MemoryStore};
//!
//! let backend = MemoryStore::new();
//! let store = EntityStore::new(&backend);
//!
//! Cluster::init(&store, ClusterOptions::default())?;
//! OsImage::create(&store, "compute-image", "/opt/osimages/compute")?;
//! Network::create(&store, "cluster-net", "10.50.0.0", 16, None, None, None)?;
//!
//! let mut group = Group::create(&store, "compute", "compute-image", None, &["BOOTIF"])?;
//! let mut session = Session::new(&backend);
//! group.bind_network(&mut session, "BOOTIF", "cluster-net")?;
//!
//! let node = Node::create(&mut session, None, "compute", NodeFlags::default())?;
//! assert_eq!(node.get_ip(&mut session, "BOOTIF", None)?, "10.50.0.1");
//! # Ok::<(), luna::error::LunaError>(())
//! ```
//!
//! ## Error Handling
//!
//! The core returns typed [`error::LunaError`] values; the `luna` binary
//! renders them through `color_eyre`. Cascade operations do not abort on
//! per-node failures and return a [`session::CascadeReport`] instead.

pub mod bmcsetup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod group;
pub mod ip;
pub mod network;
pub mod node;
pub mod osimage;
pub mod otherdev;
pub mod session;
pub mod store;
pub mod switch;
