//! End-to-end provisioning scenarios over the in-memory store, plus one
//! sled-backed persistence round trip.

use luna::cluster::{Cluster, ClusterOptions};
use luna::error::LunaError;
use luna::group::Group;
use luna::ip::IpVersion;
use luna::network::Network;
use luna::node::{Node, NodeFlags};
use luna::osimage::OsImage;
use luna::otherdev::OtherDev;
use luna::session::Session;
use luna::store::{Datastore, EntityStore, MemoryStore, SledStore};
use luna::switch::Switch;

fn bootstrap(backend: &dyn Datastore) -> EntityStore<'_> {
    let store = EntityStore::new(backend);
    Cluster::init(&store, ClusterOptions::default()).unwrap();
    OsImage::create(&store, "compute-image", "/opt/osimages/compute").unwrap();
    store
}

/// Every offset recorded on a node is missing from the freelist, and
/// free + allocated counts cover the space exactly.
fn assert_exclusive_ownership(store: &EntityStore, network_name: &str, nodes: &[&Node]) {
    let network: Network = store.resolve(network_name).unwrap();
    let mut allocated: u128 = u128::from(network.ns_ip.is_some());
    for node in nodes {
        for slots in node.interfaces.values() {
            if let Some(offset) = slots.get(network.version) {
                assert!(
                    !network.freelist.is_free(*offset),
                    "offset {} is both assigned and free",
                    offset
                );
                allocated += 1;
            }
        }
    }
    assert_eq!(network.freelist.free_count() + allocated, network.limit());
}

#[test]
fn scenario_fresh_network_allocates_from_the_bottom() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);

    let mut network =
        Network::create(&store, "cluster-net", "10.50.0.0", 16, None, None, None).unwrap();

    // ns pre-occupies the top slot, the freelist is [{1, 65533}]
    assert_eq!(network.freelist.intervals().len(), 1);
    assert_eq!(network.freelist.intervals()[0].start, 1);
    assert_eq!(network.freelist.intervals()[0].end, 65533);

    assert_eq!(network.reserve_next().unwrap(), 1);
    assert_eq!(network.reserve_next().unwrap(), 2);
}

#[test]
fn scenario_binding_populates_preexisting_nodes_in_name_order() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["BOOTIF"]).unwrap();

    let mut session = Session::new(&backend);
    for _ in 0..10 {
        Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    }

    Network::create(&store, "fresh-net", "10.50.0.0", 16, None, None, None).unwrap();
    let report = group.bind_network(&mut session, "BOOTIF", "fresh-net").unwrap();
    assert!(report.all_ok());
    assert_eq!(report.outcomes.len(), 10);

    // offsets were handed out in node-name order
    for (i, name) in ["node001", "node005", "node010"].iter().enumerate() {
        let node: Node = store.resolve(name).unwrap();
        let expected = match i {
            0 => 1,
            1 => 5,
            _ => 10,
        };
        let offset = node.interfaces.values().next().unwrap().get(IpVersion::V4);
        assert_eq!(offset, Some(&expected), "wrong offset for {}", name);
    }

    let network: Network = store.resolve("fresh-net").unwrap();
    assert_eq!(network.freelist.intervals()[0].start, 11);

    let nodes: Vec<Node> = (1..=10)
        .map(|i| store.resolve(format!("node{:03}", i).as_str()).unwrap())
        .collect();
    let refs: Vec<&Node> = nodes.iter().collect();
    assert_exclusive_ownership(&store, "fresh-net", &refs);
}

#[test]
fn scenario_change_group_same_network_keeps_offset() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "shared-net", "10.51.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group1 = Group::create(&store, "rack1", "compute-image", None, &["eth0"]).unwrap();
    let mut group2 = Group::create(&store, "rack2", "compute-image", None, &["eth0"]).unwrap();
    group1.bind_network(&mut session, "eth0", "shared-net").unwrap();
    group2.bind_network(&mut session, "eth0", "shared-net").unwrap();

    let mut node = Node::create(&mut session, None, "rack1", NodeFlags::default()).unwrap();
    node.set_ip(&mut session, "eth0", "10.51.0.2").unwrap();

    let report = node.change_group(&mut session, "rack2").unwrap();
    assert!(report.all_ok());

    let node: Node = store.resolve("node001").unwrap();
    let group2: Group = store.resolve("rack2").unwrap();
    assert_eq!(node.group, group2.id);
    let iface_id = group2.iface_id("eth0").unwrap();
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V4), Some(&2));

    let network: Network = store.resolve("shared-net").unwrap();
    assert!(!network.freelist.is_free(2));
    assert!(network.freelist.is_free(1));
}

#[test]
fn scenario_change_group_same_network_different_interface_name() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "shared-net", "10.51.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group1 = Group::create(&store, "rack1", "compute-image", None, &["eth0"]).unwrap();
    let mut group2 = Group::create(&store, "rack2", "compute-image", None, &["em1"]).unwrap();
    group1.bind_network(&mut session, "eth0", "shared-net").unwrap();
    group2.bind_network(&mut session, "em1", "shared-net").unwrap();

    let mut node = Node::create(&mut session, None, "rack1", NodeFlags::default()).unwrap();
    node.set_ip(&mut session, "eth0", "10.51.0.2").unwrap();

    // restoration falls through to the network-only match (pass two)
    node.change_group(&mut session, "rack2").unwrap();

    let node: Node = store.resolve("node001").unwrap();
    let group2: Group = store.resolve("rack2").unwrap();
    let iface_id = group2.iface_id("em1").unwrap();
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V4), Some(&2));
}

#[test]
fn scenario_change_group_different_network_allocates_fresh() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "net-a", "10.51.0.0", 16, None, None, None).unwrap();
    Network::create(&store, "net-b", "10.52.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group1 = Group::create(&store, "rack1", "compute-image", None, &["eth0"]).unwrap();
    let mut group2 = Group::create(&store, "rack2", "compute-image", None, &["eth0"]).unwrap();
    group1.bind_network(&mut session, "eth0", "net-a").unwrap();
    group2.bind_network(&mut session, "eth0", "net-b").unwrap();

    let mut node = Node::create(&mut session, None, "rack1", NodeFlags::default()).unwrap();
    node.set_ip(&mut session, "eth0", "10.51.0.7").unwrap();

    node.change_group(&mut session, "rack2").unwrap();

    let node: Node = store.resolve("node001").unwrap();
    let group2: Group = store.resolve("rack2").unwrap();
    let iface_id = group2.iface_id("eth0").unwrap();
    // fresh offset on net-b, old address fully released on net-a
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V4), Some(&1));

    let net_a: Network = store.resolve("net-a").unwrap();
    assert!(net_a.freelist.is_free(7));
    assert_eq!(net_a.freelist.free_count(), 65533);

    let net_b: Network = store.resolve("net-b").unwrap();
    assert!(!net_b.freelist.is_free(1));
}

#[test]
fn scenario_dual_stack_slots_are_independent() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "net-v4", "10.50.0.0", 16, None, None, None).unwrap();
    Network::create(&store, "net-v6", "fe80::", 64, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "net-v4").unwrap();
    group.bind_network(&mut session, "eth0", "net-v6").unwrap();

    let node = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    assert_eq!(node.get_ip(&mut session, "eth0", Some(IpVersion::V4)).unwrap(), "10.50.0.1");
    assert_eq!(node.get_ip(&mut session, "eth0", Some(IpVersion::V6)).unwrap(), "fe80::1");
    assert!(matches!(
        node.get_ip(&mut session, "eth0", None),
        Err(LunaError::AmbiguousVersion { .. })
    ));

    let report = group.unbind_network(&mut session, "eth0", Some(IpVersion::V6)).unwrap();
    assert!(report.all_ok());

    let node: Node = store.resolve("node001").unwrap();
    let iface_id = group.iface_id("eth0").unwrap();
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V4), Some(&1));
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V6), None);

    let net6: Network = store.resolve("net-v6").unwrap();
    assert!(net6.freelist.is_free(1));
    let net4: Network = store.resolve("net-v4").unwrap();
    assert!(!net4.freelist.is_free(1));
}

#[test]
fn scenario_delete_network_blocked_until_unbound() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "cluster-net", "10.50.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "cluster-net").unwrap();

    let network: Network = store.resolve("cluster-net").unwrap();
    assert!(matches!(
        store.delete(network),
        Err(LunaError::ReferentialIntegrity { .. })
    ));

    group.unbind_network(&mut session, "eth0", None).unwrap();
    let network: Network = store.resolve("cluster-net").unwrap();
    store.delete(network).unwrap();
    assert!(store.resolve::<Network>("cluster-net").is_err());
}

#[test]
fn node_creation_rolls_back_one_interface_on_exhaustion() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "wide-v4", "10.50.0.0", 16, None, None, None).unwrap();
    // /126 leaves 2 usable offsets; ns takes one, so a single node fits
    Network::create(&store, "tiny-v6", "fe80::", 126, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "wide-v4").unwrap();
    group.bind_network(&mut session, "eth0", "tiny-v6").unwrap();

    Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();

    // the second node acquires a v4 offset, then finds no v6 space; the
    // acquired v4 offset must be rolled back with it
    let node = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    let iface_id = group.iface_id("eth0").unwrap();
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V4), None);
    assert_eq!(node.interfaces[&iface_id].get(IpVersion::V6), None);

    let net4: Network = store.resolve("wide-v4").unwrap();
    assert!(net4.freelist.is_free(2));
}

#[test]
fn resolve_used_addresses_covers_all_owner_kinds() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "mgmt", "10.40.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "mgmt").unwrap();
    Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();

    Switch::create(&mut session, "spine01", "mgmt", "10.40.0.250").unwrap();
    let mut pdu = OtherDev::create(&mut session, "pdu01").unwrap();
    pdu.add_connection(&mut session, "mgmt", "10.40.0.251").unwrap();

    let network: Network = store.resolve("mgmt").unwrap();
    let used = network.resolve_used_addresses(&mut session).unwrap();

    assert_eq!(used.get("node001").map(String::as_str), Some("10.40.0.1"));
    assert_eq!(used.get("spine01").map(String::as_str), Some("10.40.0.250"));
    assert_eq!(used.get("pdu01").map(String::as_str), Some("10.40.0.251"));
    assert_eq!(
        used.get(&network.ns_hostname).map(String::as_str),
        Some("10.40.255.254")
    );
}

#[test]
fn zone_data_lists_forward_and_reverse_hosts() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "cluster-zone", "10.50.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "cluster-zone").unwrap();
    Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();

    let network: Network = store.resolve("cluster-zone").unwrap();
    let zone = network.zone_data(&mut session).unwrap();

    assert_eq!(zone.zone_name, "cluster-zone");
    assert_eq!(zone.reverse_zone_name, "50.10.in-addr.arpa");
    assert_eq!(zone.hosts.get("node001").map(String::as_str), Some("10.50.0.1"));
    assert_eq!(
        zone.reverse_hosts.get("1.0").map(String::as_str),
        Some("node001.cluster-zone.")
    );
}

#[test]
fn allocated_addresses_disambiguates_multi_homed_nodes() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "flat-net", "10.50.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group =
        Group::create(&store, "compute", "compute-image", None, &["eth0", "eth1"]).unwrap();
    group.bind_network(&mut session, "eth0", "flat-net").unwrap();
    group.bind_network(&mut session, "eth1", "flat-net").unwrap();
    Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();

    let group: Group = store.resolve("compute").unwrap();
    let network: Network = store.resolve("flat-net").unwrap();
    let addrs = group.allocated_addresses(&mut session, &network).unwrap();

    assert!(addrs.contains_key("node001-eth0"));
    assert!(addrs.contains_key("node001-eth1"));
    assert!(!addrs.contains_key("node001"));
}

#[test]
fn allocated_addresses_rejects_case_insensitive_collisions() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "flat-net", "10.50.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
    group.bind_network(&mut session, "eth0", "flat-net").unwrap();
    Node::create(&mut session, Some("web"), "compute", NodeFlags::default()).unwrap();
    Node::create(&mut session, Some("WEB"), "compute", NodeFlags::default()).unwrap();

    let group: Group = store.resolve("compute").unwrap();
    let network: Network = store.resolve("flat-net").unwrap();
    assert!(matches!(
        group.allocated_addresses(&mut session, &network),
        Err(LunaError::Validation(_))
    ));
}

#[test]
fn dhcp_config_reserves_range_and_lists_nodes_with_macs() {
    let backend = MemoryStore::new();
    let store = bootstrap(&backend);
    Network::create(&store, "provision", "10.50.0.0", 16, None, None, None).unwrap();

    let mut session = Session::new(&backend);
    let mut group = Group::create(&store, "compute", "compute-image", None, &["BOOTIF"]).unwrap();
    group.bind_network(&mut session, "BOOTIF", "provision").unwrap();

    let mut n1 = Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    n1.set_mac(&store, Some("aa:bb:cc:00:11:22")).unwrap();

    let mut cluster = Cluster::resolve(&store).unwrap();
    cluster
        .make_dhcp(&mut session, "provision", "10.50.128.0", "10.50.128.255")
        .unwrap();

    let config = cluster.dhcp_config(&mut session).unwrap();
    assert_eq!(config.range_start, "10.50.128.0");
    assert_eq!(config.range_end, "10.50.128.255");
    assert_eq!(config.netmask, "255.255.0.0");
    assert_eq!(config.network_address, "10.50.0.0");

    // only the node with a MAC gets a static reservation
    assert_eq!(config.reservations.len(), 1);
    let reservation = &config.reservations["node001"];
    assert_eq!(reservation.address, "10.50.0.1");
    assert_eq!(reservation.mac, "aa:bb:cc:00:11:22");

    let network: Network = store.resolve("provision").unwrap();
    assert!(!network.freelist.is_free(32768));
    assert!(!network.freelist.is_free(33023));
}

#[test]
fn sled_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let backend = SledStore::open(dir.path()).unwrap();
        let store = bootstrap(&backend);
        Network::create(&store, "cluster-net", "10.50.0.0", 16, None, None, None).unwrap();
        let mut group =
            Group::create(&store, "compute", "compute-image", None, &["eth0"]).unwrap();
        let mut session = Session::new(&backend);
        group.bind_network(&mut session, "eth0", "cluster-net").unwrap();
        Node::create(&mut session, None, "compute", NodeFlags::default()).unwrap();
    }

    let backend = SledStore::open(dir.path()).unwrap();
    let store = EntityStore::new(&backend);
    let mut session = Session::new(&backend);

    let node: Node = store.resolve("node001").unwrap();
    assert_eq!(node.get_ip(&mut session, "eth0", None).unwrap(), "10.50.0.1");

    let network: Network = store.resolve("cluster-net").unwrap();
    assert!(!network.freelist.is_free(1));
    assert_eq!(network.freelist.intervals()[0].start, 2);
}
