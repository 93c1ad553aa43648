use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use luna::cluster::{Cluster, ClusterOptions};
use luna::config::{self, StoreBackend, DEFAULT_CONFIG_PATH};
use luna::group::Group;
use luna::ip::IpVersion;
use luna::network::Network;
use luna::node::{Node, NodeFlags};
use luna::osimage::OsImage;
use luna::session::{CascadeReport, Session};
use luna::store::{Collection, Datastore, EntityStore, MemoryStore, SledStore};
use luna::switch::Switch;

/// Bare-metal cluster provisioning tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cluster-wide settings and DHCP
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Networks and their address spaces
    #[command(subcommand)]
    Network(NetworkCommand),
    /// OS images
    #[command(subcommand)]
    Osimage(OsimageCommand),
    /// Node groups and interface bindings
    #[command(subcommand)]
    Group(GroupCommand),
    /// Cluster members
    #[command(subcommand)]
    Node(NodeCommand),
    /// Managed switches
    #[command(subcommand)]
    Switch(SwitchCommand),
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
    /// Create the cluster singleton
    Init {
        #[arg(long, default_value = "node")]
        nodeprefix: String,
        #[arg(long, default_value_t = 3)]
        nodedigits: u8,
        #[arg(long)]
        frontend_address: Option<String>,
        #[arg(long, default_value_t = 7050)]
        frontend_port: u16,
    },
    /// Show the cluster document
    Show,
    /// Reserve a DHCP range on a network
    Makedhcp {
        network: String,
        start: String,
        end: String,
    },
    /// Print the DHCP data consumed by the dhcpd template
    DhcpConfig,
}

#[derive(Subcommand, Debug)]
enum NetworkCommand {
    Add {
        name: String,
        /// Base address, e.g. 10.50.0.0 or fe80::
        #[arg(long)]
        address: String,
        #[arg(long)]
        prefix: u8,
    },
    List,
    Show {
        name: String,
    },
    Remove {
        name: String,
    },
    /// Move the nameserver address
    SetNsIp {
        name: String,
        address: String,
    },
    /// Print the DNS zone data consumed by the zonefile template
    Zone {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum OsimageCommand {
    Add {
        name: String,
        #[arg(long)]
        path: String,
    },
    List,
    Remove {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Add {
        name: String,
        #[arg(long)]
        osimage: String,
        /// Comma-separated interface names
        #[arg(long, value_delimiter = ',')]
        interfaces: Vec<String>,
        #[arg(long)]
        bmcsetup: Option<String>,
    },
    List,
    Show {
        name: String,
    },
    Remove {
        name: String,
    },
    AddInterface {
        group: String,
        interface: String,
    },
    RenameInterface {
        group: String,
        interface: String,
        new_name: String,
    },
    RemoveInterface {
        group: String,
        interface: String,
    },
    /// Bind a network to an interface and allocate on every member node
    Bind {
        group: String,
        interface: String,
        network: String,
    },
    /// Release every member node's address and clear the binding
    Unbind {
        group: String,
        interface: String,
        /// 4 or 6; required when both families are bound
        #[arg(long)]
        version: Option<u8>,
    },
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    Add {
        /// Generated from the cluster's nodeprefix when omitted
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        group: String,
    },
    List,
    Show {
        name: String,
    },
    Remove {
        name: String,
    },
    SetMac {
        name: String,
        /// Omit to clear the MAC
        mac: Option<String>,
    },
    SetIp {
        name: String,
        interface: String,
        address: String,
    },
    ChangeGroup {
        name: String,
        group: String,
    },
    /// Print the boot data consumed by the boot-script template
    BootParams {
        name: String,
    },
    /// Print the install data consumed by the install-script template
    InstallParams {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum SwitchCommand {
    Add {
        name: String,
        #[arg(long)]
        network: String,
        #[arg(long)]
        address: String,
    },
    List,
    Remove {
        name: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::load_config(&args.config)?;
    let backend: Box<dyn Datastore> = match config.store.backend {
        StoreBackend::Sled => Box::new(SledStore::open(&config.store.path)?),
        StoreBackend::Memory => Box::new(MemoryStore::new()),
    };
    run(&args.command, backend.as_ref())
}

fn run(command: &Command, backend: &dyn Datastore) -> Result<()> {
    let store = EntityStore::new(backend);
    let mut session = Session::new(backend);

    match command {
        Command::Cluster(cmd) => match cmd {
            ClusterCommand::Init {
                nodeprefix,
                nodedigits,
                frontend_address,
                frontend_port,
            } => {
                Cluster::init(
                    &store,
                    ClusterOptions {
                        nodeprefix: nodeprefix.clone(),
                        nodedigits: *nodedigits,
                        frontend_address: frontend_address.clone(),
                        frontend_port: *frontend_port,
                    },
                )?;
            }
            ClusterCommand::Show => print_doc(backend, Collection::Cluster, Cluster::NAME)?,
            ClusterCommand::Makedhcp {
                network,
                start,
                end,
            } => {
                let mut cluster = Cluster::resolve(&store)?;
                cluster.make_dhcp(&mut session, network, start, end)?;
            }
            ClusterCommand::DhcpConfig => {
                let cluster = Cluster::resolve(&store)?;
                print_json(&cluster.dhcp_config(&mut session)?)?;
            }
        },

        Command::Network(cmd) => match cmd {
            NetworkCommand::Add {
                name,
                address,
                prefix,
            } => {
                Network::create(&store, name, address, *prefix, None, None, None)?;
            }
            NetworkCommand::List => print_names(&store, Collection::Network)?,
            NetworkCommand::Show { name } => print_doc(backend, Collection::Network, name)?,
            NetworkCommand::Remove { name } => {
                let network: Network = store.resolve(name)?;
                store.delete(network)?;
                info!("network '{}' removed", name);
            }
            NetworkCommand::SetNsIp { name, address } => {
                let mut network: Network = store.resolve(name)?;
                network.set_ns_ip(address)?;
                store.save(&network)?;
            }
            NetworkCommand::Zone { name } => {
                let network: Network = store.resolve(name)?;
                print_json(&network.zone_data(&mut session)?)?;
            }
        },

        Command::Osimage(cmd) => match cmd {
            OsimageCommand::Add { name, path } => {
                OsImage::create(&store, name, path)?;
            }
            OsimageCommand::List => print_names(&store, Collection::OsImage)?,
            OsimageCommand::Remove { name } => {
                let osimage: OsImage = store.resolve(name)?;
                store.delete(osimage)?;
            }
        },

        Command::Group(cmd) => match cmd {
            GroupCommand::Add {
                name,
                osimage,
                interfaces,
                bmcsetup,
            } => {
                let ifaces: Vec<&str> = interfaces.iter().map(String::as_str).collect();
                Group::create(&store, name, osimage, bmcsetup.as_deref(), &ifaces)?;
            }
            GroupCommand::List => print_names(&store, Collection::Group)?,
            GroupCommand::Show { name } => print_doc(backend, Collection::Group, name)?,
            GroupCommand::Remove { name } => {
                let group: Group = store.resolve(name)?;
                store.delete(group)?;
            }
            GroupCommand::AddInterface { group, interface } => {
                let mut group: Group = store.resolve(group)?;
                group.add_interface(&mut session, interface)?;
            }
            GroupCommand::RenameInterface {
                group,
                interface,
                new_name,
            } => {
                let mut group: Group = store.resolve(group)?;
                group.rename_interface(&store, interface, new_name)?;
            }
            GroupCommand::RemoveInterface { group, interface } => {
                let mut group: Group = store.resolve(group)?;
                group.remove_interface(&mut session, interface)?;
            }
            GroupCommand::Bind {
                group,
                interface,
                network,
            } => {
                let mut group: Group = store.resolve(group)?;
                let report = group.bind_network(&mut session, interface, network)?;
                print_report(&report);
            }
            GroupCommand::Unbind {
                group,
                interface,
                version,
            } => {
                let version = match version {
                    Some(4) => Some(IpVersion::V4),
                    Some(6) => Some(IpVersion::V6),
                    Some(v) => return Err(eyre!("IP version must be 4 or 6, got {}", v)),
                    None => None,
                };
                let mut group: Group = store.resolve(group)?;
                let report = group.unbind_network(&mut session, interface, version)?;
                print_report(&report);
            }
        },

        Command::Node(cmd) => match cmd {
            NodeCommand::Add { name, group } => {
                let node =
                    Node::create(&mut session, name.as_deref(), group, NodeFlags::default())?;
                println!("{}", node.name);
            }
            NodeCommand::List => print_names(&store, Collection::Node)?,
            NodeCommand::Show { name } => print_doc(backend, Collection::Node, name)?,
            NodeCommand::Remove { name } => {
                let node: Node = store.resolve(name)?;
                node.remove(&mut session)?;
            }
            NodeCommand::SetMac { name, mac } => {
                let mut node: Node = store.resolve(name)?;
                node.set_mac(&store, mac.as_deref())?;
            }
            NodeCommand::SetIp {
                name,
                interface,
                address,
            } => {
                let mut node: Node = store.resolve(name)?;
                node.set_ip(&mut session, interface, address)?;
            }
            NodeCommand::ChangeGroup { name, group } => {
                let mut node: Node = store.resolve(name)?;
                let report = node.change_group(&mut session, group)?;
                print_report(&report);
            }
            NodeCommand::BootParams { name } => {
                let node: Node = store.resolve(name)?;
                print_json(&node.boot_params(&mut session)?)?;
            }
            NodeCommand::InstallParams { name } => {
                let node: Node = store.resolve(name)?;
                print_json(&node.install_params(&mut session)?)?;
            }
        },

        Command::Switch(cmd) => match cmd {
            SwitchCommand::Add {
                name,
                network,
                address,
            } => {
                Switch::create(&mut session, name, network, address)?;
            }
            SwitchCommand::List => print_names(&store, Collection::Switch)?,
            SwitchCommand::Remove { name } => {
                let switch: Switch = store.resolve(name)?;
                switch.remove(&mut session)?;
            }
        },
    }

    Ok(())
}

fn print_names(store: &EntityStore, collection: Collection) -> Result<()> {
    for name in store.list_names(collection)? {
        println!("{}", name);
    }
    Ok(())
}

fn print_doc(backend: &dyn Datastore, collection: Collection, name: &str) -> Result<()> {
    let doc = backend
        .find_by_name(collection, name)?
        .ok_or_else(|| eyre!("{} '{}' not found", collection, name))?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &CascadeReport) {
    for outcome in &report.outcomes {
        let marker = if outcome.ok { "ok" } else { "FAILED" };
        println!("{:<20} {:<6} {}", outcome.subject, marker, outcome.detail);
    }
    if !report.all_ok() {
        log::warn!("cascade finished with failures, state is partial");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(&[
            "luna",
            "network",
            "add",
            "cluster-net",
            "--address",
            "10.50.0.0",
            "--prefix",
            "16",
        ]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match args.command {
            Command::Network(NetworkCommand::Add {
                name,
                address,
                prefix,
            }) => {
                assert_eq!(name, "cluster-net");
                assert_eq!(address, "10.50.0.0");
                assert_eq!(prefix, 16);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_group_bind() {
        let args = Args::parse_from(&["luna", "group", "bind", "compute", "BOOTIF", "net1"]);
        match args.command {
            Command::Group(GroupCommand::Bind {
                group,
                interface,
                network,
            }) => {
                assert_eq!(group, "compute");
                assert_eq!(interface, "BOOTIF");
                assert_eq!(network, "net1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
