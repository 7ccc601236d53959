//! # calicoctl
//!
//! Runs node startup and manages the resources it depends on.
//!
//! ## Node
//!
//! Reconcile this host's node record (address detection, conflict checks,
//! default pools and tunnel address), using the same environment a node
//! container would get:
//! ```sh
//! $ NODENAME=node-a IP=autodetect IP_AUTODETECTION_METHOD=can-reach=8.8.8.8 calicoctl node run
//! ```
//!
//! Only (re)assign the tunnel address:
//! ```sh
//! $ calicoctl node allocate-tunnel-addr --name node-a
//! ```
//!
//! ```sh
//! $ calicoctl node show
//!  Name    IPv4      IPv4 Network  IPv6  AS     Tunnel       Updated
//! ----------------------------------------------------------------------
//!  node-a  10.0.0.5  10.0.0.0/24         64512  192.168.0.1  00:01:12
//! ```
//!
//! ## Pools
//! ```sh
//! $ calicoctl pool add 10.10.0.0/16 --overlay --nat-outgoing
//! $ calicoctl pool show
//!  CIDR          Version  Overlay  NAT Outgoing  Disabled
//! ---------------------------------------------------------
//!  10.10.0.0/16  IPv4     true     true          false
//! $ calicoctl pool remove 10.10.0.0/16
//! ```

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use ipnetwork::IpNetwork;
use log::debug;

use crate::autodetection::{DetectionMethod, SystemNetwork};
use crate::config::ClientConfig;
use crate::datastore::LocalDatastore;
use crate::models::{IpPool, IpVersion};
use crate::startup::{
    resolve_node_name, IpRequest, NodeStartup, StartupError, StartupOptions, StartupReport,
};
use crate::tunnel::TunnelAllocator;

mod display;
mod resources;
mod table;

pub use resources::{print_resources, Resource, ResourceKind};

use display::NodeRow;
use table::OutputTable;

#[derive(Parser, Debug)]
#[clap(name = "calicoctl", rename_all = "kebab-case")]
/// Node startup and resource management
pub struct Args {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Path to calicoctl.toml. Defaults are used when not provided
    #[clap(short, long, global = true)]
    pub config: Option<String>,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences), global = true)]
    pub verbose: u8,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Start or inspect nodes
    #[clap(subcommand)]
    Node(NodeCommand),
    /// Manage IP pools
    #[clap(subcommand)]
    Pool(PoolCommand),
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum NodeCommand {
    /// Reconcile this node's record and settle pools and the tunnel address
    Run(RunOptions),
    /// Assign, keep or release this node's tunnel address
    AllocateTunnelAddr(NodeName),
    /// List nodes
    #[clap(alias = "s")]
    Show,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum PoolCommand {
    /// Create (or replace) a pool
    Add(PoolOptions),
    /// Delete a pool
    #[clap(alias = "rm")]
    Remove {
        #[clap()]
        cidr: IpNetwork,
    },
    /// List pools
    #[clap(alias = "s")]
    Show,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct NodeName {
    /// Node name, falls back to $HOSTNAME and then the kernel hostname
    #[clap(long, env = "NODENAME")]
    pub name: Option<String>,
    #[clap(long, env = "HOSTNAME", hide = true)]
    pub hostname: Option<String>,
}

impl NodeName {
    pub fn resolve(&self) -> Result<String, StartupError> {
        resolve_node_name(self.name.as_deref(), self.hostname.as_deref())
    }
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct RunOptions {
    #[clap(flatten)]
    pub node: NodeName,
    /// IPv4 address ("autodetect", ADDR or ADDR/PREFIX)
    #[clap(long, env = "IP")]
    pub ip: Option<String>,
    /// IPv6 address ("autodetect", ADDR or ADDR/PREFIX)
    #[clap(long, env = "IP6")]
    pub ip6: Option<String>,
    /// AS number, plain or dotted (E.g. 64512 or 65000.100)
    #[clap(long = "as", env = "AS")]
    pub as_number: Option<String>,
    /// first-found | interface=REGEX,.. | skip-interface=REGEX,.. | can-reach=DEST
    #[clap(long, env = "IP_AUTODETECTION_METHOD", default_value = "first-found")]
    pub ip_autodetection_method: String,
    #[clap(long, env = "IP6_AUTODETECTION_METHOD", default_value = "first-found")]
    pub ip6_autodetection_method: String,
    /// Don't create the default IPv4/IPv6 pools
    #[clap(
        long,
        env = "NO_DEFAULT_POOLS",
        default_value = "false",
        parse(try_from_str = parse_flag)
    )]
    pub no_default_pools: bool,
    /// Write CALICO_IP/CALICO_IP6/NODENAME here after startup
    #[clap(long, env = "CALICO_ENV_FILE")]
    pub env_file: Option<PathBuf>,
}

impl RunOptions {
    /// Validate the raw values once, into typed startup options
    pub fn startup_options(&self) -> Result<StartupOptions, StartupError> {
        let method = |raw: &str| -> Result<DetectionMethod, StartupError> {
            raw.parse().map_err(StartupError::InvalidMethod)
        };
        Ok(StartupOptions {
            name: self.node.resolve()?,
            ipv4: IpRequest::parse(self.ip.as_deref(), IpVersion::V4)?,
            ipv6: IpRequest::parse(self.ip6.as_deref(), IpVersion::V6)?,
            as_number: self.as_number.clone(),
            ipv4_method: method(&self.ip_autodetection_method)?,
            ipv6_method: method(&self.ip6_autodetection_method)?,
            no_default_pools: self.no_default_pools,
            env_file: self.env_file.clone(),
        })
    }
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct PoolOptions {
    #[clap()]
    pub cidr: IpNetwork,
    /// Use for IPIP tunnel addresses
    #[clap(long)]
    pub overlay: bool,
    #[clap(long)]
    pub nat_outgoing: bool,
    #[clap(long)]
    pub disabled: bool,
}

impl From<&PoolOptions> for IpPool {
    fn from(options: &PoolOptions) -> Self {
        let mut pool = IpPool::new(options.cidr);
        pool.overlay_enabled = options.overlay;
        pool.nat_outgoing = options.nat_outgoing;
        pool.disabled = options.disabled;
        pool
    }
}

/// Accepts true/false, yes/no, on/off and 1/0
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        other => Err(format!("Expected true or false, got '{}'", other)),
    }
}

fn load_config(args: &Args) -> std::io::Result<ClientConfig> {
    match &args.config {
        Some(path) => {
            debug!("Loading config from {}", path);
            ClientConfig::from_file(path)
        }
        None => Ok(ClientConfig::default()),
    }
}

fn print_report(report: &StartupReport) {
    for warning in &report.warnings {
        eprintln!("{}", format!("Warning: {}", warning).yellow());
    }
    for pool in &report.created_pools {
        println!("Created default pool {}", pool.cidr);
    }
    println!("Cluster GUID {}", report.cluster_guid);
    println!("{}", report.tunnel);
    let mut table = OutputTable::new();
    table.add_row(&NodeRow(&report.node));
    table.print();
}

pub async fn run_cmd(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(args)?;
    let store = LocalDatastore::open(&config.datastore_path);
    match &args.cmd {
        Command::Node(node) => match node {
            NodeCommand::Run(options) => {
                let options = options.startup_options()?;
                let host = SystemNetwork::new(config.reach_timeout);
                let report = NodeStartup::new(&store, &host, &config)
                    .run(&options)
                    .await?;
                print_report(&report);
            }
            NodeCommand::AllocateTunnelAddr(name) => {
                let name = name.resolve()?;
                let outcome = TunnelAllocator::new(&store).reconcile(&name).await?;
                println!("{}", outcome);
            }
            NodeCommand::Show => {
                let nodes = ResourceKind::Node.list(&store).await?;
                print_resources(ResourceKind::Node, &nodes);
            }
        },
        Command::Pool(pool) => match pool {
            PoolCommand::Add(options) => {
                let applied = Resource::IpPool(IpPool::from(options)).apply(&store).await?;
                println!("Applied {} {}", applied.kind(), options.cidr);
            }
            PoolCommand::Remove { cidr } => {
                let removed = ResourceKind::IpPool
                    .delete(&store, &cidr.to_string())
                    .await?;
                println!("Removed {} {}", removed.kind(), cidr);
            }
            PoolCommand::Show => {
                let pools = ResourceKind::IpPool.list(&store).await?;
                print_resources(ResourceKind::IpPool, &pools);
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag("1"), Ok(true));
        assert_eq!(parse_flag("no"), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_run_options() {
        let args = Args::try_parse_from(&[
            "calicoctl",
            "node",
            "run",
            "--name",
            "node-a",
            "--ip",
            "10.0.0.5/24",
            "--ip6",
            "autodetect",
            "--as",
            "64512",
            "--ip-autodetection-method",
            "interface=eth.*",
            "--no-default-pools",
            "true",
        ])
        .unwrap();
        let options = match args.cmd {
            Command::Node(NodeCommand::Run(run)) => run.startup_options().unwrap(),
            other => panic!("Unexpected {:?}", other),
        };
        assert_eq!(options.name, "node-a");
        assert!(matches!(options.ipv4, IpRequest::Address(_)));
        assert_eq!(options.ipv6, IpRequest::Autodetect);
        assert_eq!(options.as_number.as_deref(), Some("64512"));
        assert_eq!(
            options.ipv4_method,
            DetectionMethod::Interface(vec!["eth.*".to_string()])
        );
        assert!(options.no_default_pools);
    }

    #[test]
    fn test_run_options_invalid() {
        let args = Args::try_parse_from(&[
            "calicoctl",
            "node",
            "run",
            "--name",
            "node-a",
            "--ip6-autodetection-method",
            "best-guess",
        ])
        .unwrap();
        match args.cmd {
            Command::Node(NodeCommand::Run(run)) => assert!(matches!(
                run.startup_options(),
                Err(StartupError::InvalidMethod(_))
            )),
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pool_options() {
        let args =
            Args::try_parse_from(&["calicoctl", "pool", "add", "10.10.0.0/16", "--overlay"])
                .unwrap();
        match args.cmd {
            Command::Pool(PoolCommand::Add(options)) => {
                let pool = IpPool::from(&options);
                assert!(pool.overlay_enabled);
                assert!(!pool.nat_outgoing);
            }
            other => panic!("Unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pool_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("calicoctl.toml");
        let datastore_path = dir.path().join("datastore.json");
        std::fs::write(
            &config_path,
            format!("datastore_path = {:?}\n", datastore_path.to_str().unwrap()),
        )
        .unwrap();
        let config = config_path.to_str().unwrap();

        for cmd in &[
            vec!["calicoctl", "-c", config, "pool", "add", "10.10.0.0/16", "--overlay"],
            vec!["calicoctl", "-c", config, "pool", "show"],
            vec!["calicoctl", "-c", config, "pool", "remove", "10.10.0.0/16"],
        ] {
            let args = Args::try_parse_from(cmd).unwrap();
            run_cmd(&args).await.unwrap();
        }
        let args = Args::try_parse_from(&["calicoctl", "-c", config, "pool", "rm", "10.10.0.0/16"])
            .unwrap();
        assert!(run_cmd(&args).await.is_err());
    }
}
