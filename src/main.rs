use clap::{Parser, Subcommand, ValueEnum};
use mesh_bootstrap::core::ExchangeMode;
use mesh_bootstrap::utils::setup_logging;
use mesh_bootstrap::{Config, NatPolicy, Node, NodeIdentity, Result};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mesh-bootstrap")]
#[command(about = "Bootstrap into a P2P overlay and track reachable peers")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Start {
        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to listen on
        #[arg(long)]
        listen: Option<IpAddr>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Seed connect string, e.g. /ip4/1.2.3.4/tcp/4001/p2p/<peer-id>
        #[arg(short, long)]
        bootstrap: Option<String>,
        /// Directory holding the node's key pair
        #[arg(short, long)]
        key_dir: Option<PathBuf>,
        /// Seconds between reconciliation passes
        #[arg(short, long)]
        interval: Option<u64>,
        /// UPnP port mapping behaviour
        #[arg(long, value_enum)]
        nat: Option<NatArg>,
        /// Discovery response layout
        #[arg(long, value_enum)]
        exchange: Option<ExchangeArg>,
        /// Greet every peer learned during bootstrap
        #[arg(long)]
        greet_new_peers: bool,
        /// Seconds to wait on dials and bootstrap replies
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Print this node's peer ID, creating the key pair if needed
    Id {
        /// Directory holding the node's key pair
        #[arg(short, long, default_value = "./config/keys")]
        key_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NatArg {
    Disabled,
    BestEffort,
    Required,
}

impl From<NatArg> for NatPolicy {
    fn from(arg: NatArg) -> Self {
        match arg {
            NatArg::Disabled => NatPolicy::Disabled,
            NatArg::BestEffort => NatPolicy::BestEffort,
            NatArg::Required => NatPolicy::Required,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExchangeArg {
    Json,
    Single,
}

impl From<ExchangeArg> for ExchangeMode {
    fn from(arg: ExchangeArg) -> Self {
        match arg {
            ExchangeArg::Json => ExchangeMode::JsonList,
            ExchangeArg::Single => ExchangeMode::Single,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::Start {
            config,
            listen,
            port,
            bootstrap,
            key_dir,
            interval,
            nat,
            exchange,
            greet_new_peers,
            timeout,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };

            if let Some(listen) = listen {
                config.listen_ip = listen;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if bootstrap.is_some() {
                config.bootstrap_peer = bootstrap;
            }
            if let Some(key_dir) = key_dir {
                config.key_dir = key_dir;
            }
            if let Some(secs) = interval {
                config.reconcile_interval = Duration::from_secs(secs);
            }
            if let Some(nat) = nat {
                config.nat = nat.into();
            }
            if let Some(exchange) = exchange {
                config.protocol.exchange_mode = exchange.into();
            }
            if greet_new_peers {
                config.greet_new_peers = true;
            }
            if let Some(secs) = timeout {
                config.connect_timeout = Some(Duration::from_secs(secs));
            }

            let mut node = Node::new(config).await?;
            node.run().await?;
        }
        Commands::Id { key_dir } => {
            let identity = NodeIdentity::load_or_create(&key_dir)?;
            println!("{}", identity.peer_id());
        }
    }

    Ok(())
}
