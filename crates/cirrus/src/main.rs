mod commands;
mod utils;

use anyhow::Context;
use cirrus_cloud::{ControllerState, Protocol, StateManager, Store};
use cirrus_config::Settings;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Operate guest subnets, firewall rules and controllers of a Cirrus zone", long_about = None)]
struct Cli {
    /// Directory holding state.json (defaults to the settings file value)
    #[arg(long, global = true, env = "CIRRUS_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Print records as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Zone subnet pools
    #[command(subcommand)]
    Subnet(SubnetCommands),
    /// Blocks handed to guest networks
    #[command(subcommand)]
    Allocation(AllocationCommands),
    /// Automation controllers
    #[command(subcommand)]
    Controller(ControllerCommands),
    /// Routing firewall rules
    #[command(subcommand)]
    Firewall(FirewallCommands),
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum SubnetCommands {
    /// Create a pool in a zone
    Create {
        /// Zone ID
        #[arg(short, long)]
        zone: u64,
        /// IPv4 CIDR, e.g. 10.10.0.0/16
        cidr: String,
    },
    /// Change the CIDR of a pool
    Update {
        id: u64,
        #[arg(long)]
        cidr: String,
    },
    /// Delete a pool and its free blocks
    Delete { id: u64 },
    /// List pools
    List {
        #[arg(short, long)]
        zone: Option<u64>,
        #[arg(long)]
        cidr: Option<String>,
        #[arg(long)]
        domain: Option<u64>,
        #[arg(long)]
        account: Option<u64>,
    },
    /// Dedicate a pool to a domain or an account
    Dedicate {
        id: u64,
        #[arg(long)]
        domain: Option<u64>,
        #[arg(long)]
        account: Option<u64>,
    },
    /// Remove the dedication of a pool
    Release { id: u64 },
}

#[derive(Subcommand)]
pub enum AllocationCommands {
    /// Carve a free block out of a pool
    Create {
        /// Pool ID
        #[arg(short, long)]
        parent: u64,
        #[arg(long, conflicts_with = "prefix_length", required_unless_present = "prefix_length")]
        cidr: Option<String>,
        #[arg(long)]
        prefix_length: Option<u8>,
    },
    /// Delete a free block
    Delete { id: u64 },
    /// List blocks
    List {
        #[arg(short, long)]
        zone: Option<u64>,
        #[arg(short, long)]
        parent: Option<u64>,
    },
    /// Bind a block to a guest network
    Assign {
        #[arg(short, long)]
        network: u64,
        #[arg(long, conflicts_with = "prefix_length", required_unless_present = "prefix_length")]
        cidr: Option<String>,
        #[arg(long)]
        prefix_length: Option<u8>,
    },
    /// Return the block of a guest network to its pool
    Release {
        #[arg(short, long)]
        network: u64,
    },
}

#[derive(Subcommand)]
pub enum ControllerCommands {
    /// List controllers
    List {
        #[arg(short, long)]
        zone: Option<u64>,
        #[arg(short, long)]
        state: Option<ControllerState>,
        /// Only controllers waiting for the GC sweep
        #[arg(long)]
        gc: bool,
    },
    /// Destroy a controller with its VMs and network rules
    Destroy { id: u64 },
    /// Flag a controller for the GC sweep
    Mark { id: u64 },
    /// Retry destroy for every controller pending GC
    Gc,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Traffic {
    Ingress,
    Egress,
}

#[derive(Subcommand)]
pub enum FirewallCommands {
    /// Create a rule on a guest network
    Create {
        #[arg(short, long)]
        network: u64,
        #[arg(short, long)]
        protocol: Protocol,
        #[arg(short, long, value_enum)]
        traffic: Traffic,
        #[arg(long)]
        start_port: Option<u16>,
        #[arg(long)]
        end_port: Option<u16>,
        #[arg(long)]
        icmp_type: Option<i32>,
        #[arg(long)]
        icmp_code: Option<i32>,
        #[arg(long = "source-cidr")]
        source_cidrs: Vec<String>,
        #[arg(long = "destination-cidr")]
        destination_cidrs: Vec<String>,
        /// Hide the rule from end users
        #[arg(long)]
        hidden: bool,
    },
    /// List the rules of a network
    List {
        #[arg(short, long)]
        network: u64,
    },
    /// Change whether a rule is shown to end users
    Update {
        id: u64,
        #[arg(long, action = clap::ArgAction::Set)]
        display: bool,
    },
    /// Mark a rule for removal
    Revoke { id: u64 },
    /// Push pending changes of the rule's network
    Apply { id: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("cirrus {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load().context("Failed to load settings")?;

    // stdout is reserved for command output
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| settings.state_dir.clone());
    tracing::debug!(state_dir = %state_dir.display(), "Opening state");

    let manager = StateManager::new(&state_dir);
    let lock = manager.acquire_lock().await?;
    let store = Store::open(manager)
        .await
        .with_context(|| format!("Failed to open state in {}", state_dir.display()))?;
    let app = utils::App::new(store, &settings, cli.json);

    let result = match cli.command {
        Commands::Subnet(cmd) => commands::subnet::handle(&app, cmd).await,
        Commands::Allocation(cmd) => commands::allocation::handle(&app, cmd).await,
        Commands::Controller(cmd) => commands::controller::handle(&app, cmd).await,
        Commands::Firewall(cmd) => commands::firewall::handle(&app, cmd).await,
        Commands::Version => Ok(()),
    };

    lock.release().await?;
    result
}
