//! Command-line interface for the cosign node

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use cosign_consensus::schnorr::PrivateKey;
use cosign_consensus::{account_address, ChainService, ConsensusMode};
use prometheus::{Encoder, TextEncoder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;
use crate::network::LocalNetwork;
use crate::node::ProducerNode;

/// Cosign node CLI
#[derive(Parser, Debug)]
#[command(name = "cosign-node")]
#[command(about = "Producer node for the cosign chain", long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Bft,
    Solo,
}

impl From<Mode> for ConsensusMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Bft => ConsensusMode::Bft,
            Mode::Solo => ConsensusMode::Solo,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a producer key
    Keygen,

    /// Write one config file per producer into a directory
    InitConfig {
        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Number of producers
        #[arg(short, long, default_value = "4")]
        producers: usize,

        #[arg(long, value_enum, default_value = "bft")]
        mode: Mode,
    },

    /// Run every producer in one process over an in-memory network
    Devnet {
        /// Load configs written by init-config instead of generating fresh ones
        #[arg(short, long, value_name = "DIR")]
        config_dir: Option<PathBuf>,

        /// Number of producers when generating configs
        #[arg(short, long, default_value = "4")]
        producers: usize,

        /// Heights to attempt before exiting
        #[arg(short, long, default_value = "5")]
        blocks: u64,

        /// How many producers are brought online
        #[arg(long)]
        online: Option<usize>,

        /// Dump prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
    },
}

/// Parse CLI arguments
pub fn parse() -> Cli {
    Cli::parse()
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Keygen => cmd_keygen(),
        Commands::InitConfig { output, producers, mode } => cmd_init_config(output, producers, mode.into()),
        Commands::Devnet {
            config_dir,
            producers,
            blocks,
            online,
            metrics,
        } => cmd_devnet(config_dir, producers, blocks, online, metrics).await,
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn cmd_keygen() -> anyhow::Result<()> {
    let key = PrivateKey::generate();
    let pubkey = key.public_key();
    println!("private key: {}", key.to_hex());
    println!("public key:  {}", pubkey.to_hex());
    println!("address:     {}", account_address(&pubkey));
    Ok(())
}

fn cmd_init_config(output: PathBuf, producers: usize, mode: ConsensusMode) -> anyhow::Result<()> {
    if producers == 0 {
        bail!("need at least one producer");
    }
    std::fs::create_dir_all(&output).with_context(|| format!("creating {}", output.display()))?;

    for config in NodeConfig::devnet(producers, mode) {
        let path = output.join(format!("{}.json", config.node_id));
        config
            .save_to_file(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn load_configs(dir: &Path) -> anyhow::Result<Vec<NodeConfig>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| NodeConfig::from_file(path).with_context(|| format!("loading {}", path.display())))
        .collect()
}

async fn cmd_devnet(
    config_dir: Option<PathBuf>,
    producers: usize,
    blocks: u64,
    online: Option<usize>,
    metrics: bool,
) -> anyhow::Result<()> {
    let configs = match config_dir {
        Some(dir) => load_configs(&dir)?,
        None if producers == 1 => NodeConfig::devnet(1, ConsensusMode::Solo),
        None => NodeConfig::devnet(producers, ConsensusMode::Bft),
    };
    if configs.is_empty() {
        bail!("no node configs found");
    }

    let network = LocalNetwork::new();
    let nodes = configs
        .into_iter()
        .map(|config| ProducerNode::new(config, network.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let online = online.unwrap_or(nodes.len()).min(nodes.len());
    for node in nodes.iter().take(online) {
        network.set_online(node.id(), true)?;
    }
    info!(producers = nodes.len(), online, "devnet started");

    for _ in 0..blocks {
        let handles: Vec<_> = nodes
            .iter()
            .take(online)
            .cloned()
            .map(|node: Arc<ProducerNode>| tokio::spawn(async move { node.produce_block().await }))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await? {
                warn!(error = %e, "height attempt failed");
            }
        }
    }

    for node in &nodes {
        let address = account_address(&node.engine().public_key());
        println!(
            "{}: height {} root {} balance {}",
            node.id(),
            node.chain().best_height(),
            hex::encode(node.chain().state_root()),
            node.chain().balance(&address)
        );
    }

    if metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        println!("{}", String::from_utf8_lossy(&buffer));
    }
    Ok(())
}
