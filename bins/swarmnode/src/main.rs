//! Swarmnode daemon
//!
//! Loads keys, wires the onion pipeline to the peer bus and runs until
//! interrupted. Swarm composition arrives from the external chain
//! poller; until the first block update lands the node answers 503.

mod rpc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swarmnode_core::{Config, RateLimiter, SwarmTracker};
use swarmnode_crypto::{ChannelCipher, LegacyPubkey, RequestSigner, X25519Seckey};
use swarmnode_net::{BusClient, BusServer, HttpRelay};
use swarmnode_onion::OnionDispatcher;

use rpc::SnodeRpc;

/// Storage service node
#[derive(Parser)]
#[command(name = "swarmnode")]
#[command(author, version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "/etc/swarmnode/swarmnode.toml")]
    config: PathBuf,

    /// Public IPv4 address to advertise
    #[arg(long)]
    ip: Option<String>,

    /// Client-facing port
    #[arg(long)]
    port: Option<u16>,

    /// Peer message bus port
    #[arg(long)]
    lmq_port: Option<u16>,

    /// Log level (trace|debug|info|warn|error|critical)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run against the test network
    #[arg(long)]
    testnet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,

    /// Print a default config
    GenConfig {
        /// Output path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        Config::default()
    };

    // CLI flags win over the file
    if let Some(ip) = cli.ip {
        config.ip = ip;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(lmq_port) = cli.lmq_port {
        config.lmq_port = lmq_port;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if cli.testnet {
        config.testnet = true;
    }
    config.validate().context("Invalid configuration")?;

    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" | "critical" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Start => cmd_start(config).await,
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_start(config: Config) -> Result<()> {
    info!("Starting swarmnode...");
    if config.testnet {
        info!("Running against the test network");
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;

    // Long-lived keys from the keystore; generated on first start
    let x25519 = X25519Seckey::from_bytes(load_or_create_key(
        &config.data_dir.join("key_x25519"),
    )?);
    let signer = RequestSigner::from_seed(load_or_create_key(
        &config.data_dir.join("key_ed25519"),
    )?);
    let legacy = LegacyPubkey::from_bytes(load_or_create_key(
        &config.data_dir.join("key_legacy"),
    )?);

    let cipher = Arc::new(ChannelCipher::new(x25519));
    info!(pubkey_x25519 = %cipher.public_key(), "channel key loaded");
    info!(pubkey_ed25519 = %signer.public_key(), "signing key loaded");

    let limits = config.limits();
    let tracker = Arc::new(SwarmTracker::new(legacy));
    let limiter = Arc::new(RateLimiter::new());

    let dispatcher = Arc::new(OnionDispatcher::new(
        cipher,
        tracker.clone(),
        Arc::new(BusClient::new(limits.session_timeout)),
        Arc::new(HttpRelay::new(limits.session_timeout)?),
        Arc::new(SnodeRpc::new(tracker.clone())),
        signer.public_key(),
        256,
        limits.session_timeout,
    ));

    let bus_addr = format!("{}:{}", config.ip, config.lmq_port);
    let listener = TcpListener::bind(&bus_addr)
        .await
        .with_context(|| format!("Failed to bind message bus on {bus_addr}"))?;

    let server = Arc::new(BusServer::new(
        dispatcher,
        tracker,
        limiter,
        limits.max_request_body,
    ));

    let server_task = tokio::spawn(server.clone().run(listener));

    info!("swarmnode started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop();
    server_task.await??;

    info!("swarmnode stopped");
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let text = toml::to_string_pretty(&config)?;

    if let Some(path) = output {
        std::fs::write(&path, &text)?;
        println!("Config written to {path:?}");
    } else {
        println!("{text}");
    }
    Ok(())
}

/// Read a 32-byte hex key file, creating it on first start
fn load_or_create_key(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {path:?}"))?;
        let bytes = hex::decode(text.trim())
            .with_context(|| format!("Key file {path:?} is not hex"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Key file {path:?} is not 32 bytes"))?;
        Ok(key)
    } else {
        let key: [u8; 32] = rand::random();
        std::fs::write(path, hex::encode(key))
            .with_context(|| format!("Failed to write key file {path:?}"))?;
        info!(?path, "generated new key");
        Ok(key)
    }
}
