//! Settlement Node
//!
//! Runs a DA-clocked sequencer devnet in one process: a local DA chain, a
//! staking registry, the configured node and any number of extra sequencers.
//! The configured node serves JSON-RPC.

use anyhow::Result;
use clap::Parser;
use config::{GenesisAccount, NodeConfig};
use devnet::Devnet;
use rpc_server::HttpRpcServer;
use settlement_primitives::Role;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod devnet;

/// DA-clocked settlement sequencer
#[derive(Parser, Debug)]
#[command(name = "settlement-node")]
#[command(about = "DA-clocked sequencer devnet for the settlement chain", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node role (bootstrap-sequencer, sequencer, validator, watchtower)
    #[arg(long)]
    role: Option<Role>,

    /// Extra in-process sequencers
    #[arg(long)]
    sequencers: Option<usize>,

    /// Minimum spacing between block timestamps in milliseconds, at least 1000
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Local DA block interval in milliseconds
    #[arg(long)]
    da_block_time_ms: Option<u64>,

    /// DA application id
    #[arg(long)]
    app_id: Option<u32>,

    /// HTTP RPC bind address
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Data directory for persistent chain data
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Genesis allocation as ADDRESS=BALANCE, repeatable
    #[arg(long = "alloc")]
    alloc: Vec<GenesisAccount>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(sequencers) = self.sequencers {
            config.sequencers = sequencers;
        }
        if let Some(ms) = self.block_time_ms {
            config.block_time_ms = ms;
        }
        if let Some(ms) = self.da_block_time_ms {
            config.da_block_time_ms = ms;
        }
        if let Some(app_id) = self.app_id {
            config.app_id = app_id;
        }
        if let Some(addr) = self.rpc_addr {
            config.rpc_addr = addr;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        config.alloc.extend(self.alloc);

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config()?;

    tracing::info!("Starting settlement node - {}", config.role.as_str().to_uppercase());
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Extra sequencers: {}", config.sequencers);
    tracing::info!("  Block time: {}ms", config.block_time_ms);
    tracing::info!("  DA block time: {}ms", config.da_block_time_ms);
    tracing::info!("  App id: {}", config.app_id);
    match &config.data_dir {
        Some(dir) => tracing::info!("  Data directory: {:?}", dir),
        None => tracing::info!("  Data directory: none, chain kept in memory"),
    }
    for account in &config.alloc {
        tracing::info!("  Genesis account {}: {}", account.address, account.balance);
    }

    let devnet = Devnet::start(&config)?;

    // Start HTTP RPC server
    let http_context = Arc::new(devnet.rpc_context());
    let http_addr = config.rpc_addr.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpRpcServer::new(http_context);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP RPC server error: {}", e);
        }
    });

    tracing::info!("Node {} running. Press Ctrl+C to stop.", devnet.primary().address);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    http_server.abort();
    devnet.shutdown().await?;

    tracing::info!("Node stopped");
    Ok(())
}
