//! Node Configuration
//!
//! Loaded from an optional JSON file, then overridden by command-line flags.

use anyhow::{Context, Result};
use da_bridge::AppId;
use serde::{Deserialize, Serialize};
use settlement_primitives::{Address, Role, DEFAULT_GENESIS_GAS_LIMIT};
use std::path::{Path, PathBuf};

/// Pre-funded account in the genesis state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: u64,
}

impl std::str::FromStr for GenesisAccount {
    type Err = anyhow::Error;

    /// `ADDRESS=BALANCE`
    fn from_str(s: &str) -> Result<Self> {
        let (address, balance) = s
            .split_once('=')
            .with_context(|| format!("expected ADDRESS=BALANCE, got {}", s))?;
        Ok(Self {
            address: address
                .trim()
                .parse()
                .with_context(|| format!("invalid address {}", address))?,
            balance: balance
                .trim()
                .parse()
                .with_context(|| format!("invalid balance {}", balance))?,
        })
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Role of the node serving RPC
    pub role: Role,
    /// Extra sequencers run in the same process on the shared DA chain
    pub sequencers: usize,
    /// Minimum spacing between settlement block timestamps, whole seconds only
    pub block_time_ms: u64,
    /// Local DA block interval, one tick each
    pub da_block_time_ms: u64,
    pub app_id: AppId,
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Chain data directory; the chain is memory-only when unset
    pub data_dir: Option<PathBuf>,
    /// Stake bonded by every producing node
    pub stake: u64,
    /// Ticks an accusation stays open without a verdict
    pub dispute_window: u64,
    pub genesis_gas_limit: u64,
    pub genesis_timestamp: u64,
    pub alloc: Vec<GenesisAccount>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::BootstrapSequencer,
            sequencers: 0,
            block_time_ms: 2_000,
            da_block_time_ms: 2_000,
            app_id: 0,
            rpc_addr: "127.0.0.1:8545".to_string(),
            data_dir: None,
            stake: 10_000,
            dispute_window: 10,
            genesis_gas_limit: DEFAULT_GENESIS_GAS_LIMIT,
            genesis_timestamp: 0,
            alloc: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.da_block_time_ms == 0 {
            anyhow::bail!("da_block_time_ms must be positive");
        }
        // header timestamps are whole seconds
        if self.block_time_ms < 1_000 {
            anyhow::bail!("block_time_ms must be at least 1000, got {}", self.block_time_ms);
        }
        if !self.role.produces_blocks() && self.sequencers == 0 {
            anyhow::bail!("a {} node needs at least one in-process sequencer", self.role);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{ "role": "watchtower", "sequencers": 2 }"#).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.role, Role::WatchTower);
        assert_eq!(config.sequencers, 2);
        assert_eq!(config.rpc_addr, "127.0.0.1:8545");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_passive_node_needs_a_sequencer() {
        let config = NodeConfig {
            role: Role::Validator,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_second_block_time_rejected() {
        let config = NodeConfig {
            block_time_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            block_time_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_genesis_account() {
        let address = Address([7; 20]);
        let account: GenesisAccount = format!("{}=500", address).parse().unwrap();
        assert_eq!(account.address, address);
        assert_eq!(account.balance, 500);
        assert!("nobalance".parse::<GenesisAccount>().is_err());
    }
}
