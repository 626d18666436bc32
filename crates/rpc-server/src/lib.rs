//! RPC Server - HTTP JSON-RPC for the settlement node
//!
//! Methods:
//! - sendTransaction: base64 borsh-encoded transaction into the pool
//! - getBlockNumber, getBlockByNumber, getBalance: chain queries
//! - getSequencerStatus, getHealth, getVersion: node status

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};

/// RPC Server configuration
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// HTTP RPC bind address
    pub http_addr: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8545".to_string(),
        }
    }
}
