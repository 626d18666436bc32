//! DA Bridge - Talks to the data-availability chain
//!
//! The settlement chain has no gossip layer of its own. Blocks reach other
//! nodes only by being written to the DA chain, and the DA chain's block
//! numbers are the sequencer's clock:
//! - `BlockStream` turns the DA chain into an ordered, gap-free tick source
//! - `DaSender` publishes payloads and waits for a target inclusion status
//! - `LocalDa` is an in-process DA chain for devnets and tests

pub mod blocks;
pub mod local;
pub mod sender;
pub mod stream;

pub use blocks::{AppId, CallIndex, DaAccount, DaBlock, DaExtrinsic, ExtrinsicStatus, WaitFor};
pub use local::{LocalDa, LOCAL_CALL_INDEX};
pub use sender::{DaSender, SenderConfig, SubmitResult};
pub use stream::{BlockStream, StreamConfig};

use async_trait::async_trait;
use settlement_primitives::H256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Extrinsic {0} was dropped by the DA chain")]
    Dropped(H256),

    #[error("Extrinsic {hash} not included within {timeout_ms}ms")]
    InclusionTimeout { hash: H256, timeout_ms: u64 },

    #[error("Call index for data submission not found")]
    CallIndexNotFound,
}

/// Everything the sequencer needs from a DA chain node
#[async_trait]
pub trait DaClient: Send + Sync {
    /// Free balance of a DA account
    async fn account_balance(&self, account: &[u8; 32]) -> Result<u128, DaError>;

    /// Discover the pallet/call index used for data submission
    async fn find_call_index(&self) -> Result<CallIndex, DaError>;

    /// Number of the newest DA block
    async fn best_block_number(&self) -> Result<u64, DaError>;

    /// Fetch a block by number, `None` if it doesn't exist yet
    async fn block(&self, number: u64) -> Result<Option<DaBlock>, DaError>;

    /// Submit a signed extrinsic, returning its hash
    async fn submit(&self, extrinsic: DaExtrinsic) -> Result<H256, DaError>;

    /// Current status of a previously submitted extrinsic
    async fn extrinsic_status(&self, hash: &H256) -> Result<ExtrinsicStatus, DaError>;
}
