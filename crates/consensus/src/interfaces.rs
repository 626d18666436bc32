//! Collaborator contracts
//!
//! The worker drives these but owns none of them: chain storage, the state
//! executor, the transaction pool, the staking registry and the DA publisher
//! are all supplied by the node.

use crate::fraud::FraudRecord;
use async_trait::async_trait;
use da_bridge::{DaError, DaSender, SubmitResult, WaitFor};
use serde::{Deserialize, Serialize};
use settlement_primitives::{
    Address, Header, Log, NodeKey, Receipt, Role, SettlementBlock, Transaction, H256,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("parent {parent} of block {number} is unknown")]
    UnknownParent { number: u64, parent: H256 },

    #[error("block {number} does not extend head {head}")]
    NotNextBlock { number: u64, head: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Local chain storage
pub trait ChainStore: Send + Sync {
    /// Current head header
    fn header(&self) -> Header;

    /// Append a block. Writing a block that is already stored is a no-op.
    fn write_block(&self, block: &SettlementBlock, source: &str) -> Result<(), ChainError>;

    /// Gas limit for the block at `number`, derived from its parent
    fn calculate_gas_limit(&self, number: u64) -> Result<u64, ChainError>;

    fn block_by_hash(&self, hash: &H256) -> Option<SettlementBlock>;

    fn header_by_hash(&self, hash: &H256) -> Option<Header>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The block has no gas left for this transaction
    #[error("block gas limit reached")]
    GasLimitReached,

    /// The transaction failed; `recoverable` failures may succeed in a later block
    #[error("application error: {reason}")]
    Application { reason: String, recoverable: bool },

    #[error("transition failed: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unknown state root {0}")]
    UnknownStateRoot(H256),

    #[error("execution error: {0}")]
    Other(String),
}

/// An open batch of state changes on top of a parent state root
pub trait Transition: Send {
    fn write(&mut self, tx: &Transaction) -> Result<(), TransitionError>;

    /// Persist the batch and return its logs and the new state root
    fn commit(&mut self) -> (Vec<Log>, H256);

    fn total_gas(&self) -> u64;

    fn receipts(&self) -> Vec<Receipt>;
}

pub trait StateExecutor: Send + Sync {
    fn begin_txn(
        &self,
        parent_root: H256,
        header: &Header,
        coinbase: Address,
    ) -> Result<Box<dyn Transition>, ExecutionError>;
}

/// Pending transactions, highest priority first
pub trait TxPool: Send + Sync {
    /// Snapshot executable transactions for one block
    fn prepare(&self);

    /// Highest-priority transaction of the snapshot, left in place
    fn peek(&self) -> Option<Transaction>;

    /// Remove an included transaction
    fn pop(&self, tx: &Transaction);

    /// Remove a transaction that can never be included
    fn drop_tx(&self, tx: &Transaction);

    /// Move a transaction out of this block, back of its priority class
    fn demote(&self, tx: &Transaction);

    /// Forget transactions made obsolete by a new head
    fn reset_with_header(&self, header: &Header);
}

/// A participant's stake as recorded on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEntry {
    pub address: Address,
    pub amount: u128,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("staking query failed: {0}")]
    Query(String),

    #[error("staking transaction failed: {0}")]
    Transaction(String),

    #[error("{0} has no stake")]
    NotStaked(Address),
}

/// Staking contract view and the transactions this node may issue against it
pub trait StakingRegistry: Send + Sync {
    /// Every stake currently above the participation threshold
    fn stakes(&self) -> Result<Vec<StakeEntry>, RegistryError>;

    fn is_staked(&self, address: &Address) -> Result<bool, RegistryError>;

    /// Penalise the miner of a block proven fraudulent
    fn slash(&self, offender: &Address, record: &FraudRecord) -> Result<(), RegistryError>;

    /// Withdraw the stake owned by `key`
    fn unstake(&self, key: &NodeKey) -> Result<(), RegistryError>;
}

/// Publishes sealed blocks to the DA chain
#[async_trait]
pub trait BlockPublisher: Send + Sync {
    /// Resolves only once the DA chain reports the block in a block
    async fn publish(&self, block: &SettlementBlock) -> Result<SubmitResult, DaError>;
}

#[async_trait]
impl BlockPublisher for DaSender {
    async fn publish(&self, block: &SettlementBlock) -> Result<SubmitResult, DaError> {
        self.send_and_wait_for_status(block.to_bytes(), WaitFor::InBlock)
            .await
    }
}
