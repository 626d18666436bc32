//! Block production for the current leader
//!
//! A block becomes visible to other nodes only through the DA chain, so the
//! local chain is written strictly after the DA chain reports the block in a
//! block. Anything that fails before that point leaves no local trace.

use crate::fraud::DisputeView;
use crate::interfaces::{
    BlockPublisher, ChainError, ChainStore, ExecutionError, StateExecutor, TxPool,
};
use crate::selector::TransactionSelector;
use chrono::Utc;
use da_bridge::DaError;
use settlement_primitives::{
    transactions_root, ExtraData, Header, NodeKey, Role, SettlementBlock, H256,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Minimum spacing between block timestamps
    pub block_time: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            block_time: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProductionError {
    #[error("parent {0} is under fraud dispute")]
    ParentDisputed(H256),

    #[error("cannot derive gas limit: {0}")]
    GasLimit(#[source] ChainError),

    #[error("cannot open state transition: {0}")]
    Execution(#[from] ExecutionError),

    #[error("DA publish failed: {0}")]
    Publish(#[source] DaError),

    /// The block is on the DA chain but not in the local chain
    #[error("block {number} ({hash}) published but local commit failed: {source}")]
    LocalCommit {
        number: u64,
        hash: H256,
        #[source]
        source: ChainError,
    },
}

impl ProductionError {
    /// Published to DA without a matching local write
    pub fn is_fatal_inconsistency(&self) -> bool {
        matches!(self, ProductionError::LocalCommit { .. })
    }
}

pub struct BlockProducer {
    config: ProducerConfig,
    key: Arc<NodeKey>,
    role: Role,
    chain: Arc<dyn ChainStore>,
    executor: Arc<dyn StateExecutor>,
    pool: Arc<dyn TxPool>,
    selector: TransactionSelector,
    publisher: Arc<dyn BlockPublisher>,
}

impl BlockProducer {
    pub fn new(
        config: ProducerConfig,
        key: Arc<NodeKey>,
        role: Role,
        chain: Arc<dyn ChainStore>,
        executor: Arc<dyn StateExecutor>,
        pool: Arc<dyn TxPool>,
        publisher: Arc<dyn BlockPublisher>,
    ) -> Self {
        Self {
            config,
            key,
            role,
            chain,
            executor,
            selector: TransactionSelector::new(pool.clone()),
            pool,
            publisher,
        }
    }

    /// Header timestamps have one-second resolution, so spacing is rounded
    /// down to whole seconds with a floor of one. When DA ticks arrive faster
    /// than `block_time`, timestamps run ahead of the wall clock.
    fn next_timestamp(&self, parent: &Header) -> u64 {
        let spacing = self.config.block_time.as_secs().max(1);
        let now = Utc::now().timestamp().max(0) as u64;
        now.max(parent.timestamp + spacing)
    }

    /// Build, seal, publish and commit the child of `parent`
    pub async fn produce(
        &self,
        parent: &Header,
        disputes: &dyn DisputeView,
    ) -> Result<SettlementBlock, ProductionError> {
        if disputes.is_disputed(&parent.hash) {
            return Err(ProductionError::ParentDisputed(parent.hash));
        }

        let number = parent.number + 1;
        let miner = self.key.address();
        let gas_limit = self
            .chain
            .calculate_gas_limit(number)
            .map_err(ProductionError::GasLimit)?;

        let mut header = Header {
            parent_hash: parent.hash,
            number,
            miner,
            gas_limit,
            gas_used: 0,
            timestamp: self.next_timestamp(parent),
            state_root: H256::ZERO,
            tx_root: H256::ZERO,
            extra: ExtraData {
                validators: vec![miner],
                seal: None,
                fraud_check: None,
            },
            hash: H256::ZERO,
        };

        let mut transition = self.executor.begin_txn(parent.state_root, &header, miner)?;
        let selection = self.selector.select(gas_limit, transition.as_mut());
        let (_logs, state_root) = transition.commit();

        header.state_root = state_root;
        header.gas_used = transition.total_gas();
        header.tx_root = transactions_root(&selection.included);
        let receipts = transition.receipts();
        drop(transition);

        header.write_seal(&self.key);

        let block = SettlementBlock {
            header,
            transactions: selection.included,
            receipts,
        };

        tracing::info!(
            "Sealed block {} ({}) with {} txs, {} demoted, {} dropped",
            block.number(),
            block.hash(),
            block.transactions.len(),
            selection.demoted.len(),
            selection.dropped.len()
        );

        let included = self
            .publisher
            .publish(&block)
            .await
            .map_err(ProductionError::Publish)?;

        tracing::info!(
            "Block {} included in DA block {} (extrinsic {})",
            block.number(),
            included.block_number,
            included.tx_hash
        );

        self.chain
            .write_block(&block, self.role.as_str())
            .map_err(|source| ProductionError::LocalCommit {
                number: block.number(),
                hash: block.hash(),
                source,
            })?;

        self.pool.reset_with_header(&block.header);

        Ok(block)
    }
}
