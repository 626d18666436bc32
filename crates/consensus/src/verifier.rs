//! Fraud verification by replaying an accused block

use crate::interfaces::{ChainStore, ExecutionError, StateExecutor, TransitionError};
use settlement_primitives::{transactions_root, Header, SettlementBlock, H256};
use std::sync::Arc;
use thiserror::Error;

/// Outcome of checking a block against the local chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Fraudulent(String),
    /// Not enough local information yet, try again later
    Undetermined(String),
}

pub trait BlockVerifier: Send + Sync {
    fn verify(&self, block: &SettlementBlock) -> Verdict;
}

/// State left behind by re-executing a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replayed {
    pub state_root: H256,
    pub gas_used: u64,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot open parent state: {0}")]
    ParentState(#[from] ExecutionError),

    #[error("transaction {tx} fails: {source}")]
    Transaction {
        tx: H256,
        #[source]
        source: TransitionError,
    },
}

/// Re-execute `block` on `parent`'s state and commit the result, so the
/// executor can build on the returned root afterwards.
pub fn replay_block(
    executor: &dyn StateExecutor,
    parent: &Header,
    block: &SettlementBlock,
) -> Result<Replayed, ReplayError> {
    let header = &block.header;
    let mut transition = executor.begin_txn(parent.state_root, header, header.miner)?;
    for tx in &block.transactions {
        transition
            .write(tx)
            .map_err(|source| ReplayError::Transaction {
                tx: tx.hash(),
                source,
            })?;
    }
    let (_, state_root) = transition.commit();
    Ok(Replayed {
        state_root,
        gas_used: transition.total_gas(),
    })
}

/// Checks seal, linkage and roots, then re-executes the block's transactions
/// on top of its parent's state.
pub struct ReplayVerifier {
    chain: Arc<dyn ChainStore>,
    executor: Arc<dyn StateExecutor>,
}

impl ReplayVerifier {
    pub fn new(chain: Arc<dyn ChainStore>, executor: Arc<dyn StateExecutor>) -> Self {
        Self { chain, executor }
    }
}

impl BlockVerifier for ReplayVerifier {
    fn verify(&self, block: &SettlementBlock) -> Verdict {
        let header = &block.header;

        let signer = match header.recover_signer() {
            Ok(signer) => signer,
            Err(e) => return Verdict::Fraudulent(format!("invalid seal: {}", e)),
        };
        if signer != header.miner {
            return Verdict::Fraudulent(format!(
                "sealed by {} but claims miner {}",
                signer, header.miner
            ));
        }
        if !header.extra.validators.contains(&header.miner) {
            return Verdict::Fraudulent("miner missing from validator list".to_string());
        }

        let mut rehashed = header.clone();
        if rehashed.compute_hash() != header.hash {
            return Verdict::Fraudulent("header hash mismatch".to_string());
        }

        let parent = match self.chain.header_by_hash(&header.parent_hash) {
            Some(parent) => parent,
            None => {
                return Verdict::Undetermined(format!("parent {} unknown", header.parent_hash))
            }
        };
        if header.number != parent.number + 1 {
            return Verdict::Fraudulent(format!(
                "number {} does not follow parent {}",
                header.number, parent.number
            ));
        }
        if transactions_root(&block.transactions) != header.tx_root {
            return Verdict::Fraudulent("transaction root mismatch".to_string());
        }
        if header.gas_used > header.gas_limit {
            return Verdict::Fraudulent(format!(
                "gas used {} exceeds limit {}",
                header.gas_used, header.gas_limit
            ));
        }

        let replayed = match replay_block(self.executor.as_ref(), &parent, block) {
            Ok(replayed) => replayed,
            Err(e @ ReplayError::ParentState(_)) => return Verdict::Undetermined(e.to_string()),
            Err(e) => return Verdict::Fraudulent(e.to_string()),
        };
        if replayed.state_root != header.state_root {
            return Verdict::Fraudulent(format!(
                "state root {} does not match replayed {}",
                header.state_root, replayed.state_root
            ));
        }
        if replayed.gas_used != header.gas_used {
            return Verdict::Fraudulent(format!(
                "gas used {} does not match replayed {}",
                header.gas_used, replayed.gas_used
            ));
        }

        Verdict::Valid
    }
}
