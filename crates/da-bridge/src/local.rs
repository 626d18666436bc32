//! In-process DA chain
//!
//! Seals pending extrinsics into numbered blocks, either on demand or on a
//! fixed interval. Several nodes in one process can share a single instance,
//! which gives a working multi-sequencer devnet without an external DA node.

use crate::{CallIndex, DaBlock, DaClient, DaError, DaExtrinsic, ExtrinsicStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use settlement_primitives::H256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Call index of the data-submission call on the local chain
pub const LOCAL_CALL_INDEX: CallIndex = CallIndex {
    section: 29,
    method: 1,
};

#[derive(Default)]
struct LocalDaState {
    blocks: Vec<DaBlock>,
    pending: Vec<(H256, DaExtrinsic)>,
    statuses: HashMap<H256, ExtrinsicStatus>,
    balances: HashMap<[u8; 32], u128>,
}

/// In-memory DA chain
pub struct LocalDa {
    state: RwLock<LocalDaState>,
    unavailable: AtomicBool,
    /// Blocks at or below `head - finality_depth` report `Finalized`
    finality_depth: u64,
}

impl LocalDa {
    /// Create a chain holding only its genesis block
    pub fn new() -> Self {
        let genesis = DaBlock {
            number: 0,
            hash: H256::digest(b"local-da-genesis"),
            parent_hash: H256::ZERO,
            timestamp: chrono::Utc::now().timestamp() as u64,
            extrinsics: Vec::new(),
        };
        Self {
            state: RwLock::new(LocalDaState {
                blocks: vec![genesis],
                ..Default::default()
            }),
            unavailable: AtomicBool::new(false),
            finality_depth: 2,
        }
    }

    pub fn call_index(&self) -> CallIndex {
        LOCAL_CALL_INDEX
    }

    /// Credit a DA account
    pub fn fund(&self, account: [u8; 32], amount: u128) {
        *self.state.write().balances.entry(account).or_default() += amount;
    }

    /// Simulate a network outage: every client call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Include an extrinsic directly, bypassing submission
    pub fn inject(&self, extrinsic: DaExtrinsic) {
        let hash = extrinsic.hash();
        let mut state = self.state.write();
        state.statuses.insert(hash, ExtrinsicStatus::Ready);
        state.pending.push((hash, extrinsic));
    }

    /// Seal every pending extrinsic into a new block
    pub fn seal_block(&self) -> DaBlock {
        let mut state = self.state.write();
        let parent = state
            .blocks
            .last()
            .map(|b| (b.number, b.hash))
            .unwrap_or((0, H256::ZERO));
        let number = parent.0 + 1;

        let pending = std::mem::take(&mut state.pending);
        let mut preimage = Vec::with_capacity(40 + pending.len() * 32);
        preimage.extend_from_slice(parent.1.as_ref());
        preimage.extend_from_slice(&number.to_le_bytes());
        let mut extrinsics = Vec::with_capacity(pending.len());
        for (hash, ext) in pending {
            preimage.extend_from_slice(hash.as_ref());
            state.statuses.insert(hash, ExtrinsicStatus::InBlock(number));
            extrinsics.push(ext);
        }

        let block = DaBlock {
            number,
            hash: H256::digest(&preimage),
            parent_hash: parent.1,
            timestamp: chrono::Utc::now().timestamp() as u64,
            extrinsics,
        };
        state.blocks.push(block.clone());

        let finalized_below = number.saturating_sub(self.finality_depth);
        for status in state.statuses.values_mut() {
            if let ExtrinsicStatus::InBlock(n) = *status {
                if n <= finalized_below {
                    *status = ExtrinsicStatus::Finalized(n);
                }
            }
        }

        block
    }

    /// Seal a block every `interval` until the handle is aborted
    pub fn spawn_producer(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let block = self.seal_block();
                tracing::trace!(
                    "Local DA sealed block {} with {} extrinsics",
                    block.number,
                    block.extrinsics.len()
                );
            }
        })
    }

    pub fn block_at(&self, number: u64) -> Option<DaBlock> {
        self.state.read().blocks.get(number as usize).cloned()
    }

    pub fn head_number(&self) -> u64 {
        self.state
            .read()
            .blocks
            .last()
            .map(|b| b.number)
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), DaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DaError::Connection("local DA unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for LocalDa {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaClient for LocalDa {
    async fn account_balance(&self, account: &[u8; 32]) -> Result<u128, DaError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .balances
            .get(account)
            .copied()
            .unwrap_or_default())
    }

    async fn find_call_index(&self) -> Result<CallIndex, DaError> {
        self.check_available()?;
        Ok(LOCAL_CALL_INDEX)
    }

    async fn best_block_number(&self) -> Result<u64, DaError> {
        self.check_available()?;
        Ok(self.head_number())
    }

    async fn block(&self, number: u64) -> Result<Option<DaBlock>, DaError> {
        self.check_available()?;
        Ok(self.block_at(number))
    }

    async fn submit(&self, extrinsic: DaExtrinsic) -> Result<H256, DaError> {
        self.check_available()?;
        let hash = extrinsic.hash();
        if self.state.read().statuses.contains_key(&hash) {
            return Err(DaError::Submission(format!("extrinsic {} already known", hash)));
        }
        self.inject(extrinsic);
        Ok(hash)
    }

    async fn extrinsic_status(&self, hash: &H256) -> Result<ExtrinsicStatus, DaError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .statuses
            .get(hash)
            .copied()
            .unwrap_or(ExtrinsicStatus::Dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DaAccount;
    use settlement_primitives::NodeKey;

    #[test]
    fn test_blocks_are_chained() {
        let da = LocalDa::new();
        let one = da.seal_block();
        let two = da.seal_block();

        assert_eq!(one.number, 1);
        assert_eq!(two.parent_hash, one.hash);
        assert_eq!(da.head_number(), 2);
    }

    #[tokio::test]
    async fn test_status_moves_to_finalized() {
        let da = LocalDa::new();
        let account = DaAccount::new(NodeKey::generate());
        let ext = DaExtrinsic::signed(&account, 1, LOCAL_CALL_INDEX, 0, vec![1]);
        let hash = da.submit(ext).await.unwrap();

        assert_eq!(da.extrinsic_status(&hash).await.unwrap(), ExtrinsicStatus::Ready);
        da.seal_block();
        assert_eq!(da.extrinsic_status(&hash).await.unwrap(), ExtrinsicStatus::InBlock(1));
        da.seal_block();
        da.seal_block();
        assert_eq!(da.extrinsic_status(&hash).await.unwrap(), ExtrinsicStatus::Finalized(1));
    }

    #[tokio::test]
    async fn test_balance_and_outage() {
        let da = LocalDa::new();
        da.fund([1u8; 32], 500);
        assert_eq!(da.account_balance(&[1u8; 32]).await.unwrap(), 500);

        da.set_unavailable(true);
        assert!(matches!(
            da.best_block_number().await,
            Err(DaError::Connection(_))
        ));
    }
}
