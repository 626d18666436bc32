//! In-memory settlement chain with optional sled persistence

use crate::persistence::{ChainMetadata, PersistentStore};
use parking_lot::RwLock;
use settlement_consensus::{ChainError, ChainStore};
use settlement_primitives::{Header, SettlementBlock, H256, DEFAULT_GENESIS_GAS_LIMIT};
use std::collections::{BTreeMap, HashMap};

/// Gas limit adjustment between consecutive blocks
#[derive(Debug, Clone)]
pub struct GasLimitPolicy {
    /// Limit the chain drifts toward
    pub target: u64,
    /// Never go below this
    pub floor: u64,
}

impl Default for GasLimitPolicy {
    fn default() -> Self {
        Self {
            target: DEFAULT_GENESIS_GAS_LIMIT,
            floor: 5_000,
        }
    }
}

impl GasLimitPolicy {
    /// Move `parent` toward the target by at most `parent / 1024`
    pub fn next(&self, parent: u64) -> u64 {
        let delta = (parent / 1024).max(1);
        let next = if parent < self.target {
            (parent + delta).min(self.target)
        } else if parent > self.target {
            parent.saturating_sub(delta).max(self.target)
        } else {
            parent
        };
        next.max(self.floor)
    }
}

struct ChainState {
    head: Header,
    headers: HashMap<H256, Header>,
    blocks: HashMap<H256, SettlementBlock>,
    canonical: BTreeMap<u64, H256>,
}

/// `ChainStore` keeping every block in memory
///
/// A block is canonical when it extends the current head. Blocks with a known
/// parent that don't extend the head are kept as side blocks so fraud checks
/// can still find them.
pub struct MemoryChain {
    state: RwLock<ChainState>,
    policy: GasLimitPolicy,
    store: Option<PersistentStore>,
}

impl MemoryChain {
    pub fn new(genesis: Header, policy: GasLimitPolicy) -> Self {
        let mut canonical = BTreeMap::new();
        canonical.insert(genesis.number, genesis.hash);
        Self {
            state: RwLock::new(ChainState {
                headers: HashMap::from([(genesis.hash, genesis.clone())]),
                blocks: HashMap::from([(
                    genesis.hash,
                    SettlementBlock {
                        header: genesis.clone(),
                        transactions: Vec::new(),
                        receipts: Vec::new(),
                    },
                )]),
                head: genesis,
                canonical,
            }),
            policy,
            store: None,
        }
    }

    /// Chain backed by `store`, replaying every canonical block it holds
    pub fn open(
        genesis: Header,
        policy: GasLimitPolicy,
        store: PersistentStore,
    ) -> Result<Self, ChainError> {
        let stored = store
            .canonical_blocks()
            .map_err(|e| ChainError::Storage(e.to_string()))?;

        let mut chain = Self::new(genesis, policy);
        let mut restored = 0usize;
        for entry in stored {
            chain.insert(&entry.block)?;
            restored += 1;
        }
        chain.store = Some(store);

        tracing::info!(
            "Restored {} blocks from disk, head at {}",
            restored,
            chain.head_number()
        );
        Ok(chain)
    }

    /// Link `block` into memory. Returns whether it became the new head.
    fn insert(&self, block: &SettlementBlock) -> Result<bool, ChainError> {
        let mut state = self.state.write();

        let parent = state
            .headers
            .get(&block.parent_hash())
            .ok_or(ChainError::UnknownParent {
                number: block.number(),
                parent: block.parent_hash(),
            })?;
        if block.number() != parent.number + 1 {
            return Err(ChainError::NotNextBlock {
                number: block.number(),
                head: parent.number,
            });
        }

        let extends_head = block.parent_hash() == state.head.hash;
        state.headers.insert(block.hash(), block.header.clone());
        state.blocks.insert(block.hash(), block.clone());
        if extends_head {
            state.head = block.header.clone();
            state.canonical.insert(block.number(), block.hash());
        }

        Ok(extends_head)
    }

    fn persist(&self, block: &SettlementBlock, source: &str, canonical: bool) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.store_block(block, source, canonical)?;
        if canonical {
            store.save_metadata(&ChainMetadata {
                head_number: block.number(),
                head_hash: block.hash().0,
                block_count: store.block_count() as u64,
                last_save_ts: chrono::Utc::now().timestamp(),
            })?;
        }
        store.flush()
    }

    pub fn head_number(&self) -> u64 {
        self.state.read().head.number
    }

    pub fn block_by_number(&self, number: u64) -> Option<SettlementBlock> {
        let state = self.state.read();
        let hash = state.canonical.get(&number)?;
        state.blocks.get(hash).cloned()
    }

    /// Number of blocks held, side blocks included
    pub fn len(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainStore for MemoryChain {
    fn header(&self) -> Header {
        self.state.read().head.clone()
    }

    fn write_block(&self, block: &SettlementBlock, source: &str) -> Result<(), ChainError> {
        if self.state.read().blocks.contains_key(&block.hash()) {
            tracing::debug!("Block {} already known", block.hash());
            return Ok(());
        }

        let canonical = self.insert(block)?;
        self.persist(block, source, canonical)
            .map_err(|e| ChainError::Storage(e.to_string()))?;

        if canonical {
            tracing::info!(
                "Block {} ({}) written by {}: {} txs, gas {}/{}",
                block.number(),
                block.hash(),
                source,
                block.transactions.len(),
                block.header.gas_used,
                block.header.gas_limit
            );
        } else {
            tracing::warn!(
                "Side block {} ({}) from {} does not extend head",
                block.number(),
                block.hash(),
                source
            );
        }
        Ok(())
    }

    fn calculate_gas_limit(&self, number: u64) -> Result<u64, ChainError> {
        let state = self.state.read();
        let parent_number = number
            .checked_sub(1)
            .ok_or_else(|| ChainError::Storage("genesis has no parent".to_string()))?;
        let parent = state
            .canonical
            .get(&parent_number)
            .and_then(|hash| state.headers.get(hash))
            .ok_or_else(|| {
                ChainError::Storage(format!("no canonical block at {}", parent_number))
            })?;
        Ok(self.policy.next(parent.gas_limit))
    }

    fn block_by_hash(&self, hash: &H256) -> Option<SettlementBlock> {
        self.state.read().blocks.get(hash).cloned()
    }

    fn header_by_hash(&self, hash: &H256) -> Option<Header> {
        self.state.read().headers.get(hash).cloned()
    }
}
