//! Persistence Layer for the settlement chain
//!
//! Uses sled embedded database to keep blocks across restarts. Every block
//! the chain accepts is written here; the canonical index maps numbers to
//! hashes so the chain can be rebuilt in order.

use serde::{Deserialize, Serialize};
use settlement_primitives::{SettlementBlock, H256};
use sled::Db;
use std::path::Path;

/// Metadata about the chain state
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChainMetadata {
    /// Canonical head number
    pub head_number: u64,
    /// Canonical head hash
    pub head_hash: [u8; 32],
    /// Total blocks stored, side blocks included
    pub block_count: u64,
    /// Last save timestamp
    pub last_save_ts: i64,
}

/// A block together with the role that wrote it
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredBlock {
    pub block: SettlementBlock,
    pub source: String,
}

/// Persistent storage for settlement blocks
pub struct PersistentStore {
    /// Sled database instance
    db: Db,
    /// hash -> StoredBlock
    blocks: sled::Tree,
    /// big-endian number -> hash, canonical chain only
    canonical: sled::Tree,
    /// Metadata tree
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let blocks = db.open_tree("blocks")?;
        let canonical = db.open_tree("canonical")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            blocks,
            canonical,
            metadata,
        })
    }

    /// Store a block, indexing it as canonical when asked to
    pub fn store_block(
        &self,
        block: &SettlementBlock,
        source: &str,
        canonical: bool,
    ) -> anyhow::Result<()> {
        let stored = StoredBlock {
            block: block.clone(),
            source: source.to_string(),
        };
        let bytes = bincode::serialize(&stored)?;
        self.blocks.insert(block.hash().as_ref(), bytes)?;

        if canonical {
            self.canonical
                .insert(block.number().to_be_bytes(), block.hash().as_ref())?;
        }

        Ok(())
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &H256) -> anyhow::Result<Option<StoredBlock>> {
        match self.blocks.get(hash.as_ref())? {
            Some(bytes) => {
                let stored: StoredBlock = bincode::deserialize(&bytes)?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Canonical blocks in ascending number order
    pub fn canonical_blocks(&self) -> anyhow::Result<Vec<StoredBlock>> {
        let mut blocks = Vec::new();

        for result in self.canonical.iter() {
            let (key, value) = result?;

            let hash_bytes: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid hash length under key {:?}", key))?;
            let hash = H256(hash_bytes);

            let stored = self
                .get_block(&hash)?
                .ok_or_else(|| anyhow::anyhow!("Canonical block {} missing", hash))?;
            blocks.push(stored);
        }

        Ok(blocks)
    }

    /// Save chain metadata
    pub fn save_metadata(&self, metadata: &ChainMetadata) -> anyhow::Result<()> {
        let bytes = bincode::serialize(metadata)?;
        self.metadata.insert("chain", bytes)?;
        Ok(())
    }

    /// Load chain metadata
    pub fn load_metadata(&self) -> anyhow::Result<Option<ChainMetadata>> {
        match self.metadata.get("chain")? {
            Some(bytes) => {
                let metadata: ChainMetadata = bincode::deserialize(&bytes)?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        self.blocks.clear()?;
        self.canonical.clear()?;
        self.metadata.clear()?;
        Ok(())
    }
}
