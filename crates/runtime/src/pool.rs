//! Gas-price ordered transaction pool

use parking_lot::Mutex;
use settlement_consensus::TxPool;
use settlement_primitives::{Header, Transaction, H256};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum pending transactions
    pub capacity: usize,
    /// A transaction demoted more often than this is dropped
    pub max_demotions: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            max_demotions: 8,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction {0} already pooled")]
    Duplicate(H256),

    #[error("pool is full ({0} transactions)")]
    Full(usize),

    #[error("transaction has zero gas")]
    ZeroGas,
}

/// Highest gas price first, then arrival order
type Priority = (Reverse<u64>, u64);

#[derive(Default)]
struct PoolInner {
    queue: BTreeMap<Priority, Transaction>,
    index: HashMap<H256, Priority>,
    demotions: HashMap<H256, u32>,
    /// Snapshot taken by `prepare`, consumed by one block
    working: VecDeque<H256>,
    next_seq: u64,
}

impl PoolInner {
    fn push(&mut self, hash: H256, tx: Transaction) {
        let priority = (Reverse(tx.gas_price), self.next_seq);
        self.next_seq += 1;
        self.queue.insert(priority, tx);
        self.index.insert(hash, priority);
    }

    fn remove(&mut self, hash: &H256) -> Option<Transaction> {
        self.working.retain(|h| h != hash);
        self.demotions.remove(hash);
        let priority = self.index.remove(hash)?;
        self.queue.remove(&priority)
    }
}

pub struct MemoryPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl MemoryPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Admit a transaction
    pub fn add(&self, tx: Transaction) -> Result<H256, PoolError> {
        if tx.gas == 0 {
            return Err(PoolError::ZeroGas);
        }
        let hash = tx.hash();
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&hash) {
            return Err(PoolError::Duplicate(hash));
        }
        if inner.queue.len() >= self.config.capacity {
            return Err(PoolError::Full(self.config.capacity));
        }
        inner.push(hash, tx);
        tracing::debug!("Pooled transaction {}", hash);
        Ok(hash)
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.inner.lock().index.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl TxPool for MemoryPool {
    fn prepare(&self) {
        let mut inner = self.inner.lock();
        let working: VecDeque<H256> = inner.queue.values().map(|tx| tx.hash()).collect();
        inner.working = working;
    }

    fn peek(&self) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        while let Some(hash) = inner.working.front().copied() {
            if let Some(priority) = inner.index.get(&hash) {
                return inner.queue.get(priority).cloned();
            }
            inner.working.pop_front();
        }
        None
    }

    fn pop(&self, tx: &Transaction) {
        self.inner.lock().remove(&tx.hash());
    }

    fn drop_tx(&self, tx: &Transaction) {
        let hash = tx.hash();
        if self.inner.lock().remove(&hash).is_some() {
            tracing::debug!("Dropped transaction {}", hash);
        }
    }

    fn demote(&self, tx: &Transaction) {
        let hash = tx.hash();
        let mut inner = self.inner.lock();
        inner.working.retain(|h| *h != hash);

        let count = {
            let count = inner.demotions.entry(hash).or_default();
            *count += 1;
            *count
        };
        if count > self.config.max_demotions {
            inner.remove(&hash);
            tracing::debug!("Dropped transaction {} after {} demotions", hash, count);
            return;
        }

        if let Some(priority) = inner.index.remove(&hash) {
            if let Some(tx) = inner.queue.remove(&priority) {
                inner.push(hash, tx);
            }
        }
    }

    fn reset_with_header(&self, header: &Header) {
        let mut inner = self.inner.lock();
        inner.working.clear();
        tracing::debug!(
            "Pool reset at block {}: {} pending",
            header.number,
            inner.queue.len()
        );
    }
}
