//! In-memory collaborators shared by the unit tests

mod fraud_flow;

use crate::fraud::{DisputeView, FraudRecord};
use crate::interfaces::{
    BlockPublisher, ChainError, ChainStore, ExecutionError, RegistryError, StakeEntry,
    StakingRegistry, StateExecutor, Transition, TransitionError, TxPool,
};
use async_trait::async_trait;
use da_bridge::{DaError, SubmitResult};
use parking_lot::{Mutex, RwLock};
use settlement_primitives::{
    transactions_root, Address, ExtraData, FraudCheck, Header, Log, NodeKey, Receipt, Role,
    SettlementBlock, Transaction, H256,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn transfer(nonce: u64, gas: u64) -> Transaction {
    Transaction {
        nonce,
        from: Address([1; 20]),
        to: Address([2; 20]),
        value: 1,
        gas,
        gas_price: 1,
    }
}

/// State root the fake executor derives after applying `tx`
pub fn fold_root(root: H256, tx: &Transaction) -> H256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(root.as_ref());
    hasher.update(tx.hash().as_ref());
    H256(*hasher.finalize().as_bytes())
}

/// An honest child of `parent`, sealed by `key`
pub fn sealed_child(parent: &Header, key: &NodeKey, txs: Vec<Transaction>) -> SettlementBlock {
    let miner = key.address();
    let mut header = Header {
        parent_hash: parent.hash,
        number: parent.number + 1,
        miner,
        gas_limit: parent.gas_limit,
        gas_used: txs.iter().map(|tx| tx.gas).sum(),
        timestamp: parent.timestamp + 1,
        state_root: txs.iter().fold(parent.state_root, fold_root),
        tx_root: transactions_root(&txs),
        extra: ExtraData {
            validators: vec![miner],
            seal: None,
            fraud_check: None,
        },
        hash: H256::ZERO,
    };
    header.write_seal(key);
    SettlementBlock {
        header,
        transactions: txs,
        receipts: Vec::new(),
    }
}

/// A block carrying a fraud check against `accused`
pub fn fraud_marker(parent: &Header, accused: H256) -> SettlementBlock {
    let key = NodeKey::generate();
    let mut block = sealed_child(parent, &key, Vec::new());
    block.header.extra.fraud_check = Some(FraudCheck {
        accused_block: accused,
        accuser: key.address(),
        evidence: H256::digest(b"evidence"),
    });
    block.header.write_seal(&key);
    block
}

pub struct NoDisputes;

impl DisputeView for NoDisputes {
    fn is_disputed(&self, _: &H256) -> bool {
        false
    }
}

struct ChainState {
    head: Header,
    headers: HashMap<H256, Header>,
    blocks: HashMap<H256, SettlementBlock>,
    writes: Vec<(H256, String)>,
}

pub struct FakeChain {
    state: RwLock<ChainState>,
    fail_writes: AtomicBool,
}

impl FakeChain {
    pub fn new() -> Self {
        let genesis = Header::genesis(1_000_000, 0, H256::ZERO);
        Self {
            state: RwLock::new(ChainState {
                headers: HashMap::from([(genesis.hash, genesis.clone())]),
                head: genesis,
                blocks: HashMap::new(),
                writes: Vec::new(),
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every accepted `write_block` call with its source tag
    pub fn writes(&self) -> Vec<(H256, String)> {
        self.state.read().writes.clone()
    }
}

impl ChainStore for FakeChain {
    fn header(&self) -> Header {
        self.state.read().head.clone()
    }

    fn write_block(&self, block: &SettlementBlock, source: &str) -> Result<(), ChainError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChainError::Storage("disk full".to_string()));
        }
        let mut state = self.state.write();
        if !state.headers.contains_key(&block.parent_hash()) {
            return Err(ChainError::UnknownParent {
                number: block.number(),
                parent: block.parent_hash(),
            });
        }
        state.headers.insert(block.hash(), block.header.clone());
        state.blocks.insert(block.hash(), block.clone());
        if block.number() > state.head.number {
            state.head = block.header.clone();
        }
        state.writes.push((block.hash(), source.to_string()));
        Ok(())
    }

    fn calculate_gas_limit(&self, _number: u64) -> Result<u64, ChainError> {
        Ok(self.state.read().head.gas_limit)
    }

    fn block_by_hash(&self, hash: &H256) -> Option<SettlementBlock> {
        self.state.read().blocks.get(hash).cloned()
    }

    fn header_by_hash(&self, hash: &H256) -> Option<Header> {
        self.state.read().headers.get(hash).cloned()
    }
}

/// Executes every transaction unless told otherwise; the state root is a
/// running hash of the applied transactions.
#[derive(Default)]
pub struct FakeExecutor {
    failures: Arc<Mutex<HashMap<H256, TransitionError>>>,
    commits: Arc<Mutex<Vec<H256>>>,
}

impl FakeExecutor {
    pub fn fail(&self, tx: &Transaction, error: TransitionError) {
        self.failures.lock().insert(tx.hash(), error);
    }

    /// Every root committed so far, in order
    pub fn committed(&self) -> Vec<H256> {
        self.commits.lock().clone()
    }
}

struct FakeTransition {
    root: H256,
    gas_limit: u64,
    gas: u64,
    receipts: Vec<Receipt>,
    failures: Arc<Mutex<HashMap<H256, TransitionError>>>,
    commits: Arc<Mutex<Vec<H256>>>,
}

impl Transition for FakeTransition {
    fn write(&mut self, tx: &Transaction) -> Result<(), TransitionError> {
        if let Some(error) = self.failures.lock().get(&tx.hash()) {
            return Err(error.clone());
        }
        if self.gas + tx.gas > self.gas_limit {
            return Err(TransitionError::GasLimitReached);
        }
        self.gas += tx.gas;
        self.root = fold_root(self.root, tx);
        self.receipts.push(Receipt {
            tx_hash: tx.hash(),
            success: true,
            gas_used: tx.gas,
            cumulative_gas_used: self.gas,
            logs: Vec::new(),
        });
        Ok(())
    }

    fn commit(&mut self) -> (Vec<Log>, H256) {
        self.commits.lock().push(self.root);
        (Vec::new(), self.root)
    }

    fn total_gas(&self) -> u64 {
        self.gas
    }

    fn receipts(&self) -> Vec<Receipt> {
        self.receipts.clone()
    }
}

impl StateExecutor for FakeExecutor {
    fn begin_txn(
        &self,
        parent_root: H256,
        header: &Header,
        _coinbase: Address,
    ) -> Result<Box<dyn Transition>, ExecutionError> {
        Ok(Box::new(FakeTransition {
            root: parent_root,
            gas_limit: header.gas_limit,
            gas: 0,
            receipts: Vec::new(),
            failures: self.failures.clone(),
            commits: self.commits.clone(),
        }))
    }
}

#[derive(Default)]
struct PoolState {
    pending: Vec<Transaction>,
    working: VecDeque<Transaction>,
    demoted: Vec<Transaction>,
    resets: usize,
}

/// FIFO pool recording every classification it receives
pub struct FakePool {
    state: Mutex<PoolState>,
}

impl FakePool {
    pub fn with(txs: Vec<Transaction>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                pending: txs,
                ..Default::default()
            }),
        })
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.state.lock().pending.clone()
    }

    pub fn demoted(&self) -> Vec<Transaction> {
        self.state.lock().demoted.clone()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    fn remove(&self, tx: &Transaction) {
        let hash = tx.hash();
        let mut state = self.state.lock();
        state.working.retain(|t| t.hash() != hash);
        state.pending.retain(|t| t.hash() != hash);
    }
}

impl TxPool for FakePool {
    fn prepare(&self) {
        let mut state = self.state.lock();
        state.working = state.pending.iter().cloned().collect();
    }

    fn peek(&self) -> Option<Transaction> {
        self.state.lock().working.front().cloned()
    }

    fn pop(&self, tx: &Transaction) {
        self.remove(tx);
    }

    fn drop_tx(&self, tx: &Transaction) {
        self.remove(tx);
    }

    fn demote(&self, tx: &Transaction) {
        let hash = tx.hash();
        let mut state = self.state.lock();
        state.working.retain(|t| t.hash() != hash);
        state.demoted.push(tx.clone());
    }

    fn reset_with_header(&self, _header: &Header) {
        self.state.lock().resets += 1;
    }
}

#[derive(Default)]
struct StakingState {
    staked: Vec<Address>,
    slashed: Vec<Address>,
    unstaked: Vec<Address>,
    fail_queries: bool,
    fail_slash: bool,
    fail_unstake: bool,
}

#[derive(Default)]
pub struct FakeStaking {
    state: Mutex<StakingState>,
}

impl FakeStaking {
    pub fn with(staked: Vec<Address>) -> Self {
        Self {
            state: Mutex::new(StakingState {
                staked,
                ..Default::default()
            }),
        }
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().fail_queries = fail;
    }

    pub fn fail_slash(&self, fail: bool) {
        self.state.lock().fail_slash = fail;
    }

    pub fn fail_unstake(&self, fail: bool) {
        self.state.lock().fail_unstake = fail;
    }

    pub fn slashed(&self) -> Vec<Address> {
        self.state.lock().slashed.clone()
    }

    pub fn unstaked(&self) -> Vec<Address> {
        self.state.lock().unstaked.clone()
    }
}

impl StakingRegistry for FakeStaking {
    fn stakes(&self) -> Result<Vec<StakeEntry>, RegistryError> {
        let state = self.state.lock();
        if state.fail_queries {
            return Err(RegistryError::Query("registry offline".to_string()));
        }
        Ok(state
            .staked
            .iter()
            .map(|address| StakeEntry {
                address: *address,
                amount: 100,
                role: Role::Sequencer,
            })
            .collect())
    }

    fn is_staked(&self, address: &Address) -> Result<bool, RegistryError> {
        let state = self.state.lock();
        if state.fail_queries {
            return Err(RegistryError::Query("registry offline".to_string()));
        }
        Ok(state.staked.contains(address))
    }

    fn slash(&self, offender: &Address, _record: &FraudRecord) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.fail_slash {
            return Err(RegistryError::Transaction("slash rejected".to_string()));
        }
        state.staked.retain(|a| a != offender);
        state.slashed.push(*offender);
        Ok(())
    }

    fn unstake(&self, key: &NodeKey) -> Result<(), RegistryError> {
        let address = key.address();
        let mut state = self.state.lock();
        if state.fail_unstake {
            return Err(RegistryError::Transaction("unstake rejected".to_string()));
        }
        if !state.staked.contains(&address) {
            return Err(RegistryError::NotStaked(address));
        }
        state.staked.retain(|a| *a != address);
        state.unstaked.push(address);
        Ok(())
    }
}

/// Records every block handed to it; includes them or times out
pub struct FakePublisher {
    include: bool,
    published: Mutex<Vec<H256>>,
}

impl FakePublisher {
    pub fn including() -> Arc<Self> {
        Arc::new(Self {
            include: true,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            include: false,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<H256> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl BlockPublisher for FakePublisher {
    async fn publish(&self, block: &SettlementBlock) -> Result<SubmitResult, DaError> {
        self.published.lock().push(block.hash());
        if self.include {
            Ok(SubmitResult {
                tx_hash: block.hash(),
                block_number: 1,
            })
        } else {
            Err(DaError::InclusionTimeout {
                hash: block.hash(),
                timeout_ms: 0,
            })
        }
    }
}
