//! Sequencer worker - the DA-clocked event loop
//!
//! Lifecycle: `WaitingForStake -> Running -> ShuttingDown -> Stopped`.
//!
//! Each DA block is one tick. Per tick, in order:
//! 1. advance the tick to `max(tick, da_block.number)`
//! 2. extract settlement blocks, write them to the local chain and execute
//!    them so their state can be built on
//! 3. fraud phase 1 (record markers), then phase 2 (resolve and slash)
//! 4. leader check against the tick's participant set
//! 5. produce a block when leading
//!
//! All state is owned by the one task that runs the loop. Shutdown is only
//! observed between ticks.

use crate::extractor::{extract, ExtractError};
use crate::fraud::{FraudConfig, FraudResolver};
use crate::interfaces::{
    BlockPublisher, ChainStore, RegistryError, StakingRegistry, StateExecutor, TxPool,
};
use crate::participants::{leader_decision, LeaderDecision, ParticipantRegistry};
use crate::producer::{BlockProducer, ProducerConfig};
use crate::verifier::{replay_block, BlockVerifier, ReplayVerifier};
use da_bridge::{
    AppId, BlockStream, CallIndex, DaAccount, DaBlock, DaClient, DaError, DaSender, SenderConfig,
    StreamConfig,
};
use serde::{Deserialize, Serialize};
use settlement_primitives::{Address, DaTick, NodeKey, Role, SettlementBlock, H256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub role: Role,
    /// DA application id settlement blocks are published under
    pub app_id: AppId,
    /// How often the stake barrier re-checks the registry
    pub stake_poll_interval: Duration,
    /// First DA block to process; the DA head when unset
    pub start_from: Option<u64>,
    pub stream: StreamConfig,
    pub sender: SenderConfig,
    pub producer: ProducerConfig,
    pub fraud: FraudConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            role: Role::Sequencer,
            app_id: 0,
            stake_poll_interval: Duration::from_secs(3),
            start_from: None,
            stream: StreamConfig::default(),
            sender: SenderConfig::default(),
            producer: ProducerConfig::default(),
            fraud: FraudConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    WaitingForStake,
    Running,
    ShuttingDown,
    Stopped,
}

/// Snapshot published after every state change and tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub role: Role,
    pub address: Address,
    pub state: WorkerState,
    pub tick: DaTick,
    pub head_number: u64,
    pub head_hash: H256,
    pub blocks_produced: u64,
    pub ticks_skipped: u64,
    pub fraud_pending: usize,
    /// Leader of the last tick a leader check ran for
    pub last_leader: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MalformedPayload,
    SlashPending,
    RegistryUnavailable,
    NotStaked,
}

/// What a tick ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Non-producing role, nothing left to do
    Passive,
    Skipped(SkipReason),
    Follower { leader: Address },
    Produced { number: u64, hash: H256 },
    ProductionFailed,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("missing worker component: {0}")]
    MissingComponent(&'static str),

    #[error("DA balance query failed: {0}")]
    Balance(#[source] DaError),

    #[error("DA call index discovery failed: {0}")]
    CallIndex(#[source] DaError),

    #[error("DA head query failed: {0}")]
    DaHead(#[source] DaError),

    #[error("worker used before prepare()")]
    NotPrepared,

    /// No staked sequencer at all. Nothing can make progress.
    #[error("active sequencer set is empty at tick {tick}")]
    EmptyActiveSet { tick: DaTick },

    #[error("DA block stream closed")]
    StreamClosed,

    #[error("unstake on shutdown failed: {0}")]
    Unstake(#[source] RegistryError),
}

/// The sequencer's event loop and all the state it owns
pub struct SequencerWorker {
    config: WorkerConfig,
    key: Arc<NodeKey>,
    address: Address,
    da: Arc<dyn DaClient>,
    da_account: DaAccount,
    chain: Arc<dyn ChainStore>,
    executor: Arc<dyn StateExecutor>,
    pool: Arc<dyn TxPool>,
    staking: Arc<dyn StakingRegistry>,
    publisher: Option<Arc<dyn BlockPublisher>>,
    participants: ParticipantRegistry,
    fraud: FraudResolver,
    producer: Option<BlockProducer>,
    call_index: Option<CallIndex>,
    tick: DaTick,
    state: WorkerState,
    blocks_produced: u64,
    ticks_skipped: u64,
    last_leader: Option<Address>,
    stats: watch::Sender<WorkerStats>,
}

impl SequencerWorker {
    pub fn tick(&self) -> DaTick {
        self.tick
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Live stats feed
    pub fn subscribe(&self) -> watch::Receiver<WorkerStats> {
        self.stats.subscribe()
    }

    fn snapshot(&self) -> WorkerStats {
        let head = self.chain.header();
        WorkerStats {
            role: self.config.role,
            address: self.address,
            state: self.state,
            tick: self.tick,
            head_number: head.number,
            head_hash: head.hash,
            blocks_produced: self.blocks_produced,
            ticks_skipped: self.ticks_skipped,
            fraud_pending: self.fraud.pending_count(),
            last_leader: self.last_leader,
        }
    }

    fn publish_stats(&self) {
        self.stats.send_replace(self.snapshot());
    }

    fn set_state(&mut self, state: WorkerState) {
        if self.state != state {
            tracing::info!("Worker state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
        self.publish_stats();
    }

    fn skip(&mut self, reason: SkipReason) -> TickOutcome {
        self.ticks_skipped += 1;
        self.publish_stats();
        TickOutcome::Skipped(reason)
    }

    /// Startup queries that must succeed before any tick is processed
    pub async fn prepare(&mut self) -> Result<(), WorkerError> {
        let balance = self
            .da
            .account_balance(&self.da_account.id())
            .await
            .map_err(WorkerError::Balance)?;
        tracing::info!(
            "DA account {} balance: {}",
            H256::from(self.da_account.id()),
            balance
        );
        if balance == 0 && self.config.role.produces_blocks() {
            tracing::warn!("DA account has no balance, block submissions will fail");
        }

        let call_index = self
            .da
            .find_call_index()
            .await
            .map_err(WorkerError::CallIndex)?;
        tracing::info!(
            "DA data submission call index: {}/{}",
            call_index.section,
            call_index.method
        );
        self.call_index = Some(call_index);

        let publisher = match &self.publisher {
            Some(publisher) => publisher.clone(),
            None => Arc::new(DaSender::new(
                self.da.clone(),
                self.da_account.clone(),
                self.config.app_id,
                call_index,
                self.config.sender.clone(),
            )),
        };
        self.producer = Some(BlockProducer::new(
            self.config.producer.clone(),
            self.key.clone(),
            self.config.role,
            self.chain.clone(),
            self.executor.clone(),
            self.pool.clone(),
            publisher,
        ));

        Ok(())
    }

    /// Block until the local address is staked. `false` when shutdown came first.
    async fn wait_for_stake(&mut self, shutdown: &mut oneshot::Receiver<()>) -> bool {
        self.set_state(WorkerState::WaitingForStake);

        loop {
            match self.participants.is_active(&self.address) {
                Ok(true) => {
                    tracing::info!("{} is staked", self.address);
                    return true;
                }
                Ok(false) => {
                    tracing::info!("Waiting for {} to be staked", self.address);
                }
                Err(e) => {
                    tracing::warn!("Stake check failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.stake_poll_interval) => {}
                _ = &mut *shutdown => return false,
            }
        }
    }

    /// Write a block seen on DA to the local chain and execute it on its
    /// parent's state. Blocks already held locally are skipped.
    fn import(&self, block: &SettlementBlock, da_number: u64) {
        let hash = block.hash();
        if self.chain.header_by_hash(&hash).is_some() {
            return;
        }
        if let Err(e) = self.chain.write_block(block, self.config.role.as_str()) {
            tracing::warn!("Cannot import block {}: {}", hash, e);
            return;
        }
        tracing::debug!(
            "Imported block {} ({}) from DA block {}",
            block.number(),
            hash,
            da_number
        );

        let Some(parent) = self.chain.header_by_hash(&block.parent_hash()) else {
            return;
        };
        match replay_block(self.executor.as_ref(), &parent, block) {
            Ok(replayed) if replayed.state_root == block.header.state_root => {}
            Ok(replayed) => tracing::warn!(
                "Block {} claims state root {}, execution gives {}",
                hash,
                block.header.state_root,
                replayed.state_root
            ),
            Err(e) => tracing::warn!("Cannot execute imported block {}: {}", hash, e),
        }
    }

    /// Process one DA block
    pub async fn on_tick(&mut self, da_block: &DaBlock) -> Result<TickOutcome, WorkerError> {
        let call_index = self.call_index.ok_or(WorkerError::NotPrepared)?;

        self.tick = self.tick.max(da_block.number);
        let tick = self.tick;
        let role = self.config.role;

        let blocks = match extract(da_block, self.config.app_id, call_index) {
            Ok(extracted) => {
                for bad in &extracted.malformed {
                    tracing::warn!(
                        "Skipping malformed payload #{} in DA block {}: {}",
                        bad.index,
                        da_block.number,
                        bad.reason
                    );
                }
                extracted.blocks
            }
            Err(ExtractError::NotFound(number)) => {
                tracing::debug!("No settlement blocks in DA block {}", number);
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Tick {}: {}", tick, e);
                return Ok(self.skip(SkipReason::MalformedPayload));
            }
        };

        for block in blocks.iter().filter(|b| b.fraud_check().is_none()) {
            self.import(block, da_block.number);
        }

        self.fraud.check_and_set_fraud_block(&blocks, tick);
        if let Err(e) = self.fraud.check_and_slash(tick) {
            tracing::warn!("Tick {} skipped: {}", tick, e);
            return Ok(self.skip(SkipReason::SlashPending));
        }

        if !role.produces_blocks() {
            self.publish_stats();
            return Ok(TickOutcome::Passive);
        }

        let active_set = match self.participants.active_set(tick) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("Tick {} skipped, cannot read active set: {}", tick, e);
                return Ok(self.skip(SkipReason::RegistryUnavailable));
            }
        };
        let decision = leader_decision(&active_set, &self.address)
            .ok_or(WorkerError::EmptyActiveSet { tick })?;

        match self.participants.is_active(&self.address) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Tick {}: {} is not staked, staying passive", tick, self.address);
                return Ok(self.skip(SkipReason::NotStaked));
            }
            Err(e) => {
                tracing::warn!("Tick {} skipped, stake check failed: {}", tick, e);
                return Ok(self.skip(SkipReason::RegistryUnavailable));
            }
        }

        let leader = match decision {
            LeaderDecision::Leader => self.address,
            LeaderDecision::Follower { leader } => leader,
        };
        self.last_leader = Some(leader);

        if let LeaderDecision::Follower { leader } = decision {
            tracing::debug!("Tick {}: {} leads", tick, leader);
            self.publish_stats();
            return Ok(TickOutcome::Follower { leader });
        }

        let producer = self.producer.as_ref().ok_or(WorkerError::NotPrepared)?;
        let parent = self.chain.header();
        tracing::info!("Tick {}: leading, building on block {}", tick, parent.number);

        let result = producer.produce(&parent, &self.fraud).await;
        let outcome = match result {
            Ok(block) => {
                self.blocks_produced += 1;
                TickOutcome::Produced {
                    number: block.number(),
                    hash: block.hash(),
                }
            }
            Err(e) if e.is_fatal_inconsistency() => {
                tracing::error!("FATAL inconsistency at tick {}: {}", tick, e);
                TickOutcome::ProductionFailed
            }
            Err(e) => {
                tracing::error!("Block production failed at tick {}: {}", tick, e);
                TickOutcome::ProductionFailed
            }
        };

        self.publish_stats();
        Ok(outcome)
    }

    /// Unstake and stop. Producing roles only hold a stake to withdraw.
    pub fn shutdown(&mut self) -> Result<(), WorkerError> {
        self.set_state(WorkerState::ShuttingDown);

        if self.config.role.produces_blocks() {
            if let Err(e) = self.staking.unstake(&self.key) {
                tracing::error!("Failed to unstake {}: {}", self.address, e);
                return Err(WorkerError::Unstake(e));
            }
            tracing::info!("Unstaked {}", self.address);
        }

        self.set_state(WorkerState::Stopped);
        Ok(())
    }

    /// Run until `shutdown` fires or its sender is dropped
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), WorkerError> {
        self.prepare().await?;

        if self.config.role.produces_blocks() && !self.wait_for_stake(&mut shutdown).await {
            tracing::info!("Shutdown requested before {} was staked", self.address);
            self.set_state(WorkerState::Stopped);
            return Ok(());
        }

        let from = match self.config.start_from {
            Some(from) => from,
            None => self
                .da
                .best_block_number()
                .await
                .map_err(WorkerError::DaHead)?,
        };
        let mut stream = BlockStream::spawn(self.da.clone(), from, self.config.stream.clone());

        self.set_state(WorkerState::Running);
        tracing::info!(
            "{} worker {} running from DA block {}",
            self.config.role,
            self.address,
            from
        );

        loop {
            tokio::select! {
                next = stream.recv() => match next {
                    Some(da_block) => {
                        self.on_tick(&da_block).await?;
                    }
                    None => return Err(WorkerError::StreamClosed),
                },
                _ = &mut shutdown => break,
            }
        }

        stream.close();
        self.shutdown()
    }
}

/// Builder for `SequencerWorker`
pub struct SequencerWorkerBuilder {
    config: WorkerConfig,
    key: NodeKey,
    da: Option<(Arc<dyn DaClient>, DaAccount)>,
    chain: Option<Arc<dyn ChainStore>>,
    executor: Option<Arc<dyn StateExecutor>>,
    pool: Option<Arc<dyn TxPool>>,
    staking: Option<Arc<dyn StakingRegistry>>,
    publisher: Option<Arc<dyn BlockPublisher>>,
    verifier: Option<Arc<dyn BlockVerifier>>,
}

impl SequencerWorkerBuilder {
    pub fn new(key: NodeKey) -> Self {
        Self {
            config: WorkerConfig::default(),
            key,
            da: None,
            chain: None,
            executor: None,
            pool: None,
            staking: None,
            publisher: None,
            verifier: None,
        }
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    pub fn app_id(mut self, app_id: AppId) -> Self {
        self.config.app_id = app_id;
        self
    }

    /// DA node and the account paying for submissions
    pub fn da(mut self, client: Arc<dyn DaClient>, account: DaAccount) -> Self {
        self.da = Some((client, account));
        self
    }

    pub fn chain(mut self, chain: Arc<dyn ChainStore>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn StateExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn pool(mut self, pool: Arc<dyn TxPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn staking(mut self, staking: Arc<dyn StakingRegistry>) -> Self {
        self.staking = Some(staking);
        self
    }

    /// Override the default `DaSender` publisher
    pub fn publisher(mut self, publisher: Arc<dyn BlockPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Override the default `ReplayVerifier`
    pub fn verifier(mut self, verifier: Arc<dyn BlockVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn build(self) -> Result<SequencerWorker, WorkerError> {
        let (da, da_account) = self.da.ok_or(WorkerError::MissingComponent("da"))?;
        let chain = self.chain.ok_or(WorkerError::MissingComponent("chain"))?;
        let executor = self
            .executor
            .ok_or(WorkerError::MissingComponent("executor"))?;
        let pool = self.pool.ok_or(WorkerError::MissingComponent("pool"))?;
        let staking = self.staking.ok_or(WorkerError::MissingComponent("staking"))?;

        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(ReplayVerifier::new(chain.clone(), executor.clone())));
        let fraud = FraudResolver::new(
            self.config.fraud.clone(),
            chain.clone(),
            verifier,
            staking.clone(),
        );

        let address = self.key.address();
        let head = chain.header();
        let (stats, _) = watch::channel(WorkerStats {
            role: self.config.role,
            address,
            state: WorkerState::WaitingForStake,
            tick: 0,
            head_number: head.number,
            head_hash: head.hash,
            blocks_produced: 0,
            ticks_skipped: 0,
            fraud_pending: 0,
            last_leader: None,
        });

        Ok(SequencerWorker {
            config: self.config,
            key: Arc::new(self.key),
            address,
            da,
            da_account,
            chain,
            executor,
            pool,
            participants: ParticipantRegistry::new(staking.clone()),
            staking,
            publisher: self.publisher,
            fraud,
            producer: None,
            call_index: None,
            tick: 0,
            state: WorkerState::WaitingForStake,
            blocks_produced: 0,
            ticks_skipped: 0,
            last_leader: None,
            stats,
        })
    }
}
