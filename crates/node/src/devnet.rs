//! In-process devnet
//!
//! Every node shares one local DA chain and one staking registry. Each node
//! keeps its own chain and state. The transaction pool is shared as well and
//! stands in for mempool gossip between the sequencers.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use da_bridge::{DaAccount, LocalDa, SenderConfig, StreamConfig};
use rpc_server::RpcContext;
use settlement_consensus::{
    replay_block, ChainStore, FraudConfig, ProducerConfig, SequencerWorkerBuilder, WorkerConfig,
    WorkerError, WorkerStats,
};
use settlement_primitives::{Address, Header, NodeKey, Role, H256};
use settlement_runtime::{
    BalanceExecutor, GasLimitPolicy, MemoryChain, MemoryPool, MemoryStaking, PersistentStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// DA balance every devnet account starts with
const DA_FUNDING: u128 = 1_000_000_000;

/// One worker and the collaborators it owns
pub struct DevnetNode {
    pub role: Role,
    pub address: Address,
    pub chain: Arc<MemoryChain>,
    pub executor: Arc<BalanceExecutor>,
    pub stats: watch::Receiver<WorkerStats>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), WorkerError>>,
}

impl DevnetNode {
    async fn stop(self) -> Result<()> {
        // the worker may already have exited on its own
        let _ = self.shutdown.send(());
        self.handle
            .await
            .context("worker task panicked")?
            .with_context(|| format!("{} worker {}", self.role, self.address))
    }
}

pub struct Devnet {
    pub da: Arc<LocalDa>,
    pub staking: Arc<MemoryStaking>,
    pub pool: Arc<MemoryPool>,
    /// The configured node first, then the extra sequencers
    pub nodes: Vec<DevnetNode>,
    da_producer: JoinHandle<()>,
}

impl Devnet {
    /// Spawn every worker, then start sealing DA blocks
    pub fn start(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let da = Arc::new(LocalDa::new());
        let staking = Arc::new(MemoryStaking::default());
        let pool = Arc::new(MemoryPool::default());

        let mut roles = vec![config.role];
        roles.extend(std::iter::repeat(Role::Sequencer).take(config.sequencers));

        let mut nodes = Vec::with_capacity(roles.len());
        for (index, role) in roles.into_iter().enumerate() {
            nodes.push(spawn_node(config, index, role, &da, &staking, &pool)?);
        }

        let da_producer = da
            .clone()
            .spawn_producer(Duration::from_millis(config.da_block_time_ms));

        tracing::info!(
            "Devnet started: {} nodes, DA block time {}ms",
            nodes.len(),
            config.da_block_time_ms
        );
        Ok(Self {
            da,
            staking,
            pool,
            nodes,
            da_producer,
        })
    }

    /// The node the RPC server is attached to
    pub fn primary(&self) -> &DevnetNode {
        &self.nodes[0]
    }

    pub fn rpc_context(&self) -> RpcContext {
        let primary = self.primary();
        RpcContext {
            chain: primary.chain.clone(),
            pool: self.pool.clone(),
            executor: primary.executor.clone(),
            stats: primary.stats.clone(),
        }
    }

    /// Stop every worker, unstaking the producers. Returns the first failure.
    pub async fn shutdown(self) -> Result<()> {
        let mut first_error = None;
        for node in self.nodes {
            if let Err(e) = node.stop().await {
                tracing::error!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }
        self.da_producer.abort();
        tracing::info!("Devnet stopped at DA block {}", self.da.head_number());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn spawn_node(
    config: &NodeConfig,
    index: usize,
    role: Role,
    da: &Arc<LocalDa>,
    staking: &Arc<MemoryStaking>,
    pool: &Arc<MemoryPool>,
) -> Result<DevnetNode> {
    let key = NodeKey::generate();
    let address = key.address();

    let executor = Arc::new(BalanceExecutor::new());
    let alloc: Vec<(Address, u64)> = config
        .alloc
        .iter()
        .map(|account| (account.address, account.balance))
        .collect();
    let genesis_root = executor.genesis(&alloc);
    let genesis = Header::genesis(
        config.genesis_gas_limit,
        config.genesis_timestamp,
        genesis_root,
    );
    let policy = GasLimitPolicy {
        target: config.genesis_gas_limit,
        ..Default::default()
    };

    let chain = match &config.data_dir {
        Some(dir) => {
            let path = dir.join(format!("node-{}", index));
            std::fs::create_dir_all(&path)?;
            open_chain(&path, genesis, policy, &executor)?
        }
        None => MemoryChain::new(genesis, policy),
    };
    let chain = Arc::new(chain);

    let da_account = DaAccount::new(key.clone());
    da.fund(da_account.id(), DA_FUNDING);
    if role.produces_blocks() {
        staking.stake(address, config.stake as u128, role);
    }

    let poll = Duration::from_millis((config.da_block_time_ms / 4).max(5));
    let worker_config = WorkerConfig {
        role,
        app_id: config.app_id,
        stake_poll_interval: Duration::from_millis(config.da_block_time_ms),
        start_from: None,
        stream: StreamConfig {
            poll_interval: poll,
            ..Default::default()
        },
        sender: SenderConfig {
            status_poll_interval: poll,
            ..Default::default()
        },
        producer: ProducerConfig {
            block_time: Duration::from_millis(config.block_time_ms),
        },
        fraud: FraudConfig {
            dispute_window: config.dispute_window,
        },
    };

    let worker = SequencerWorkerBuilder::new(key)
        .config(worker_config)
        .da(da.clone(), da_account)
        .chain(chain.clone())
        .executor(executor.clone())
        .pool(pool.clone())
        .staking(staking.clone())
        .build()?;

    let stats = worker.subscribe();
    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let result = worker.run(shutdown_rx).await;
        if let Err(e) = &result {
            tracing::error!("{} worker {} stopped: {}", role, address, e);
        }
        result
    });

    tracing::info!("Spawned {} node {} ({})", role, index, address);
    Ok(DevnetNode {
        role,
        address,
        chain,
        executor,
        stats,
        shutdown,
        handle,
    })
}

/// Open a sled-backed chain and rebuild the account state by replaying it
fn open_chain(
    path: &Path,
    genesis: Header,
    policy: GasLimitPolicy,
    executor: &BalanceExecutor,
) -> Result<MemoryChain> {
    let store = PersistentStore::open(path)?;
    if let Some(metadata) = store.load_metadata()? {
        tracing::info!(
            "Found chain data in {}: head {} ({}), {} blocks",
            path.display(),
            metadata.head_number,
            H256(metadata.head_hash),
            metadata.block_count
        );
    }

    let mut parent = genesis.clone();
    let chain = MemoryChain::open(genesis, policy, store)?;
    for number in 1..=chain.head_number() {
        let block = chain
            .block_by_number(number)
            .with_context(|| format!("canonical block {} missing after restore", number))?;
        let replayed = replay_block(executor, &parent, &block)?;
        if replayed.state_root != block.header.state_root {
            anyhow::bail!(
                "replay of block {} gave state root {}, header says {}",
                number,
                replayed.state_root,
                block.header.state_root
            );
        }
        parent = block.header;
    }

    tracing::info!(
        "Replayed {} blocks, state root {}",
        chain.head_number(),
        chain.header().state_root
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenesisAccount;
    use settlement_primitives::Transaction;
    use settlement_runtime::TRANSFER_GAS;
    use tempfile::tempdir;

    const SENDER: Address = Address([1; 20]);
    const RECEIVER: Address = Address([2; 20]);

    fn fast_config(role: Role, sequencers: usize) -> NodeConfig {
        NodeConfig {
            role,
            sequencers,
            block_time_ms: 1_000,
            da_block_time_ms: 20,
            alloc: vec![GenesisAccount {
                address: SENDER,
                balance: 1_000_000,
            }],
            ..Default::default()
        }
    }

    fn transfer() -> Transaction {
        Transaction {
            nonce: 0,
            from: SENDER,
            to: RECEIVER,
            value: 500,
            gas: TRANSFER_GAS,
            gas_price: 1,
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("devnet did not reach the expected state");
    }

    fn receiver_balance(node: &DevnetNode) -> u64 {
        let head = node.chain.header();
        node.executor
            .account(&head.state_root, &RECEIVER)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_validator_follows_sequencer() {
        let devnet = Devnet::start(&fast_config(Role::Validator, 1)).unwrap();
        devnet.pool.add(transfer()).unwrap();

        let validator = devnet.primary();
        let sequencer = &devnet.nodes[1];
        wait_for(|| {
            validator.chain.head_number() >= 3
                && validator.chain.block_by_number(3) == sequencer.chain.block_by_number(3)
        })
        .await;

        assert_eq!(receiver_balance(sequencer), 500);
        let included = (1..=3)
            .filter_map(|n| validator.chain.block_by_number(n))
            .any(|b| b.transactions.contains(&transfer()));
        assert!(included);
        assert!(devnet.staking.slash_events().is_empty());

        let sequencer_address = sequencer.address;
        let staking = devnet.staking.clone();
        devnet.shutdown().await.unwrap();
        assert_eq!(staking.stake_of(&sequencer_address), 0);
    }

    #[tokio::test]
    async fn test_sequencers_keep_rotating_after_transfer() {
        let config = NodeConfig {
            da_block_time_ms: 40,
            ..fast_config(Role::Sequencer, 1)
        };
        let devnet = Devnet::start(&config).unwrap();
        devnet.pool.add(transfer()).unwrap();

        let (a, b) = (&devnet.nodes[0], &devnet.nodes[1]);
        wait_for(|| receiver_balance(a) == 500 && receiver_balance(b) == 500).await;

        let produced = |node: &DevnetNode| node.stats.borrow().blocks_produced;
        let before = (produced(a), produced(b));
        wait_for(|| produced(a) > before.0 + 1 && produced(b) > before.1 + 1).await;

        for node in [a, b] {
            assert!(node.executor.has_state(&node.chain.header().state_root));
        }
        assert!(devnet.staking.slash_events().is_empty());
        devnet.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_replays_state() {
        let dir = tempdir().unwrap();
        let config = NodeConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..fast_config(Role::BootstrapSequencer, 0)
        };

        let devnet = Devnet::start(&config).unwrap();
        devnet.pool.add(transfer()).unwrap();
        wait_for(|| receiver_balance(devnet.primary()) == 500).await;
        let head = devnet.primary().chain.head_number();
        devnet.shutdown().await.unwrap();

        let devnet = Devnet::start(&config).unwrap();
        assert!(devnet.primary().chain.head_number() >= head);
        assert_eq!(receiver_balance(devnet.primary()), 500);
        devnet.shutdown().await.unwrap();
    }
}
