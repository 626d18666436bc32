//! Fraud markers travelling through the worker's tick loop

use super::{fraud_marker, sealed_child, FakeChain, FakeExecutor, FakePool, FakeStaking};
use crate::fraud::FraudConfig;
use crate::interfaces::ChainStore;
use crate::worker::{SequencerWorker, SequencerWorkerBuilder, TickOutcome, WorkerConfig};
use da_bridge::{DaAccount, DaBlock, DaExtrinsic, LocalDa, LOCAL_CALL_INDEX};
use settlement_primitives::{NodeKey, Role, SettlementBlock, H256};
use std::sync::Arc;

const APP: u32 = 11;

fn watchtower(chain: Arc<FakeChain>, staking: Arc<FakeStaking>) -> SequencerWorker {
    SequencerWorkerBuilder::new(NodeKey::generate())
        .config(WorkerConfig {
            role: Role::WatchTower,
            app_id: APP,
            fraud: FraudConfig { dispute_window: 2 },
            ..Default::default()
        })
        .da(Arc::new(LocalDa::new()), DaAccount::new(NodeKey::generate()))
        .chain(chain)
        .executor(Arc::new(FakeExecutor::default()))
        .pool(FakePool::with(Vec::new()))
        .staking(staking)
        .build()
        .unwrap()
}

fn da_block(number: u64, blocks: &[&SettlementBlock]) -> DaBlock {
    let account = DaAccount::new(NodeKey::generate());
    DaBlock {
        number,
        hash: H256::digest(&number.to_le_bytes()),
        parent_hash: H256::ZERO,
        timestamp: 0,
        extrinsics: blocks
            .iter()
            .enumerate()
            .map(|(i, b)| DaExtrinsic::signed(&account, APP, LOCAL_CALL_INDEX, i as u64, b.to_bytes()))
            .collect(),
    }
}

#[tokio::test]
async fn test_forged_block_gets_miner_slashed() {
    let chain = Arc::new(FakeChain::new());
    let forger = NodeKey::generate();
    let staking = Arc::new(FakeStaking::with(vec![forger.address()]));
    let mut worker = watchtower(chain.clone(), staking.clone());
    worker.prepare().await.unwrap();

    let mut forged = sealed_child(&chain.header(), &forger, Vec::new());
    forged.header.state_root = H256::digest(b"minted out of thin air");
    forged.header.write_seal(&forger);

    worker.on_tick(&da_block(1, &[&forged])).await.unwrap();
    assert_eq!(chain.header().hash, forged.hash());

    let marker = fraud_marker(&chain.header(), forged.hash());
    let outcome = worker.on_tick(&da_block(2, &[&marker])).await.unwrap();

    assert_eq!(outcome, TickOutcome::Passive);
    assert_eq!(staking.slashed(), vec![forger.address()]);
    assert_eq!(worker.subscribe().borrow().fraud_pending, 0);
}

#[tokio::test]
async fn test_accusing_honest_block_is_rejected() {
    let chain = Arc::new(FakeChain::new());
    let miner = NodeKey::generate();
    let staking = Arc::new(FakeStaking::with(vec![miner.address()]));
    let mut worker = watchtower(chain.clone(), staking.clone());
    worker.prepare().await.unwrap();

    let honest = sealed_child(&chain.header(), &miner, Vec::new());
    let marker = fraud_marker(&honest.header, honest.hash());

    worker.on_tick(&da_block(1, &[&honest, &marker])).await.unwrap();

    assert!(staking.slashed().is_empty());
    assert_eq!(worker.subscribe().borrow().fraud_pending, 0);
    // the marker block itself never lands in the chain
    assert_eq!(chain.header().hash, honest.hash());
}

#[tokio::test]
async fn test_unknown_accused_block_expires() {
    let chain = Arc::new(FakeChain::new());
    let staking = Arc::new(FakeStaking::default());
    let mut worker = watchtower(chain.clone(), staking.clone());
    worker.prepare().await.unwrap();

    let marker = fraud_marker(&chain.header(), H256::digest(b"never seen"));
    worker.on_tick(&da_block(10, &[&marker])).await.unwrap();
    assert_eq!(worker.subscribe().borrow().fraud_pending, 1);

    worker.on_tick(&da_block(12, &[])).await.unwrap();
    assert_eq!(worker.subscribe().borrow().fraud_pending, 1);

    worker.on_tick(&da_block(13, &[])).await.unwrap();
    assert_eq!(worker.subscribe().borrow().fraud_pending, 0);
    assert!(staking.slashed().is_empty());
}
