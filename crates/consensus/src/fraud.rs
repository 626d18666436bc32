//! Fraud detection and slashing
//!
//! Runs in two phases every tick:
//! 1. `check_and_set_fraud_block` scans the tick's extracted blocks for fraud
//!    markers, opens a `Pending` record per accused block and marks the block
//!    disputed so nobody builds on it.
//! 2. `check_and_slash` re-verifies every pending record. Proven fraud slashes
//!    the accused miner no matter how old the record is; a record that stays
//!    undetermined past its deadline expires.
//!
//! A failed slash submission leaves the record pending so the next tick
//! retries it. Only pending records are held; a record leaves the resolver
//! once it reaches a terminal state, so a block can be accused again later.

use crate::interfaces::{ChainStore, RegistryError, StakingRegistry};
use crate::verifier::{BlockVerifier, Verdict};
use serde::{Deserialize, Serialize};
use settlement_primitives::{Address, DaTick, SettlementBlock, H256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FraudState {
    Pending,
    Proven,
    Rejected,
    Expired,
}

impl FraudState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FraudState::Pending)
    }
}

/// One accusation against one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudRecord {
    pub accused_block: H256,
    /// Filled in once the accused block is known locally
    pub accused_miner: Option<Address>,
    pub accuser: Address,
    pub evidence: H256,
    pub raised_at: DaTick,
    /// Last tick at which an undetermined record is still kept open
    pub deadline: DaTick,
    pub state: FraudState,
}

#[derive(Debug, Clone)]
pub struct FraudConfig {
    /// Ticks an accusation stays open without a verdict
    pub dispute_window: u64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self { dispute_window: 10 }
    }
}

#[derive(Debug, Error)]
pub enum FraudError {
    #[error("failed to slash {offender} for block {block}: {source}")]
    Slash {
        block: H256,
        offender: Address,
        #[source]
        source: RegistryError,
    },
}

/// A record that reached a terminal state this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub accused_block: H256,
    pub state: FraudState,
    pub offender: Option<Address>,
}

/// Read-only view of which blocks are under dispute
pub trait DisputeView: Send + Sync {
    fn is_disputed(&self, block: &H256) -> bool;
}

pub struct FraudResolver {
    config: FraudConfig,
    chain: Arc<dyn ChainStore>,
    verifier: Arc<dyn BlockVerifier>,
    staking: Arc<dyn StakingRegistry>,
    /// Pending records only
    records: HashMap<H256, FraudRecord>,
    disputed: HashSet<H256>,
}

impl FraudResolver {
    pub fn new(
        config: FraudConfig,
        chain: Arc<dyn ChainStore>,
        verifier: Arc<dyn BlockVerifier>,
        staking: Arc<dyn StakingRegistry>,
    ) -> Self {
        Self {
            config,
            chain,
            verifier,
            staking,
            records: HashMap::new(),
            disputed: HashSet::new(),
        }
    }

    /// Phase 1: open records for every fraud marker among `blocks`
    pub fn check_and_set_fraud_block(&mut self, blocks: &[SettlementBlock], tick: DaTick) {
        for block in blocks {
            let Some(check) = block.fraud_check() else {
                continue;
            };

            if let Some(existing) = self.records.get_mut(&check.accused_block) {
                if existing.accused_miner.is_none() {
                    existing.accused_miner = self
                        .chain
                        .header_by_hash(&check.accused_block)
                        .map(|h| h.miner);
                }
                tracing::debug!(
                    "Block {} already under dispute, ignoring check from {}",
                    check.accused_block,
                    check.accuser
                );
                continue;
            }

            let accused_miner = self
                .chain
                .header_by_hash(&check.accused_block)
                .map(|h| h.miner);

            tracing::warn!(
                "Fraud check raised by {} against block {} at tick {}",
                check.accuser,
                check.accused_block,
                tick
            );

            self.records.insert(
                check.accused_block,
                FraudRecord {
                    accused_block: check.accused_block,
                    accused_miner,
                    accuser: check.accuser,
                    evidence: check.evidence,
                    raised_at: tick,
                    deadline: tick + self.config.dispute_window,
                    state: FraudState::Pending,
                },
            );
            self.disputed.insert(check.accused_block);
        }
    }

    /// Phase 2: resolve pending records, slashing proven fraud
    pub fn check_and_slash(&mut self, tick: DaTick) -> Result<Vec<Resolution>, FraudError> {
        let mut pending: Vec<(DaTick, H256)> = self
            .records
            .values()
            .map(|r| (r.raised_at, r.accused_block))
            .collect();
        pending.sort_unstable();

        let mut resolutions = Vec::new();

        for (_, hash) in pending {
            let verdict = match self.chain.block_by_hash(&hash) {
                Some(block) => {
                    if let Some(record) = self.records.get_mut(&hash) {
                        record.accused_miner = Some(block.header.miner);
                    }
                    self.verifier.verify(&block)
                }
                None => Verdict::Undetermined("accused block not known locally".to_string()),
            };

            let Some(record) = self.records.get(&hash).cloned() else {
                continue;
            };

            let state = match verdict {
                Verdict::Fraudulent(reason) => {
                    if let Some(offender) = record.accused_miner {
                        tracing::warn!("Fraud proven for block {}: {}", hash, reason);
                        self.staking
                            .slash(&offender, &record)
                            .map_err(|source| FraudError::Slash {
                                block: hash,
                                offender,
                                source,
                            })?;
                        tracing::info!("Slashed {} for block {}", offender, hash);
                    }
                    FraudState::Proven
                }
                Verdict::Valid => {
                    tracing::info!("Fraud check against block {} rejected", hash);
                    FraudState::Rejected
                }
                Verdict::Undetermined(reason) if tick > record.deadline => {
                    tracing::info!(
                        "Fraud check against block {} expired at tick {}: {}",
                        hash,
                        tick,
                        reason
                    );
                    FraudState::Expired
                }
                Verdict::Undetermined(reason) => {
                    tracing::debug!("Block {} still undetermined: {}", hash, reason);
                    continue;
                }
            };

            self.records.remove(&hash);
            self.disputed.remove(&hash);
            resolutions.push(Resolution {
                accused_block: hash,
                state,
                offender: record.accused_miner,
            });
        }

        Ok(resolutions)
    }

    /// The open record against `block`, if any
    pub fn record(&self, block: &H256) -> Option<&FraudRecord> {
        self.records.get(block)
    }

    pub fn pending_count(&self) -> usize {
        self.records.len()
    }
}

impl DisputeView for FraudResolver {
    fn is_disputed(&self, block: &H256) -> bool {
        self.disputed.contains(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{fraud_marker, sealed_child, FakeChain, FakeStaking};
    use parking_lot::Mutex;
    use settlement_primitives::NodeKey;

    struct ScriptedVerifier(Mutex<Verdict>);

    impl ScriptedVerifier {
        fn new(verdict: Verdict) -> Arc<Self> {
            Arc::new(Self(Mutex::new(verdict)))
        }

        fn set(&self, verdict: Verdict) {
            *self.0.lock() = verdict;
        }
    }

    impl BlockVerifier for ScriptedVerifier {
        fn verify(&self, _: &SettlementBlock) -> Verdict {
            self.0.lock().clone()
        }
    }

    struct Fixture {
        chain: Arc<FakeChain>,
        staking: Arc<FakeStaking>,
        verifier: Arc<ScriptedVerifier>,
        resolver: FraudResolver,
        accused: SettlementBlock,
    }

    fn fixture(verdict: Verdict) -> Fixture {
        let chain = Arc::new(FakeChain::new());
        let staking = Arc::new(FakeStaking::default());
        let verifier = ScriptedVerifier::new(verdict);
        let accused = sealed_child(&chain.header(), &NodeKey::generate(), Vec::new());
        chain.write_block(&accused, "test").unwrap();

        let resolver = FraudResolver::new(
            FraudConfig { dispute_window: 5 },
            chain.clone(),
            verifier.clone(),
            staking.clone(),
        );
        Fixture {
            chain,
            staking,
            verifier,
            resolver,
            accused,
        }
    }

    #[test]
    fn test_marker_opens_pending_record() {
        let mut f = fixture(Verdict::Undetermined("later".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());

        f.resolver.check_and_set_fraud_block(&[f.accused.clone(), marker], 100);

        let record = f.resolver.record(&f.accused.hash()).unwrap();
        assert_eq!(record.state, FraudState::Pending);
        assert_eq!(record.deadline, 105);
        assert_eq!(record.accused_miner, Some(f.accused.header.miner));
        assert!(f.resolver.is_disputed(&f.accused.hash()));
        assert_eq!(f.resolver.pending_count(), 1);
    }

    #[test]
    fn test_undetermined_expires_after_deadline() {
        let mut f = fixture(Verdict::Undetermined("parent unknown".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker], 100);

        assert!(f.resolver.check_and_slash(105).unwrap().is_empty());
        assert!(f.resolver.is_disputed(&f.accused.hash()));

        let resolved = f.resolver.check_and_slash(106).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].state, FraudState::Expired);
        assert!(!f.resolver.is_disputed(&f.accused.hash()));
        assert!(f.staking.slashed().is_empty());
    }

    #[test]
    fn test_proven_fraud_slashes_even_after_deadline() {
        let mut f = fixture(Verdict::Undetermined("not yet".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker], 100);

        f.verifier.set(Verdict::Fraudulent("bad root".into()));
        let resolved = f.resolver.check_and_slash(500).unwrap();

        assert_eq!(resolved[0].state, FraudState::Proven);
        assert_eq!(f.staking.slashed(), vec![f.accused.header.miner]);
        assert!(!f.resolver.is_disputed(&f.accused.hash()));
    }

    #[test]
    fn test_valid_block_rejects_accusation() {
        let mut f = fixture(Verdict::Valid);
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker], 1);

        let resolved = f.resolver.check_and_slash(1).unwrap();
        assert_eq!(resolved[0].state, FraudState::Rejected);
        assert_eq!(f.resolver.pending_count(), 0);
    }

    #[test]
    fn test_slash_failure_keeps_record_pending() {
        let mut f = fixture(Verdict::Fraudulent("bad root".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker], 1);

        f.staking.fail_slash(true);
        let err = f.resolver.check_and_slash(2).unwrap_err();
        assert!(matches!(err, FraudError::Slash { .. }));
        assert_eq!(
            f.resolver.record(&f.accused.hash()).unwrap().state,
            FraudState::Pending
        );
        assert!(f.resolver.is_disputed(&f.accused.hash()));

        f.staking.fail_slash(false);
        let resolved = f.resolver.check_and_slash(3).unwrap();
        assert_eq!(resolved[0].state, FraudState::Proven);
    }

    #[test]
    fn test_repeated_marker_keeps_first_deadline() {
        let mut f = fixture(Verdict::Undetermined("wait".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker.clone()], 10);
        f.resolver.check_and_set_fraud_block(&[marker], 20);

        assert_eq!(f.resolver.record(&f.accused.hash()).unwrap().deadline, 15);
    }

    #[test]
    fn test_resolved_record_is_dropped_and_block_can_be_reaccused() {
        let mut f = fixture(Verdict::Valid);
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker.clone()], 1);
        assert_eq!(f.resolver.check_and_slash(1).unwrap()[0].state, FraudState::Rejected);
        assert!(f.resolver.record(&f.accused.hash()).is_none());
        assert_eq!(f.resolver.pending_count(), 0);

        f.verifier.set(Verdict::Fraudulent("bad root".into()));
        f.resolver.check_and_set_fraud_block(&[marker], 40);
        let record = f.resolver.record(&f.accused.hash()).unwrap();
        assert_eq!(record.raised_at, 40);
        assert_eq!(record.deadline, 45);
        assert!(f.resolver.is_disputed(&f.accused.hash()));

        let resolved = f.resolver.check_and_slash(41).unwrap();
        assert_eq!(resolved[0].state, FraudState::Proven);
        assert_eq!(f.staking.slashed(), vec![f.accused.header.miner]);
        assert_eq!(f.resolver.pending_count(), 0);
    }

    #[test]
    fn test_expired_record_is_dropped() {
        let mut f = fixture(Verdict::Undetermined("unknown".into()));
        let marker = fraud_marker(&f.chain.header(), f.accused.hash());
        f.resolver.check_and_set_fraud_block(&[marker], 1);
        assert_eq!(f.resolver.pending_count(), 1);

        assert_eq!(f.resolver.check_and_slash(7).unwrap()[0].state, FraudState::Expired);
        assert_eq!(f.resolver.pending_count(), 0);
        assert!(f.resolver.record(&f.accused.hash()).is_none());
    }
}
