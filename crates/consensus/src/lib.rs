//! Settlement Consensus - DA-clocked sequencer rotation
//!
//! Architecture:
//! - The DA chain's block stream is the only clock; there is no gossip
//! - Settlement blocks travel inside DA blocks and are extracted every tick
//! - Staked sequencers take turns leading by a tick-seeded shuffle
//! - Fraud markers open disputes that end in a slash, a rejection or expiry
//! - The leader seals a block, waits for DA inclusion, then commits locally

pub mod extractor;
pub mod fraud;
pub mod interfaces;
pub mod participants;
pub mod producer;
pub mod selector;
pub mod verifier;
pub mod worker;

pub use extractor::{extract, ExtractError, Extracted, MalformedPayload};
pub use fraud::{
    DisputeView, FraudConfig, FraudError, FraudRecord, FraudResolver, FraudState, Resolution,
};
pub use interfaces::{
    BlockPublisher, ChainError, ChainStore, ExecutionError, RegistryError, StakeEntry,
    StakingRegistry, StateExecutor, Transition, TransitionError, TxPool,
};
pub use participants::{leader_decision, rotation, shuffle, LeaderDecision, ParticipantRegistry};
pub use producer::{BlockProducer, ProducerConfig, ProductionError};
pub use selector::{Selection, StopReason, TransactionSelector};
pub use verifier::{replay_block, BlockVerifier, ReplayError, ReplayVerifier, Replayed, Verdict};
pub use worker::{
    SequencerWorker, SequencerWorkerBuilder, SkipReason, TickOutcome, WorkerConfig, WorkerError,
    WorkerState, WorkerStats,
};

#[cfg(test)]
mod tests;
