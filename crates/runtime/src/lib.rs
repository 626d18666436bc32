//! Settlement Runtime - Collaborators the sequencer worker drives
//!
//! This crate provides the reference implementations used by the node:
//! - `MemoryChain`: chain storage with optional sled persistence
//! - `BalanceExecutor`: account balances and transfer execution
//! - `MemoryPool`: gas-price ordered transaction pool
//! - `MemoryStaking`: staking registry for single-process devnets

pub mod chain;
pub mod executor;
pub mod persistence;
pub mod pool;
pub mod staking;

pub use chain::{GasLimitPolicy, MemoryChain};
pub use executor::{state_root, Account, BalanceExecutor, TRANSFER_GAS};
pub use persistence::{ChainMetadata, PersistentStore, StoredBlock};
pub use pool::{MemoryPool, PoolConfig, PoolError};
pub use staking::{MemoryStaking, SlashEvent, StakingConfig};
