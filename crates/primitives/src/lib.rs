//! Shared types for the settlement chain
//!
//! Everything that crosses a crate boundary lives here:
//! - 32-byte hashes and 20-byte addresses
//! - Block headers, sealed settlement blocks and receipts
//! - Transactions
//! - Node roles and signing keys

pub mod block;
pub mod hash;
pub mod key;
pub mod role;
pub mod transaction;

pub use block::{ExtraData, FraudCheck, Header, Log, Receipt, Seal, SealError, SettlementBlock};
pub use hash::{Address, ParseHashError, H256};
pub use key::NodeKey;
pub use role::{ParseRoleError, Role};
pub use transaction::{transactions_root, Transaction};

/// The logical clock: the DA chain's block number at the time of observation.
pub type DaTick = u64;

/// Gas limit of the genesis block when none is configured.
pub const DEFAULT_GENESIS_GAS_LIMIT: u64 = 5_242_880;
