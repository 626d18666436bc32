//! Settlement chain transactions

use crate::hash::{Address, H256};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// A value transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's account nonce
    pub nonce: u64,
    /// Sender
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Amount transferred
    pub value: u64,
    /// Gas the sender is willing to spend
    pub gas: u64,
    /// Price per unit of gas, used for pool ordering
    pub gas_price: u64,
}

impl Transaction {
    pub fn hash(&self) -> H256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(self.from.as_ref());
        hasher.update(self.to.as_ref());
        hasher.update(&self.value.to_le_bytes());
        hasher.update(&self.gas.to_le_bytes());
        hasher.update(&self.gas_price.to_le_bytes());
        H256(*hasher.finalize().as_bytes())
    }

    /// Whether this transaction alone needs more gas than `limit`
    pub fn exceeds_gas_limit(&self, limit: u64) -> bool {
        self.gas > limit
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Transaction serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Root over an ordered transaction list
pub fn transactions_root(txs: &[Transaction]) -> H256 {
    if txs.is_empty() {
        return H256::ZERO;
    }
    let mut hasher = blake3::Hasher::new();
    for tx in txs {
        hasher.update(tx.hash().as_ref());
    }
    H256(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(nonce: u64, gas: u64) -> Transaction {
        Transaction {
            nonce,
            from: Address([1u8; 20]),
            to: Address([2u8; 20]),
            value: 10,
            gas,
            gas_price: 1,
        }
    }

    #[test]
    fn test_hash_depends_on_fields() {
        assert_ne!(transfer(0, 21_000).hash(), transfer(1, 21_000).hash());
        assert_eq!(transfer(0, 21_000).hash(), transfer(0, 21_000).hash());
    }

    #[test]
    fn test_exceeds_gas_limit() {
        let tx = transfer(0, 60);
        assert!(tx.exceeds_gas_limit(40));
        assert!(!tx.exceeds_gas_limit(60));
    }

    #[test]
    fn test_transactions_root_is_order_sensitive() {
        let a = transfer(0, 1);
        let b = transfer(1, 1);
        assert_eq!(transactions_root(&[]), H256::ZERO);
        assert_ne!(
            transactions_root(&[a.clone(), b.clone()]),
            transactions_root(&[b, a])
        );
    }
}
