//! Settlement blocks, headers and receipts

use crate::hash::{Address, H256};
use crate::key::NodeKey;
use crate::transaction::Transaction;
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealError {
    #[error("header is not sealed")]
    Missing,

    #[error("seal public key is malformed")]
    BadPublicKey,

    #[error("seal signature is malformed")]
    BadSignature,

    #[error("seal signature does not verify")]
    InvalidSignature,
}

/// Miner signature over the seal hash of a header
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Seal {
    /// ed25519 public key of the signer
    pub signer: [u8; 32],
    /// 64-byte ed25519 signature
    pub signature: Vec<u8>,
}

/// Request to evaluate a previously published block for fraud
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FraudCheck {
    /// Hash of the block under accusation
    pub accused_block: H256,
    /// Who raised the check
    pub accuser: Address,
    /// Pointer to the evidence (hash of the offending transaction or claimed root)
    pub evidence: H256,
}

/// Header extra data
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ExtraData {
    /// Addresses allowed to seal this block
    pub validators: Vec<Address>,
    /// Filled in last, after every other header field is final
    pub seal: Option<Seal>,
    /// Present when this block carries a dispute rather than extending the chain
    pub fraud_check: Option<FraudCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: H256,
    pub number: u64,
    pub miner: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub state_root: H256,
    pub tx_root: H256,
    pub extra: ExtraData,
    /// Cached identity; see [`Header::compute_hash`]
    pub hash: H256,
}

impl Header {
    /// Genesis header with the given gas limit and state root
    pub fn genesis(gas_limit: u64, timestamp: u64, state_root: H256) -> Self {
        let mut header = Self {
            parent_hash: H256::ZERO,
            number: 0,
            miner: Address::ZERO,
            gas_limit,
            gas_used: 0,
            timestamp,
            state_root,
            tx_root: H256::ZERO,
            extra: ExtraData::default(),
            hash: H256::ZERO,
        };
        header.compute_hash();
        header
    }

    fn hash_fields(&self, hasher: &mut blake3::Hasher) {
        hasher.update(self.parent_hash.as_ref());
        hasher.update(&self.number.to_le_bytes());
        hasher.update(self.miner.as_ref());
        hasher.update(&self.gas_limit.to_le_bytes());
        hasher.update(&self.gas_used.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(self.state_root.as_ref());
        hasher.update(self.tx_root.as_ref());
        hasher.update(&(self.extra.validators.len() as u64).to_le_bytes());
        for validator in &self.extra.validators {
            hasher.update(validator.as_ref());
        }
        match &self.extra.fraud_check {
            Some(check) => {
                hasher.update(&[1]);
                hasher.update(check.accused_block.as_ref());
                hasher.update(check.accuser.as_ref());
                hasher.update(check.evidence.as_ref());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }

    /// Hash of every field except the seal and the cached hash. This is what the miner signs.
    pub fn seal_hash(&self) -> H256 {
        let mut hasher = blake3::Hasher::new();
        self.hash_fields(&mut hasher);
        H256(*hasher.finalize().as_bytes())
    }

    /// Recompute and cache the header hash, seal included
    pub fn compute_hash(&mut self) -> H256 {
        let mut hasher = blake3::Hasher::new();
        self.hash_fields(&mut hasher);
        match &self.extra.seal {
            Some(seal) => {
                hasher.update(&[1]);
                hasher.update(&seal.signer);
                hasher.update(&seal.signature);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        self.hash = H256(*hasher.finalize().as_bytes());
        self.hash
    }

    /// Sign the seal hash with `key`, then refresh the header hash
    pub fn write_seal(&mut self, key: &NodeKey) {
        let signature = key.sign(self.seal_hash().as_ref());
        self.extra.seal = Some(Seal {
            signer: key.public_key(),
            signature: signature.to_vec(),
        });
        self.compute_hash();
    }

    /// Verify the seal and return the address that produced it
    pub fn recover_signer(&self) -> Result<Address, SealError> {
        let seal = self.extra.seal.as_ref().ok_or(SealError::Missing)?;
        let key = VerifyingKey::from_bytes(&seal.signer).map_err(|_| SealError::BadPublicKey)?;
        let signature =
            Signature::from_slice(&seal.signature).map_err(|_| SealError::BadSignature)?;
        key.verify(self.seal_hash().as_ref(), &signature)
            .map_err(|_| SealError::InvalidSignature)?;
        Ok(Address::from_public_key(&seal.signer))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topic: H256,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

/// A sealed block of the settlement chain
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SettlementBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

impl SettlementBlock {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> H256 {
        self.header.hash
    }

    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    pub fn fraud_check(&self) -> Option<&FraudCheck> {
        self.header.extra.fraud_check.as_ref()
    }

    /// Encoding used for the DA payload
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("SettlementBlock serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}
