//! DA chain block and extrinsic types

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use settlement_primitives::{NodeKey, H256};

/// Application id the settlement chain submits under
pub type AppId = u32;

/// (pallet index, call index) of the data-submission call
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CallIndex {
    pub section: u8,
    pub method: u8,
}

/// A signed data-submission extrinsic
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DaExtrinsic {
    pub app_id: AppId,
    pub call_index: CallIndex,
    /// Public key of the submitting DA account
    pub signer: [u8; 32],
    pub nonce: u64,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
}

impl DaExtrinsic {
    /// Build and sign an extrinsic
    pub fn signed(
        account: &DaAccount,
        app_id: AppId,
        call_index: CallIndex,
        nonce: u64,
        data: Vec<u8>,
    ) -> Self {
        let mut ext = Self {
            app_id,
            call_index,
            signer: account.id(),
            nonce,
            data,
            signature: Vec::new(),
        };
        ext.signature = account.key.sign(ext.signing_payload().as_ref()).to_vec();
        ext
    }

    fn signing_payload(&self) -> H256 {
        let mut preimage = Vec::with_capacity(46 + self.data.len());
        preimage.extend_from_slice(&self.app_id.to_le_bytes());
        preimage.extend_from_slice(&[self.call_index.section, self.call_index.method]);
        preimage.extend_from_slice(&self.signer);
        preimage.extend_from_slice(&self.nonce.to_le_bytes());
        preimage.extend_from_slice(&self.data);
        H256::digest(&preimage)
    }

    pub fn hash(&self) -> H256 {
        H256::digest(&borsh::to_vec(self).expect("DaExtrinsic serialization should not fail"))
    }

    /// Whether this extrinsic is a data submission for `app_id` through `call_index`
    pub fn matches(&self, app_id: AppId, call_index: CallIndex) -> bool {
        self.app_id == app_id && self.call_index == call_index
    }
}

/// A block of the DA chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaBlock {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    /// Unix seconds
    pub timestamp: u64,
    pub extrinsics: Vec<DaExtrinsic>,
}

/// Lifecycle of a submitted extrinsic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtrinsicStatus {
    /// Known to the DA node, not yet in a block
    Ready,
    /// Included in the given DA block
    InBlock(u64),
    /// Included and finalized in the given DA block
    Finalized(u64),
    /// Evicted without inclusion
    Dropped,
}

/// Inclusion level a submitter waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    InBlock,
    Finalized,
}

impl ExtrinsicStatus {
    pub fn satisfies(&self, wanted: WaitFor) -> bool {
        match (self, wanted) {
            (ExtrinsicStatus::InBlock(_), WaitFor::InBlock) => true,
            (ExtrinsicStatus::Finalized(_), _) => true,
            _ => false,
        }
    }

    pub fn block_number(&self) -> Option<u64> {
        match self {
            ExtrinsicStatus::InBlock(n) | ExtrinsicStatus::Finalized(n) => Some(*n),
            _ => None,
        }
    }
}

/// Keypair that pays for DA submissions
#[derive(Debug, Clone)]
pub struct DaAccount {
    key: NodeKey,
}

impl DaAccount {
    pub fn new(key: NodeKey) -> Self {
        Self { key }
    }

    /// Account id (the public key)
    pub fn id(&self) -> [u8; 32] {
        self.key.public_key()
    }
}
