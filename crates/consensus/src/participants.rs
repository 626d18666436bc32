//! Staked participant rotation and leader determination
//!
//! Every honest node computes the same ordered participant set for a tick
//! without talking to anyone: the staked sequencer addresses are sorted and
//! then shuffled with the DA tick as seed. The first address leads.
//!
//! Shuffle (must be identical on every node):
//! 1. sort addresses ascending by their 20 raw bytes, drop duplicates
//! 2. for `i` from `len - 1` down to `1`:
//!    `j = u64_le(blake3(tick_le ‖ i_le)[0..8]) % (i + 1)`, swap `i` and `j`
//!
//! where `tick_le` and `i_le` are the 8-byte little-endian encodings.

use crate::interfaces::{RegistryError, StakingRegistry};
use settlement_primitives::{Address, DaTick};
use std::sync::Arc;

/// Deterministic in-place Fisher-Yates shuffle seeded by `seed`
pub fn shuffle(addresses: &mut [Address], seed: DaTick) {
    for i in (1..addresses.len()).rev() {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed.to_le_bytes());
        hasher.update(&(i as u64).to_le_bytes());
        let digest = hasher.finalize();

        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        let j = (u64::from_le_bytes(word) % (i as u64 + 1)) as usize;
        addresses.swap(i, j);
    }
}

/// Canonical rotation order of `staked` for `tick`
pub fn rotation(staked: impl IntoIterator<Item = Address>, tick: DaTick) -> Vec<Address> {
    let mut set: Vec<Address> = staked.into_iter().collect();
    set.sort_unstable();
    set.dedup();
    shuffle(&mut set, tick);
    set
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderDecision {
    /// The local node produces this tick's block
    Leader,
    /// Someone else does
    Follower { leader: Address },
}

/// Pure leader check over an ordered active set. `None` when the set is empty.
pub fn leader_decision(active_set: &[Address], local: &Address) -> Option<LeaderDecision> {
    let leader = active_set.first()?;
    if leader == local {
        Some(LeaderDecision::Leader)
    } else {
        Some(LeaderDecision::Follower { leader: *leader })
    }
}

/// Which staked sequencers are active, and in what order, at a given tick
#[derive(Clone)]
pub struct ParticipantRegistry {
    staking: Arc<dyn StakingRegistry>,
}

impl ParticipantRegistry {
    pub fn new(staking: Arc<dyn StakingRegistry>) -> Self {
        Self { staking }
    }

    /// Staked sequencers in rotation order for `tick`
    pub fn active_set(&self, tick: DaTick) -> Result<Vec<Address>, RegistryError> {
        let stakes = self.staking.stakes()?;
        Ok(rotation(
            stakes
                .into_iter()
                .filter(|s| s.role.produces_blocks())
                .map(|s| s.address),
            tick,
        ))
    }

    pub fn is_active(&self, address: &Address) -> Result<bool, RegistryError> {
        self.staking.is_staked(address)
    }
}
