//! In-process staking registry
//!
//! Stands in for the staking contract on a devnet. Several nodes in one
//! process share a single instance.

use parking_lot::RwLock;
use serde::Serialize;
use settlement_consensus::{FraudRecord, RegistryError, StakeEntry, StakingRegistry};
use settlement_primitives::{Address, NodeKey, Role, H256};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct StakingConfig {
    /// Stakes below this don't count as active
    pub min_stake: u128,
    /// Percentage of the stake burned per proven fraud
    pub slash_percent: u8,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            min_stake: 1_000,
            slash_percent: 50,
        }
    }
}

/// A slash applied to a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashEvent {
    pub offender: Address,
    pub block: H256,
    pub amount: u128,
}

pub struct MemoryStaking {
    config: StakingConfig,
    stakes: RwLock<BTreeMap<Address, StakeEntry>>,
    slashes: RwLock<Vec<SlashEvent>>,
}

impl MemoryStaking {
    pub fn new(config: StakingConfig) -> Self {
        Self {
            config,
            stakes: RwLock::new(BTreeMap::new()),
            slashes: RwLock::new(Vec::new()),
        }
    }

    /// Add `amount` to the stake of `address`
    pub fn stake(&self, address: Address, amount: u128, role: Role) {
        let mut stakes = self.stakes.write();
        let entry = stakes.entry(address).or_insert(StakeEntry {
            address,
            amount: 0,
            role,
        });
        entry.amount += amount;
        entry.role = role;
        tracing::info!("{} staked {} as {}", address, amount, role);
    }

    pub fn stake_of(&self, address: &Address) -> u128 {
        self.stakes
            .read()
            .get(address)
            .map(|e| e.amount)
            .unwrap_or_default()
    }

    pub fn slash_events(&self) -> Vec<SlashEvent> {
        self.slashes.read().clone()
    }
}

impl Default for MemoryStaking {
    fn default() -> Self {
        Self::new(StakingConfig::default())
    }
}

impl StakingRegistry for MemoryStaking {
    fn stakes(&self) -> Result<Vec<StakeEntry>, RegistryError> {
        Ok(self
            .stakes
            .read()
            .values()
            .filter(|e| e.amount >= self.config.min_stake)
            .cloned()
            .collect())
    }

    fn is_staked(&self, address: &Address) -> Result<bool, RegistryError> {
        Ok(self.stake_of(address) >= self.config.min_stake)
    }

    fn slash(&self, offender: &Address, record: &FraudRecord) -> Result<(), RegistryError> {
        let mut stakes = self.stakes.write();
        let entry = stakes
            .get_mut(offender)
            .ok_or(RegistryError::NotStaked(*offender))?;

        let amount = entry.amount * self.config.slash_percent as u128 / 100;
        entry.amount -= amount;
        tracing::warn!(
            "Slashed {} of {} for block {} (accused by {})",
            amount,
            offender,
            record.accused_block,
            record.accuser
        );

        self.slashes.write().push(SlashEvent {
            offender: *offender,
            block: record.accused_block,
            amount,
        });
        Ok(())
    }

    fn unstake(&self, key: &NodeKey) -> Result<(), RegistryError> {
        let address = key.address();
        let entry = self
            .stakes
            .write()
            .remove(&address)
            .ok_or(RegistryError::NotStaked(address))?;
        tracing::info!("{} withdrew stake of {}", address, entry.amount);
        Ok(())
    }
}
