//! Node roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid node role {0}")]
pub struct ParseRoleError(pub String);

/// What a node does with the DA block stream. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Sequencer that is staked in genesis and starts the chain
    BootstrapSequencer,
    /// Staked block producer taking part in the rotation
    Sequencer,
    /// Follows the chain and checks blocks, never produces
    Validator,
    /// Follows the chain and raises fraud checks, never produces
    #[serde(rename = "watchtower")]
    WatchTower,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::BootstrapSequencer,
        Role::Sequencer,
        Role::Validator,
        Role::WatchTower,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::BootstrapSequencer => "bootstrap-sequencer",
            Role::Sequencer => "sequencer",
            Role::Validator => "validator",
            Role::WatchTower => "watchtower",
        }
    }

    /// Variant of the name usable as a metric or log key
    pub fn log_str(&self) -> String {
        self.as_str().replace('-', "_")
    }

    /// Whether nodes with this role take part in leader rotation
    pub fn produces_blocks(&self) -> bool {
        matches!(self, Role::BootstrapSequencer | Role::Sequencer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ParseRoleError(s.to_string()))
    }
}
