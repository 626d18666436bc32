//! Transaction selection for a block under construction
//!
//! Every transaction the pool offers is classified exactly once per block:
//! included, demoted (recoverable failure, retried in a later block), dropped
//! (can never be included), or left pooled when the block runs out of gas.

use crate::interfaces::{Transition, TransitionError, TxPool};
use settlement_primitives::Transaction;
use std::sync::Arc;

/// Why selection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PoolExhausted,
    GasLimitReached,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub included: Vec<Transaction>,
    pub demoted: Vec<Transaction>,
    pub dropped: Vec<Transaction>,
    pub stopped: StopReason,
}

impl Selection {
    fn new() -> Self {
        Self {
            included: Vec::new(),
            demoted: Vec::new(),
            dropped: Vec::new(),
            stopped: StopReason::PoolExhausted,
        }
    }
}

pub struct TransactionSelector {
    pool: Arc<dyn TxPool>,
}

impl TransactionSelector {
    pub fn new(pool: Arc<dyn TxPool>) -> Self {
        Self { pool }
    }

    /// Fill `transition` from the pool without exceeding `gas_limit`
    pub fn select(&self, gas_limit: u64, transition: &mut dyn Transition) -> Selection {
        let mut selection = Selection::new();
        self.pool.prepare();

        while let Some(tx) = self.pool.peek() {
            let remaining = gas_limit.saturating_sub(transition.total_gas());
            if tx.exceeds_gas_limit(remaining) {
                tracing::debug!(
                    "Dropping {}: needs {} gas, {} left",
                    tx.hash(),
                    tx.gas,
                    remaining
                );
                self.pool.drop_tx(&tx);
                selection.dropped.push(tx);
                continue;
            }

            match transition.write(&tx) {
                Ok(()) => {
                    self.pool.pop(&tx);
                    selection.included.push(tx);
                }
                Err(TransitionError::GasLimitReached) => {
                    selection.stopped = StopReason::GasLimitReached;
                    break;
                }
                Err(TransitionError::Application {
                    reason,
                    recoverable: true,
                }) => {
                    tracing::debug!("Demoting {}: {}", tx.hash(), reason);
                    self.pool.demote(&tx);
                    selection.demoted.push(tx);
                }
                Err(e) => {
                    tracing::debug!("Dropping {}: {}", tx.hash(), e);
                    self.pool.drop_tx(&tx);
                    selection.dropped.push(tx);
                }
            }
        }

        selection
    }
}
