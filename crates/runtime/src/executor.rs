//! Balance-transfer state machine
//!
//! State is a sorted map of accounts. Every committed state is kept under its
//! root in a DashMap, so any known parent root can be built on (leaders) or
//! replayed against (fraud verification).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use settlement_consensus::{ExecutionError, StateExecutor, Transition, TransitionError};
use settlement_primitives::{Address, Header, Log, Receipt, Transaction, H256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Gas charged for a plain transfer
pub const TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// Accounts in address order
pub type State = BTreeMap<Address, Account>;

/// Root over every account in address order. The empty state has the zero root.
pub fn state_root(state: &State) -> H256 {
    if state.is_empty() {
        return H256::ZERO;
    }
    let mut hasher = blake3::Hasher::new();
    for (address, account) in state {
        hasher.update(address.as_ref());
        hasher.update(&account.balance.to_le_bytes());
        hasher.update(&account.nonce.to_le_bytes());
    }
    H256(*hasher.finalize().as_bytes())
}

#[derive(Clone)]
pub struct BalanceExecutor {
    states: Arc<DashMap<H256, Arc<State>>>,
}

impl BalanceExecutor {
    pub fn new() -> Self {
        let states = DashMap::new();
        states.insert(H256::ZERO, Arc::new(State::new()));
        Self {
            states: Arc::new(states),
        }
    }

    /// Register a genesis allocation and return its root
    pub fn genesis(&self, alloc: &[(Address, u64)]) -> H256 {
        let mut state = State::new();
        for (address, balance) in alloc {
            state.entry(*address).or_default().balance += balance;
        }
        let root = state_root(&state);
        self.states.insert(root, Arc::new(state));
        tracing::info!("Genesis state {} with {} accounts", root, alloc.len());
        root
    }

    pub fn account(&self, root: &H256, address: &Address) -> Option<Account> {
        self.states
            .get(root)
            .and_then(|state| state.get(address).copied())
    }

    pub fn has_state(&self, root: &H256) -> bool {
        self.states.contains_key(root)
    }
}

impl Default for BalanceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StateExecutor for BalanceExecutor {
    fn begin_txn(
        &self,
        parent_root: H256,
        header: &Header,
        coinbase: Address,
    ) -> Result<Box<dyn Transition>, ExecutionError> {
        let parent = self
            .states
            .get(&parent_root)
            .map(|s| s.value().clone())
            .ok_or(ExecutionError::UnknownStateRoot(parent_root))?;

        Ok(Box::new(BalanceTransition {
            state: (*parent).clone(),
            gas_limit: header.gas_limit,
            gas_used: 0,
            coinbase,
            receipts: Vec::new(),
            states: self.states.clone(),
        }))
    }
}

struct BalanceTransition {
    state: State,
    gas_limit: u64,
    gas_used: u64,
    coinbase: Address,
    receipts: Vec<Receipt>,
    states: Arc<DashMap<H256, Arc<State>>>,
}

fn permanent(reason: impl Into<String>) -> TransitionError {
    TransitionError::Application {
        reason: reason.into(),
        recoverable: false,
    }
}

impl Transition for BalanceTransition {
    fn write(&mut self, tx: &Transaction) -> Result<(), TransitionError> {
        if tx.gas < TRANSFER_GAS {
            return Err(permanent(format!(
                "intrinsic gas too low: have {}, want {}",
                tx.gas, TRANSFER_GAS
            )));
        }
        if self.gas_used + tx.gas > self.gas_limit {
            return Err(TransitionError::GasLimitReached);
        }

        let sender = self.state.get(&tx.from).copied().unwrap_or_default();
        if tx.nonce > sender.nonce {
            return Err(TransitionError::Application {
                reason: format!("nonce too high: have {}, tx {}", sender.nonce, tx.nonce),
                recoverable: true,
            });
        }
        if tx.nonce < sender.nonce {
            return Err(permanent(format!(
                "nonce too low: have {}, tx {}",
                sender.nonce, tx.nonce
            )));
        }

        let fee = TRANSFER_GAS
            .checked_mul(tx.gas_price)
            .ok_or_else(|| permanent("fee overflow"))?;
        let cost = fee
            .checked_add(tx.value)
            .ok_or_else(|| permanent("cost overflow"))?;
        if sender.balance < cost {
            return Err(permanent(format!(
                "insufficient funds: have {}, want {}",
                sender.balance, cost
            )));
        }

        let from = self.state.entry(tx.from).or_default();
        from.balance -= cost;
        from.nonce += 1;
        self.state.entry(tx.to).or_default().balance += tx.value;
        self.state.entry(self.coinbase).or_default().balance += fee;

        self.gas_used += TRANSFER_GAS;
        self.receipts.push(Receipt {
            tx_hash: tx.hash(),
            success: true,
            gas_used: TRANSFER_GAS,
            cumulative_gas_used: self.gas_used,
            logs: vec![Log {
                address: tx.to,
                topic: tx.hash(),
                data: tx.value.to_le_bytes().to_vec(),
            }],
        });

        Ok(())
    }

    fn commit(&mut self) -> (Vec<Log>, H256) {
        let root = state_root(&self.state);
        self.states
            .entry(root)
            .or_insert_with(|| Arc::new(self.state.clone()));
        let logs = self
            .receipts
            .iter()
            .flat_map(|r| r.logs.iter().cloned())
            .collect();
        (logs, root)
    }

    fn total_gas(&self) -> u64 {
        self.gas_used
    }

    fn receipts(&self) -> Vec<Receipt> {
        self.receipts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn tx(nonce: u64, value: u64) -> Transaction {
        Transaction {
            nonce,
            from: addr(1),
            to: addr(2),
            value,
            gas: TRANSFER_GAS,
            gas_price: 1,
        }
    }

    fn open(executor: &BalanceExecutor, root: H256) -> Box<dyn Transition> {
        let header = Header::genesis(100_000, 0, root);
        executor.begin_txn(root, &header, addr(9)).unwrap()
    }

    #[test]
    fn test_transfer_moves_value_and_fee() {
        let executor = BalanceExecutor::new();
        let root = executor.genesis(&[(addr(1), 100_000)]);
        let mut transition = open(&executor, root);

        transition.write(&tx(0, 500)).unwrap();
        let (logs, new_root) = transition.commit();

        assert_eq!(logs.len(), 1);
        assert_eq!(transition.total_gas(), TRANSFER_GAS);
        assert_eq!(executor.account(&new_root, &addr(1)).unwrap().balance, 100_000 - 500 - 21_000);
        assert_eq!(executor.account(&new_root, &addr(1)).unwrap().nonce, 1);
        assert_eq!(executor.account(&new_root, &addr(2)).unwrap().balance, 500);
        assert_eq!(executor.account(&new_root, &addr(9)).unwrap().balance, 21_000);
        // parent state untouched
        assert_eq!(executor.account(&root, &addr(1)).unwrap().balance, 100_000);
    }

    #[test]
    fn test_failure_classification() {
        let executor = BalanceExecutor::new();
        let root = executor.genesis(&[(addr(1), 30_000)]);
        let mut transition = open(&executor, root);

        assert!(matches!(
            transition.write(&tx(3, 1)),
            Err(TransitionError::Application { recoverable: true, .. })
        ));
        assert!(matches!(
            transition.write(&tx(0, 20_000)),
            Err(TransitionError::Application { recoverable: false, .. })
        ));

        transition.write(&tx(0, 1)).unwrap();
        assert!(matches!(
            transition.write(&tx(0, 1)),
            Err(TransitionError::Application { recoverable: false, .. })
        ));
    }

    #[test]
    fn test_block_gas_exhaustion() {
        let executor = BalanceExecutor::new();
        let root = executor.genesis(&[(addr(1), 1_000_000)]);
        let header = Header::genesis(50_000, 0, root);
        let mut transition = executor.begin_txn(root, &header, addr(9)).unwrap();

        transition.write(&tx(0, 1)).unwrap();
        transition.write(&tx(1, 1)).unwrap();
        assert_eq!(transition.write(&tx(2, 1)), Err(TransitionError::GasLimitReached));
    }

    #[test]
    fn test_unknown_root_rejected() {
        let executor = BalanceExecutor::new();
        let missing = H256::digest(b"missing");
        let header = Header::genesis(1, 0, missing);
        assert!(matches!(
            executor.begin_txn(missing, &header, addr(0)),
            Err(ExecutionError::UnknownStateRoot(_))
        ));
    }

    #[test]
    fn test_root_is_deterministic() {
        let a = BalanceExecutor::new();
        let b = BalanceExecutor::new();
        assert_eq!(
            a.genesis(&[(addr(1), 5), (addr(2), 7)]),
            b.genesis(&[(addr(2), 7), (addr(1), 5)])
        );
        assert_eq!(state_root(&State::new()), H256::ZERO);
    }
}
