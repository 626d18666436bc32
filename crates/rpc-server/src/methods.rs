//! RPC Methods - JSON-RPC method handlers

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use settlement_consensus::{ChainStore, WorkerState, WorkerStats};
use settlement_primitives::{Address, SettlementBlock, Transaction};
use settlement_runtime::{BalanceExecutor, MemoryChain, MemoryPool};
use std::sync::Arc;
use tokio::sync::watch;

/// RPC context shared across handlers
pub struct RpcContext {
    pub chain: Arc<MemoryChain>,
    pub pool: Arc<MemoryPool>,
    pub executor: Arc<BalanceExecutor>,
    pub stats: watch::Receiver<WorkerStats>,
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct SendTransactionRequest {
    /// Base64 of the borsh-encoded transaction
    pub transaction: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Head the balance was read at
    pub block: u64,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: WorkerState,
}

// ============ RPC Handlers ============

/// Handle sendTransaction RPC method
pub fn handle_send_transaction(
    ctx: &RpcContext,
    params: SendTransactionRequest,
) -> Result<String, RpcError> {
    let tx_bytes = BASE64
        .decode(&params.transaction)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;

    let tx = Transaction::from_bytes(&tx_bytes)
        .map_err(|_| RpcError::InvalidParams("Invalid transaction format".to_string()))?;

    let hash = ctx
        .pool
        .add(tx)
        .map_err(|e| RpcError::InvalidParams(e.to_string()))?;

    Ok(hash.to_string())
}

/// Handle getBlockNumber RPC method
pub fn handle_get_block_number(ctx: &RpcContext) -> Result<u64, RpcError> {
    Ok(ctx.chain.head_number())
}

/// Handle getBlockByNumber RPC method
pub fn handle_get_block_by_number(
    ctx: &RpcContext,
    number: u64,
) -> Result<Option<SettlementBlock>, RpcError> {
    Ok(ctx.chain.block_by_number(number))
}

/// Handle getBalance RPC method, read at the current head
pub fn handle_get_balance(ctx: &RpcContext, address: &str) -> Result<BalanceResponse, RpcError> {
    let address: Address = address
        .parse()
        .map_err(|_| RpcError::InvalidParams("Invalid address".to_string()))?;

    let head = ctx.chain.header();
    let account = ctx
        .executor
        .account(&head.state_root, &address)
        .unwrap_or_default();

    Ok(BalanceResponse {
        block: head.number,
        balance: account.balance,
        nonce: account.nonce,
    })
}

/// Handle getSequencerStatus RPC method
pub fn handle_get_sequencer_status(ctx: &RpcContext) -> Result<WorkerStats, RpcError> {
    Ok(ctx.stats.borrow().clone())
}

/// Handle getHealth RPC method
pub fn handle_get_health(ctx: &RpcContext) -> Result<HealthResponse, RpcError> {
    let state = ctx.stats.borrow().state;
    let status = match state {
        WorkerState::Running => "ok",
        WorkerState::WaitingForStake => "waiting",
        WorkerState::ShuttingDown | WorkerState::Stopped => "stopped",
    };
    Ok(HealthResponse {
        status: status.to_string(),
        state,
    })
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
}
