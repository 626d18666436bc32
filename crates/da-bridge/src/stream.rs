//! Ordered DA block stream
//!
//! A background task walks the DA chain one block number at a time and hands
//! blocks to the consumer over a bounded channel. A number is only advanced
//! after its block was delivered, so transient RPC failures cause a retry of
//! the same number rather than a gap.

use crate::{DaBlock, DaClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Stream tuning
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// How long to wait before asking again for a block that doesn't exist yet
    pub poll_interval: Duration,
    /// Back-off after a failed request
    pub retry_interval: Duration,
    /// Blocks buffered between the fetch task and the consumer
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(2),
            buffer: 64,
        }
    }
}

/// Lazy, ordered, gap-free sequence of DA blocks starting at a given number
pub struct BlockStream {
    rx: mpsc::Receiver<DaBlock>,
    task: JoinHandle<()>,
}

impl BlockStream {
    /// Start streaming from block `from` (inclusive)
    pub fn spawn(client: Arc<dyn DaClient>, from: u64, config: StreamConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let task = tokio::spawn(fetch_blocks(client, from, config, tx));
        tracing::info!("DA block stream started at block {}", from);
        Self { rx, task }
    }

    /// Next block, `None` once the stream is closed
    pub async fn recv(&mut self) -> Option<DaBlock> {
        self.rx.recv().await
    }

    /// Stop the fetch task and release the subscription
    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn fetch_blocks(
    client: Arc<dyn DaClient>,
    from: u64,
    config: StreamConfig,
    tx: mpsc::Sender<DaBlock>,
) {
    let mut next = from;

    loop {
        match client.block(next).await {
            Ok(Some(block)) if block.number == next => {
                if tx.send(block).await.is_err() {
                    tracing::debug!("DA block stream consumer went away at block {}", next);
                    return;
                }
                next += 1;
            }
            Ok(Some(block)) => {
                tracing::warn!(
                    "DA node answered block {} when asked for {}; retrying",
                    block.number,
                    next
                );
                tokio::time::sleep(config.retry_interval).await;
            }
            Ok(None) => {
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(e) => {
                tracing::warn!("Failed to fetch DA block {}: {}; retrying", next, e);
                tokio::time::sleep(config.retry_interval).await;
            }
        }
    }
}
