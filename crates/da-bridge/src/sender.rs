//! Data submission with inclusion tracking

use crate::{AppId, CallIndex, DaAccount, DaClient, DaError, DaExtrinsic, ExtrinsicStatus, WaitFor};
use settlement_primitives::H256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of a data submission
#[derive(Debug, Clone)]
pub struct SubmitResult {
    /// Extrinsic hash
    pub tx_hash: H256,
    /// DA block the extrinsic landed in
    pub block_number: u64,
}

#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Give up waiting for the wanted status after this long
    pub inclusion_timeout: Duration,
    /// How often the extrinsic status is polled
    pub status_poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            inclusion_timeout: Duration::from_secs(60),
            status_poll_interval: Duration::from_millis(250),
        }
    }
}

/// Publishes payloads to the DA chain under one app id
pub struct DaSender {
    client: Arc<dyn DaClient>,
    account: DaAccount,
    app_id: AppId,
    call_index: CallIndex,
    nonce: AtomicU64,
    config: SenderConfig,
}

impl DaSender {
    pub fn new(
        client: Arc<dyn DaClient>,
        account: DaAccount,
        app_id: AppId,
        call_index: CallIndex,
        config: SenderConfig,
    ) -> Self {
        Self {
            client,
            account,
            app_id,
            call_index,
            nonce: AtomicU64::new(0),
            config,
        }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Submit `data` and block until the extrinsic reaches `wanted`.
    ///
    /// Times out after `inclusion_timeout`; a timeout is a failed submission
    /// and is never retried here.
    pub async fn send_and_wait_for_status(
        &self,
        data: Vec<u8>,
        wanted: WaitFor,
    ) -> Result<SubmitResult, DaError> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let extrinsic = DaExtrinsic::signed(&self.account, self.app_id, self.call_index, nonce, data);
        let len = extrinsic.data.len();

        let hash = self.client.submit(extrinsic).await?;
        tracing::debug!("Submitted {} bytes to DA as {}", len, hash);

        let timeout = self.config.inclusion_timeout;
        match tokio::time::timeout(timeout, self.wait_for_status(hash, wanted)).await {
            Ok(result) => result,
            Err(_) => Err(DaError::InclusionTimeout {
                hash,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn wait_for_status(&self, hash: H256, wanted: WaitFor) -> Result<SubmitResult, DaError> {
        loop {
            match self.client.extrinsic_status(&hash).await? {
                ExtrinsicStatus::Dropped => return Err(DaError::Dropped(hash)),
                status if status.satisfies(wanted) => {
                    return Ok(SubmitResult {
                        tx_hash: hash,
                        block_number: status.block_number().unwrap_or_default(),
                    });
                }
                _ => tokio::time::sleep(self.config.status_poll_interval).await,
            }
        }
    }
}
