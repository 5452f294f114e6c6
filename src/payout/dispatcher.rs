//! Payout dispatcher worker.
//!
//! Polls `Processing` payouts and submits them to the settlement gateway.
//! Submission happens between transactions, never under wallet locks. A
//! gateway error leaves the payout in `Processing` for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::LedgerError;

use super::db;
use super::gateway::{GatewayOutcome, SettlementGateway};
use super::processor::PayoutProcessor;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
        }
    }
}

pub struct PayoutDispatcher {
    processor: Arc<PayoutProcessor>,
    gateway: Arc<dyn SettlementGateway>,
    config: DispatcherConfig,
}

impl PayoutDispatcher {
    pub fn new(
        processor: Arc<PayoutProcessor>,
        gateway: Arc<dyn SettlementGateway>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            processor,
            gateway,
            config,
        }
    }

    /// Poll loop. Runs until the task is aborted.
    pub async fn run(self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Payout dispatcher started"
        );
        loop {
            if let Err(e) = self.run_once().await {
                error!("Payout dispatch cycle failed: {}", e);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One dispatch cycle. Returns the number of payouts resolved.
    pub async fn run_once(&self) -> Result<usize, LedgerError> {
        let pending =
            db::find_processing(self.processor.pool(), self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(count = pending.len(), "Dispatching pending payouts");

        let mut resolved = 0;
        for payout in pending {
            match self.gateway.submit(&payout).await {
                Ok(GatewayOutcome::Accepted { provider_ref }) => {
                    match self
                        .processor
                        .mark_completed(&payout.id, &provider_ref)
                        .await
                    {
                        Ok(_) => resolved += 1,
                        Err(LedgerError::InvalidState(reason)) => {
                            // Raced with a concurrent resolver; the rest of
                            // the batch still gets dispatched
                            warn!(payout_id = %payout.id, reason, "Skipped resolved payout");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(GatewayOutcome::Rejected { code, message }) => {
                    match self
                        .processor
                        .mark_failed(&payout.id, &code, message.as_deref())
                        .await
                    {
                        Ok(_) => resolved += 1,
                        Err(LedgerError::InvalidState(reason)) => {
                            warn!(payout_id = %payout.id, reason, "Skipped resolved payout");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => {
                    // Verdict unknown, retry next cycle
                    error!(payout_id = %payout.id, "Gateway submission failed: {}", e);
                }
            }
        }
        Ok(resolved)
    }
}
