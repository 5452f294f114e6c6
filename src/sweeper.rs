//! Expiry sweeper for stale escrow intents.
//!
//! Authorization and the hold commit in one transaction, so an intent that
//! sits in `Authorized` past the threshold is a crash artifact. The sweeper
//! expires it through the normal cancel path with a derived idempotency key,
//! which makes the sweep safe to re-run and safe against concurrent manual
//! cancels.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::escrow::{db, EscrowEngine};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub scan_interval: Duration,
    /// How long an intent may stay in `Authorized` before expiry
    pub stale_threshold: Duration,
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(15 * 60),
            batch_size: 100,
        }
    }
}

pub struct EscrowSweeper {
    engine: Arc<EscrowEngine>,
    config: SweeperConfig,
}

impl EscrowSweeper {
    pub fn new(engine: Arc<EscrowEngine>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Scan loop. Runs until the task is aborted.
    pub async fn run(self) {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            stale_threshold_ms = self.config.stale_threshold.as_millis() as u64,
            "Escrow sweeper started"
        );
        loop {
            match self.scan_and_expire().await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "Sweeper expired stale escrow intents"),
                Err(e) => error!("Sweeper scan failed: {}", e),
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One sweep. Returns the number of intents expired.
    pub async fn scan_and_expire(&self) -> Result<usize, LedgerError> {
        let stale = db::find_stale_authorized(
            self.engine.pool(),
            self.config.stale_threshold,
            self.config.batch_size,
        )
        .await?;
        if stale.is_empty() {
            return Ok(0);
        }
        debug!(count = stale.len(), "Found stale authorized intents");

        let mut expired = 0;
        for intent in stale {
            // Derived key: repeated sweeps of the same intent replay
            let key = format!("expire-{}", intent.id);
            match self.engine.cancel(&intent.id, &key).await {
                Ok(_) => expired += 1,
                Err(LedgerError::InvalidState(reason)) => {
                    // Raced with a manual transition or an admin freeze
                    warn!(escrow_id = %intent.id, reason, "Skipped stale intent");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}
