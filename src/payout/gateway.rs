//! Settlement provider boundary.
//!
//! The dispatcher talks to the provider through this trait, outside any
//! database transaction. Real deployments plug in an HTTP client; tests use
//! the in-memory mock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::LedgerError;

use super::types::Payout;

/// Provider verdict for a submitted payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Transfer accepted; `provider_ref` identifies it on the provider side
    Accepted { provider_ref: String },
    /// Transfer rejected with a machine-readable code and optional detail
    Rejected {
        code: String,
        message: Option<String>,
    },
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Submit one payout to the provider.
    ///
    /// An `Err` means the verdict is unknown (network trouble, provider
    /// outage); the payout stays in `Processing` and is retried.
    async fn submit(&self, payout: &Payout) -> Result<GatewayOutcome, LedgerError>;
}

/// In-memory gateway with scripted verdicts. Unscripted payouts are
/// accepted.
#[derive(Default)]
pub struct MockGateway {
    verdicts: Mutex<HashMap<String, GatewayOutcome>>,
    submitted: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the verdict for a payout id.
    pub fn script(&self, payout_id: &str, outcome: GatewayOutcome) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(payout_id.to_string(), outcome);
    }

    /// Payout ids submitted so far, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettlementGateway for MockGateway {
    async fn submit(&self, payout: &Payout) -> Result<GatewayOutcome, LedgerError> {
        let id = payout.id.to_string();
        self.submitted.lock().unwrap().push(id.clone());

        let outcome = self
            .verdicts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or(GatewayOutcome::Accepted {
                provider_ref: format!("mock-{}", id),
            });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, PayoutAccountId, PayoutId, WalletId};

    fn payout() -> Payout {
        Payout {
            id: PayoutId::new(),
            wallet_id: WalletId::new(),
            account_id: PayoutAccountId::new(),
            amount: 100,
            currency: Currency::new("USD").unwrap(),
            status: super::super::types::PayoutStatus::Processing,
            provider_ref: None,
            failure_code: None,
            failure_message: None,
            idempotency_key: "k".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_accepts_by_default() {
        let gw = MockGateway::new();
        let p = payout();
        match gw.submit(&p).await.unwrap() {
            GatewayOutcome::Accepted { provider_ref } => {
                assert!(provider_ref.starts_with("mock-"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(gw.submissions(), vec![p.id.to_string()]);
    }

    #[tokio::test]
    async fn test_mock_scripted_rejection() {
        let gw = MockGateway::new();
        let p = payout();
        gw.script(
            &p.id.to_string(),
            GatewayOutcome::Rejected {
                code: "account_closed".to_string(),
                message: None,
            },
        );
        assert_eq!(
            gw.submit(&p).await.unwrap(),
            GatewayOutcome::Rejected {
                code: "account_closed".to_string(),
                message: None,
            }
        );
    }
}
