//! Escrow intent record and requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Currency, EscrowId, Reference, WalletId};

use super::status::EscrowStatus;

/// Funds reserved for a specific collaborator reference (order, project).
///
/// # Invariants
/// - `captured_amount + refunded_amount <= amount`
/// - `payer_wallet_id != payee_wallet_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowIntent {
    pub id: EscrowId,
    /// Collaborator entity this escrow backs
    pub reference: Reference,
    pub payer_wallet_id: WalletId,
    pub payee_wallet_id: WalletId,
    /// Total reserved amount, scaled units
    pub amount: u64,
    pub currency: Currency,
    pub captured_amount: u64,
    pub refunded_amount: u64,
    /// Platform fee recorded at authorization; informational, settled by the
    /// fee pipeline outside this core
    pub fee_amount: u64,
    pub status: EscrowStatus,
    /// Administrative freeze: blocks capture and cancel, moves no funds
    pub is_on_hold: bool,
    pub hold_reason: Option<String>,
    /// Key of the authorize call that created this intent
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowIntent {
    /// Amount still capturable
    pub fn remaining(&self) -> u64 {
        self.amount.saturating_sub(self.captured_amount)
    }

    /// Amount still refundable out of what was captured
    pub fn refundable(&self) -> u64 {
        self.captured_amount.saturating_sub(self.refunded_amount)
    }
}

impl fmt::Display for EscrowIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Escrow[{}] {} payer={} payee={} amount={} captured={} refunded={} status={}",
            self.id,
            self.reference,
            self.payer_wallet_id,
            self.payee_wallet_id,
            self.amount,
            self.captured_amount,
            self.refunded_amount,
            self.status
        )
    }
}

/// Parameters for `EscrowEngine::authorize`
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub payer_wallet_id: WalletId,
    pub payee_wallet_id: WalletId,
    pub amount: u64,
    pub currency: Currency,
    pub reference: Reference,
    /// Platform fee to record on the intent (may be zero)
    pub fee_amount: u64,
    pub idempotency_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(amount: u64, captured: u64, refunded: u64) -> EscrowIntent {
        EscrowIntent {
            id: EscrowId::new(),
            reference: Reference::new("order", "order-1"),
            payer_wallet_id: WalletId::new(),
            payee_wallet_id: WalletId::new(),
            amount,
            currency: Currency::new("USD").unwrap(),
            captured_amount: captured,
            refunded_amount: refunded,
            fee_amount: 0,
            status: EscrowStatus::Held,
            is_on_hold: false,
            hold_reason: None,
            idempotency_key: "k1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_remaining() {
        assert_eq!(intent(100, 0, 0).remaining(), 100);
        assert_eq!(intent(100, 60, 0).remaining(), 40);
        assert_eq!(intent(100, 100, 0).remaining(), 0);
    }

    #[test]
    fn test_refundable() {
        assert_eq!(intent(100, 100, 0).refundable(), 100);
        assert_eq!(intent(100, 100, 30).refundable(), 70);
        assert_eq!(intent(100, 50, 50).refundable(), 0);
    }

    #[test]
    fn test_serde_roundtrip() {
        let i = intent(100, 60, 10);
        let json = serde_json::to_string(&i).unwrap();
        let back: EscrowIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, i.id);
        assert_eq!(back.captured_amount, 60);
        assert_eq!(back.status, EscrowStatus::Held);
    }
}
