//! Payout records and statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Currency, PayoutAccountId, PayoutId, WalletId};

/// Payout lifecycle
///
/// `Processing -> Completed` on provider confirmation, `Processing -> Failed`
/// on rejection. Failure reverses the debit; both end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum PayoutStatus {
    /// Debited from the wallet, awaiting provider confirmation
    Processing = 10,

    /// Terminal: provider confirmed the transfer
    Completed = 20,

    /// Terminal: provider rejected, funds restored to the wallet
    Failed = -10,
}

impl PayoutStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(PayoutStatus::Processing),
            20 => Some(PayoutStatus::Completed),
            -10 => Some(PayoutStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Processing => "PROCESSING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Withdrawal of available funds to an external settlement account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub wallet_id: WalletId,
    pub account_id: PayoutAccountId,
    /// Scaled units
    pub amount: u64,
    pub currency: Currency,
    pub status: PayoutStatus,
    /// Provider-side identifier, set on completion
    pub provider_ref: Option<String>,
    /// Machine-readable reason, set on failure
    pub failure_code: Option<String>,
    /// Human-readable detail accompanying `failure_code`
    pub failure_message: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// External settlement destination registered against a wallet.
///
/// Payouts are refused until the account passes provider verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub id: PayoutAccountId,
    pub wallet_id: WalletId,
    /// Settlement provider name ("stripe", "wise")
    pub provider: String,
    /// Provider-side account identifier
    pub external_ref: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for `PayoutProcessor::initiate`
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub wallet_id: WalletId,
    pub account_id: PayoutAccountId,
    pub amount: u64,
    pub currency: Currency,
    pub idempotency_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!PayoutStatus::Processing.is_terminal());
        assert!(PayoutStatus::Completed.is_terminal());
        assert!(PayoutStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_id_roundtrip() {
        for status in [
            PayoutStatus::Processing,
            PayoutStatus::Completed,
            PayoutStatus::Failed,
        ] {
            assert_eq!(PayoutStatus::from_id(status.id()), Some(status));
        }
        assert!(PayoutStatus::from_id(0).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(PayoutStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(PayoutStatus::Failed.to_string(), "FAILED");
    }
}
