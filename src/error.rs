//! Error taxonomy for the escrow/ledger core.
//!
//! Every validation and invariant failure is detected before any ledger write
//! and surfaced synchronously. An error returned to the caller guarantees no
//! partial posting persisted.

use thiserror::Error;

use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A debit would drive a wallet balance below zero.
    #[error("insufficient funds in wallet {0}")]
    InsufficientFunds(String),

    /// Operation currency differs from the wallet's currency.
    #[error("currency mismatch: wallet holds {expected}, operation used {provided}")]
    CurrencyMismatch { expected: String, provided: String },

    /// Illegal lifecycle transition (e.g. capturing a cancelled escrow).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A refund would push total refunds past the captured amount.
    #[error("refund exceeds captured amount")]
    RefundExceedsCaptured,

    /// The same idempotency key is currently in flight.
    #[error("operation with this idempotency key is still in flight")]
    ConcurrentRetry,

    /// Unknown wallet/escrow/payout/refund/account.
    #[error("{0} not found")]
    NotFound(String),

    /// Payout account has not been verified by the collaborator.
    #[error("payout account not verified")]
    AccountNotVerified,

    /// Zero or malformed amount at the boundary.
    #[error("invalid amount: must be positive")]
    InvalidAmount,

    /// Malformed currency code.
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    /// Ledger replay disagrees with the cached wallet balance.
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Stable machine-readable reason code for collaborators.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InvalidState(_) => "INVALID_STATE",
            LedgerError::RefundExceedsCaptured => "REFUND_EXCEEDS_CAPTURED",
            LedgerError::ConcurrentRetry => "CONCURRENT_RETRY",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::AccountNotVerified => "ACCOUNT_NOT_VERIFIED",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::InvalidCurrency(_) => "INVALID_CURRENCY",
            LedgerError::Reconciliation(_) => "RECONCILIATION_FAILED",
            LedgerError::Money(_) => "INVALID_AMOUNT",
            LedgerError::Database(_) => "INTERNAL",
            LedgerError::Serialization(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InsufficientFunds("w1".into()).code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(LedgerError::ConcurrentRetry.code(), "CONCURRENT_RETRY");
        assert_eq!(LedgerError::RefundExceedsCaptured.code(), "REFUND_EXCEEDS_CAPTURED");
    }

    #[test]
    fn test_display_mentions_context() {
        let e = LedgerError::CurrencyMismatch {
            expected: "USD".into(),
            provided: "EUR".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("USD") && msg.contains("EUR"));
    }
}
