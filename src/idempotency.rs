//! Idempotency guard.
//!
//! Deduplicates externally-retried mutating requests. Keys are caller-supplied
//! and scoped per operation kind (composite primary key), so an authorize key
//! can never collide with a payout key.
//!
//! The claim row is inserted inside the operation's own transaction, so the
//! row insert is also the in-flight lock: a concurrent retry blocks on the
//! conflicting insert until the first attempt commits (then sees its stored
//! result) or aborts (then proceeds as a fresh first attempt). The stored
//! result is written in the same transaction as the operation's effects and
//! is never overwritten.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::postgres::PgConnection;

use crate::error::LedgerError;

/// Operation kind a key is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdempotencyScope {
    Deposit,
    AuthorizeEscrow,
    CaptureEscrow,
    CancelEscrow,
    Payout,
    Refund,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyScope::Deposit => "DEPOSIT",
            IdempotencyScope::AuthorizeEscrow => "AUTHORIZE_ESCROW",
            IdempotencyScope::CaptureEscrow => "CAPTURE_ESCROW",
            IdempotencyScope::CancelEscrow => "CANCEL_ESCROW",
            IdempotencyScope::Payout => "PAYOUT",
            IdempotencyScope::Refund => "REFUND",
        }
    }
}

impl fmt::Display for IdempotencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdempotencyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(IdempotencyScope::Deposit),
            "AUTHORIZE_ESCROW" => Ok(IdempotencyScope::AuthorizeEscrow),
            "CAPTURE_ESCROW" => Ok(IdempotencyScope::CaptureEscrow),
            "CANCEL_ESCROW" => Ok(IdempotencyScope::CancelEscrow),
            "PAYOUT" => Ok(IdempotencyScope::Payout),
            "REFUND" => Ok(IdempotencyScope::Refund),
            _ => Err(format!("unknown idempotency scope: {}", s)),
        }
    }
}

/// Outcome of a claim attempt
#[derive(Debug)]
pub enum Claim {
    /// First attempt: the caller runs the operation and stores its result
    New,
    /// A prior attempt completed; return its stored result without
    /// re-executing
    Completed(String),
    /// A committed claim row has no result. Should not happen with the
    /// same-transaction discipline; surfaced as `ConcurrentRetry`.
    InFlight,
}

/// Claim a (scope, key) pair inside the current transaction.
pub async fn claim(
    conn: &mut PgConnection,
    scope: IdempotencyScope,
    key: &str,
) -> Result<Claim, LedgerError> {
    if key.is_empty() {
        return Err(LedgerError::InvalidState(
            "idempotency key must not be empty".to_string(),
        ));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO idempotency_records_tb (scope, idem_key, claimed_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (scope, idem_key) DO NOTHING
        "#,
    )
    .bind(scope.as_str())
    .bind(key)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() > 0 {
        return Ok(Claim::New);
    }

    let row = sqlx::query(
        "SELECT result FROM idempotency_records_tb WHERE scope = $1 AND idem_key = $2",
    )
    .bind(scope.as_str())
    .bind(key)
    .fetch_one(&mut *conn)
    .await?;

    match row.try_get::<Option<String>, _>("result")? {
        Some(result) => {
            tracing::info!(scope = %scope, key = %key, "Idempotent replay, returning stored result");
            Ok(Claim::Completed(result))
        }
        None => Ok(Claim::InFlight),
    }
}

/// Persist the operation result under the claimed key, in the same
/// transaction as the operation's effects. Never overwrites.
pub async fn complete(
    conn: &mut PgConnection,
    scope: IdempotencyScope,
    key: &str,
    result: &str,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE idempotency_records_tb
        SET result = $3, completed_at = NOW()
        WHERE scope = $1 AND idem_key = $2 AND result IS NULL
        "#,
    )
    .bind(scope.as_str())
    .bind(key)
    .bind(result)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Typed helper: serialize an operation result for storage.
pub fn encode_result<T: Serialize>(value: &T) -> Result<String, LedgerError> {
    Ok(serde_json::to_string(value)?)
}

/// Typed helper: decode a stored result on replay.
pub fn decode_result<T: DeserializeOwned>(stored: &str) -> Result<T, LedgerError> {
    Ok(serde_json::from_str(stored)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_roundtrip() {
        let all = [
            IdempotencyScope::Deposit,
            IdempotencyScope::AuthorizeEscrow,
            IdempotencyScope::CaptureEscrow,
            IdempotencyScope::CancelEscrow,
            IdempotencyScope::Payout,
            IdempotencyScope::Refund,
        ];
        for scope in all {
            let parsed: IdempotencyScope = scope.as_str().parse().unwrap();
            assert_eq!(parsed, scope);
        }
        assert!("BOGUS".parse::<IdempotencyScope>().is_err());
    }

    #[test]
    fn test_scopes_are_distinct() {
        // Same key under different scopes must map to different records
        assert_ne!(
            IdempotencyScope::AuthorizeEscrow.as_str(),
            IdempotencyScope::CaptureEscrow.as_str()
        );
        assert_ne!(
            IdempotencyScope::Payout.as_str(),
            IdempotencyScope::Refund.as_str()
        );
    }

    #[test]
    fn test_encode_decode_result() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Out {
            id: String,
            amount: u64,
        }
        let out = Out {
            id: "x".into(),
            amount: 42,
        };
        let stored = encode_result(&out).unwrap();
        let back: Out = decode_result(&stored).unwrap();
        assert_eq!(out, back);
    }
}
