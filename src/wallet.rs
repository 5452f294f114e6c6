//! Wallet store leaf types.
//!
//! `WalletBalance` defines the balance arithmetic. Fields are private; every
//! mutation goes through a validated method and returns `Result`, with
//! checked arithmetic throughout. The authoritative copies live in Postgres
//! and change only through the ledger's guarded updates, which enforce the
//! same rules in SQL; in-process instances are rehydrated row snapshots.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{Currency, OwnerId, WalletId};

/// Balance of a single wallet.
///
/// # Invariants (enforced by private fields)
/// - `available` and `pending` are never negative (unsigned + checked ops)
/// - `version` increments on every mutation
/// - state changes only through the methods below
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WalletBalance {
    available: u64,
    pending: u64,
    version: u64,
}

impl WalletBalance {
    /// Rehydrate from persisted row values.
    pub(crate) fn from_parts(available: u64, pending: u64, version: u64) -> Self {
        Self {
            available,
            pending,
            version,
        }
    }

    /// Available balance (spendable now)
    #[inline(always)]
    pub const fn available(&self) -> u64 {
        self.available
    }

    /// Pending balance (reserved by escrow holds)
    #[inline(always)]
    pub const fn pending(&self) -> u64 {
        self.pending
    }

    /// Total balance (available + pending).
    /// Returns None on overflow (indicates data corruption).
    #[inline(always)]
    pub const fn total(&self) -> Option<u64> {
        self.available.checked_add(self.pending)
    }

    #[inline(always)]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Credit the available balance.
    pub fn credit(&mut self, amount: u64) -> Result<(), LedgerError> {
        self.available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Debit the available balance.
    ///
    /// # Errors
    /// `InsufficientFunds` if available < amount.
    pub fn debit(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.available < amount {
            return Err(LedgerError::InsufficientFunds(String::new()));
        }
        self.available = self
            .available
            .checked_sub(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Reserve funds: move available -> pending.
    pub fn hold(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.available < amount {
            return Err(LedgerError::InsufficientFunds(String::new()));
        }
        self.available = self
            .available
            .checked_sub(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.pending = self
            .pending
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Reverse a hold: move pending -> available.
    pub fn release_hold(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.pending < amount {
            return Err(LedgerError::InsufficientFunds(String::new()));
        }
        self.pending = self
            .pending
            .checked_sub(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.available = self
            .available
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Consume held funds (capture out of pending without touching available).
    pub fn capture_held(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.pending < amount {
            return Err(LedgerError::InsufficientFunds(String::new()));
        }
        self.pending = self
            .pending
            .checked_sub(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }
}

/// Explicit lifecycle state: archived wallets stay queryable for ledger
/// reconciliation but reject every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum WalletLifecycle {
    Active = 1,
    Archived = 2,
}

impl WalletLifecycle {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletLifecycle::Active),
            2 => Some(WalletLifecycle::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletLifecycle::Active => "ACTIVE",
            WalletLifecycle::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for WalletLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider metadata attached to a wallet.
///
/// Known shapes get explicit variants; genuinely provider-specific data
/// falls back to an opaque key-value map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletMetadata {
    #[default]
    None,
    /// External payment-provider account linked to this wallet
    ProviderAccount {
        provider: String,
        account_ref: String,
    },
    /// Provider-specific blob we do not interpret
    Opaque {
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
}

/// One wallet per (owner, currency). Created on first financial activity,
/// archived but never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner: OwnerId,
    pub currency: Currency,
    pub balance: WalletBalance,
    pub lifecycle: WalletLifecycle,
    pub metadata: WalletMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Reject mutations on archived wallets.
    pub fn ensure_active(&self) -> Result<(), LedgerError> {
        if self.lifecycle != WalletLifecycle::Active {
            return Err(LedgerError::InvalidState(format!(
                "wallet {} is {}",
                self.id, self.lifecycle
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_debit() {
        let mut bal = WalletBalance::default();
        bal.credit(100).unwrap();
        assert_eq!(bal.available(), 100);
        assert_eq!(bal.version(), 1);

        bal.debit(60).unwrap();
        assert_eq!(bal.available(), 40);
        assert_eq!(bal.version(), 2);
    }

    #[test]
    fn test_debit_insufficient() {
        let mut bal = WalletBalance::default();
        bal.credit(50).unwrap();

        assert!(bal.debit(100).is_err());
        assert_eq!(bal.available(), 50); // Unchanged
    }

    #[test]
    fn test_credit_overflow() {
        let mut bal = WalletBalance::default();
        bal.credit(u64::MAX).unwrap();
        assert!(bal.credit(1).is_err());
    }

    #[test]
    fn test_hold_release() {
        let mut bal = WalletBalance::default();
        bal.credit(100).unwrap();

        bal.hold(60).unwrap();
        assert_eq!(bal.available(), 40);
        assert_eq!(bal.pending(), 60);

        bal.release_hold(20).unwrap();
        assert_eq!(bal.available(), 60);
        assert_eq!(bal.pending(), 40);
    }

    #[test]
    fn test_hold_insufficient() {
        let mut bal = WalletBalance::default();
        bal.credit(10).unwrap();
        assert!(bal.hold(11).is_err());
        assert_eq!(bal.available(), 10);
        assert_eq!(bal.pending(), 0);
    }

    #[test]
    fn test_capture_held() {
        let mut bal = WalletBalance::default();
        bal.credit(100).unwrap();
        bal.hold(60).unwrap();

        bal.capture_held(30).unwrap();
        assert_eq!(bal.pending(), 30);
        assert_eq!(bal.available(), 40); // Unchanged

        assert!(bal.capture_held(31).is_err());
    }

    #[test]
    fn test_total_conserved_by_hold() {
        let mut bal = WalletBalance::default();
        bal.credit(100).unwrap();
        assert_eq!(bal.total(), Some(100));

        bal.hold(60).unwrap();
        assert_eq!(bal.total(), Some(100)); // Hold moves, never destroys

        bal.capture_held(20).unwrap();
        assert_eq!(bal.total(), Some(80)); // Capture leaves the wallet
    }

    /// The reference scenario: authorize 200 of 500, capture all of it,
    /// refund 50 back.
    #[test]
    fn test_escrow_scenario_balances() {
        let mut payer = WalletBalance::default();
        let mut payee = WalletBalance::default();
        payer.credit(50_000_000_000).unwrap(); // 500.0 at scale 8

        // authorize 200
        payer.hold(20_000_000_000).unwrap();
        assert_eq!(payer.available(), 30_000_000_000);
        assert_eq!(payer.pending(), 20_000_000_000);

        // capture 200
        payer.capture_held(20_000_000_000).unwrap();
        payee.credit(20_000_000_000).unwrap();
        assert_eq!(payer.pending(), 0);
        assert_eq!(payee.available(), 20_000_000_000);

        // refund 50
        payee.debit(5_000_000_000).unwrap();
        payer.credit(5_000_000_000).unwrap();
        assert_eq!(payee.available(), 15_000_000_000);
        assert_eq!(payer.available(), 35_000_000_000);
    }

    #[test]
    fn test_lifecycle_roundtrip() {
        for lc in [WalletLifecycle::Active, WalletLifecycle::Archived] {
            assert_eq!(WalletLifecycle::from_id(lc.id()), Some(lc));
        }
        assert_eq!(WalletLifecycle::from_id(99), None);
    }

    #[test]
    fn test_metadata_tagged_serde() {
        let m = WalletMetadata::ProviderAccount {
            provider: "acme_pay".into(),
            account_ref: "acct_123".into(),
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"kind\":\"provider_account\""));
        let back: WalletMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);

        let none: WalletMetadata = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, WalletMetadata::None);
    }
}
