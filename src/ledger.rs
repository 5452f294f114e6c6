//! Append-only double-entry journal.
//!
//! Every balance change is one immutable `LedgerEntry`; the cached wallet
//! balance is recomputed in the same statement that appends the entry. The
//! ledger never commits on its own: `post` runs inside the transaction of the
//! operation that triggered it, after the caller has taken the wallet row
//! lock. Entries for a wallet are therefore strictly ordered by commit order,
//! and `balance_after` chains exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};
use std::fmt;

use crate::error::LedgerError;
use crate::money::{amount_to_decimal, decimal_to_amount};
use crate::types::{Currency, WalletId};

/// Debit removes value from a balance component, credit adds to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum EntryType {
    Debit = 1,
    Credit = 2,
}

impl EntryType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EntryType::Debit),
            2 => Some(EntryType::Credit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "DEBIT",
            EntryType::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which balance component an entry touches. An escrow hold is modeled as
/// debit(available) + credit(pending) on the same wallet, so the wallet total
/// is conserved until capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum BalanceSide {
    Available = 1,
    Pending = 2,
}

impl BalanceSide {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BalanceSide::Available),
            2 => Some(BalanceSide::Pending),
            _ => None,
        }
    }

    /// Column the entry mutates. Used to build the guarded UPDATE.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            BalanceSide::Available => "available_balance",
            BalanceSide::Pending => "pending_balance",
        }
    }
}

/// Business category of a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum LedgerCategory {
    EscrowHold = 1,
    EscrowRelease = 2,
    EscrowCapture = 3,
    Refund = 4,
    Payout = 5,
    PayoutReversal = 6,
    Deposit = 7,
}

impl LedgerCategory {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(LedgerCategory::EscrowHold),
            2 => Some(LedgerCategory::EscrowRelease),
            3 => Some(LedgerCategory::EscrowCapture),
            4 => Some(LedgerCategory::Refund),
            5 => Some(LedgerCategory::Payout),
            6 => Some(LedgerCategory::PayoutReversal),
            7 => Some(LedgerCategory::Deposit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerCategory::EscrowHold => "ESCROW_HOLD",
            LedgerCategory::EscrowRelease => "ESCROW_RELEASE",
            LedgerCategory::EscrowCapture => "ESCROW_CAPTURE",
            LedgerCategory::Refund => "REFUND",
            LedgerCategory::Payout => "PAYOUT",
            LedgerCategory::PayoutReversal => "PAYOUT_REVERSAL",
            LedgerCategory::Deposit => "DEPOSIT",
        }
    }
}

impl fmt::Display for LedgerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of the entity that caused a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum EntityKind {
    Escrow = 1,
    Payout = 2,
    Refund = 3,
    /// External reference (payment provider charge backing a deposit)
    External = 4,
}

impl EntityKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(EntityKind::Escrow),
            2 => Some(EntityKind::Payout),
            3 => Some(EntityKind::Refund),
            4 => Some(EntityKind::External),
            _ => None,
        }
    }
}

/// Foreign key to the escrow/payout/refund that caused an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Immutable journal record. Never updated or deleted after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub wallet_id: WalletId,
    pub entity: EntityRef,
    pub entry_type: EntryType,
    pub side: BalanceSide,
    pub category: LedgerCategory,
    /// Always strictly positive
    pub amount: u64,
    pub currency: Currency,
    /// Resulting value of the touched balance component, captured atomically
    /// with the posting
    pub balance_after: u64,
    pub posted_at: DateTime<Utc>,
}

/// One posting request against a single wallet
#[derive(Debug, Clone)]
pub struct Posting {
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    pub side: BalanceSide,
    pub category: LedgerCategory,
    pub amount: u64,
    pub currency: Currency,
    pub entity: EntityRef,
}

/// Append one entry and update the wallet's cached balance atomically.
///
/// # Preconditions
/// - the caller holds the wallet row lock (`FOR UPDATE`) in this transaction
/// - `amount` is strictly positive
///
/// # Errors
/// - `InsufficientFunds` if a debit would drive the component below zero
/// - `CurrencyMismatch` / `NotFound` when the wallet row does not match
///
/// No partial postings: the balance update and the entry insert live in the
/// caller's transaction and commit or abort together.
pub async fn post(conn: &mut PgConnection, posting: &Posting) -> Result<LedgerEntry, LedgerError> {
    if posting.amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let amount = amount_to_decimal(posting.amount);
    let column = posting.side.column();

    // Guarded in SQL as well: the WHERE clause refuses a negative result even
    // if a caller skipped its own validation.
    let sql = match posting.entry_type {
        EntryType::Debit => format!(
            "UPDATE wallets_tb \
             SET {col} = {col} - $1, version = version + 1, updated_at = NOW() \
             WHERE wallet_id = $2 AND currency = $3 AND {col} >= $1 \
             RETURNING available_balance, pending_balance",
            col = column
        ),
        EntryType::Credit => format!(
            "UPDATE wallets_tb \
             SET {col} = {col} + $1, version = version + 1, updated_at = NOW() \
             WHERE wallet_id = $2 AND currency = $3 \
             RETURNING available_balance, pending_balance",
            col = column
        ),
    };

    let row = sqlx::query(&sql)
        .bind(amount)
        .bind(posting.wallet_id.to_string())
        .bind(posting.currency.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    let row = match row {
        Some(row) => row,
        None => return Err(classify_update_miss(conn, posting).await?),
    };

    let balance_after = match posting.side {
        BalanceSide::Available => {
            decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("available_balance")?)?
        }
        BalanceSide::Pending => {
            decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("pending_balance")?)?
        }
    };

    let entry_row = sqlx::query(
        r#"
        INSERT INTO ledger_entries_tb
            (wallet_id, entity_kind, entity_id, entry_type, balance_side,
             category, amount, currency, balance_after, posted_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        RETURNING entry_id, posted_at
        "#,
    )
    .bind(posting.wallet_id.to_string())
    .bind(posting.entity.kind.id())
    .bind(&posting.entity.id)
    .bind(posting.entry_type.id())
    .bind(posting.side.id())
    .bind(posting.category.id())
    .bind(amount)
    .bind(posting.currency.as_str())
    .bind(amount_to_decimal(balance_after))
    .fetch_one(&mut *conn)
    .await?;

    let entry = LedgerEntry {
        entry_id: entry_row.try_get("entry_id")?,
        wallet_id: posting.wallet_id,
        entity: posting.entity.clone(),
        entry_type: posting.entry_type,
        side: posting.side,
        category: posting.category,
        amount: posting.amount,
        currency: posting.currency.clone(),
        balance_after,
        posted_at: entry_row.try_get("posted_at")?,
    };

    tracing::debug!(
        wallet_id = %entry.wallet_id,
        entry_type = %entry.entry_type,
        category = %entry.category,
        amount = entry.amount,
        balance_after = entry.balance_after,
        "Ledger entry posted"
    );

    Ok(entry)
}

/// The guarded UPDATE touched no row. Figure out which precondition failed.
async fn classify_update_miss(
    conn: &mut PgConnection,
    posting: &Posting,
) -> Result<LedgerError, LedgerError> {
    let row = sqlx::query("SELECT currency FROM wallets_tb WHERE wallet_id = $1")
        .bind(posting.wallet_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        None => Ok(LedgerError::NotFound(format!(
            "wallet {}",
            posting.wallet_id
        ))),
        Some(row) => {
            let currency: String = row.try_get("currency")?;
            if currency != posting.currency.as_str() {
                Ok(LedgerError::CurrencyMismatch {
                    expected: currency,
                    provided: posting.currency.as_str().to_string(),
                })
            } else {
                Ok(LedgerError::InsufficientFunds(posting.wallet_id.to_string()))
            }
        }
    }
}

/// All entries for a wallet in commit order.
pub async fn entries_for_wallet(
    pool: &PgPool,
    wallet_id: &WalletId,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT entry_id, wallet_id, entity_kind, entity_id, entry_type,
               balance_side, category, amount, currency, balance_after, posted_at
        FROM ledger_entries_tb
        WHERE wallet_id = $1
        ORDER BY entry_id ASC
        "#,
    )
    .bind(wallet_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(row_to_entry(&row)?);
    }
    Ok(entries)
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, LedgerError> {
    let wallet_id: String = row.try_get("wallet_id")?;
    let wallet_id: WalletId = wallet_id
        .parse()
        .map_err(|_| LedgerError::Reconciliation("invalid wallet_id in ledger row".into()))?;

    let entity_kind: i16 = row.try_get("entity_kind")?;
    let entity_kind = EntityKind::from_id(entity_kind)
        .ok_or_else(|| LedgerError::Reconciliation(format!("bad entity_kind {}", entity_kind)))?;

    let entry_type: i16 = row.try_get("entry_type")?;
    let entry_type = EntryType::from_id(entry_type)
        .ok_or_else(|| LedgerError::Reconciliation(format!("bad entry_type {}", entry_type)))?;

    let side: i16 = row.try_get("balance_side")?;
    let side = BalanceSide::from_id(side)
        .ok_or_else(|| LedgerError::Reconciliation(format!("bad balance_side {}", side)))?;

    let category: i16 = row.try_get("category")?;
    let category = LedgerCategory::from_id(category)
        .ok_or_else(|| LedgerError::Reconciliation(format!("bad category {}", category)))?;

    let currency: String = row.try_get("currency")?;

    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id")?,
        wallet_id,
        entity: EntityRef::new(entity_kind, row.try_get::<String, _>("entity_id")?),
        entry_type,
        side,
        category,
        amount: decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("amount")?)?,
        currency: Currency::new(&currency)?,
        balance_after: decimal_to_amount(
            row.try_get::<rust_decimal::Decimal, _>("balance_after")?,
        )?,
        posted_at: row.try_get("posted_at")?,
    })
}

/// Replay a wallet's journal and verify it reproduces the cached balances.
///
/// Checks, per balance component:
/// - no intermediate negative value
/// - each entry's `balance_after` equals the running value at that point
/// - the final running values equal the wallet row's cached balances
///
/// which together give the conservation property: available + pending equals
/// the sum of all credits minus all debits ever posted.
pub async fn reconcile(pool: &PgPool, wallet_id: &WalletId) -> Result<(), LedgerError> {
    let wallet_row = sqlx::query(
        "SELECT available_balance, pending_balance FROM wallets_tb WHERE wallet_id = $1",
    )
    .bind(wallet_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet_id)))?;

    let cached_available =
        decimal_to_amount(wallet_row.try_get::<rust_decimal::Decimal, _>("available_balance")?)?;
    let cached_pending =
        decimal_to_amount(wallet_row.try_get::<rust_decimal::Decimal, _>("pending_balance")?)?;

    let entries = entries_for_wallet(pool, wallet_id).await?;

    let mut available: u64 = 0;
    let mut pending: u64 = 0;

    for entry in &entries {
        let component = match entry.side {
            BalanceSide::Available => &mut available,
            BalanceSide::Pending => &mut pending,
        };
        *component = match entry.entry_type {
            EntryType::Credit => component.checked_add(entry.amount),
            EntryType::Debit => component.checked_sub(entry.amount),
        }
        .ok_or_else(|| {
            LedgerError::Reconciliation(format!(
                "entry {} drives {:?} negative or overflows",
                entry.entry_id, entry.side
            ))
        })?;

        if *component != entry.balance_after {
            return Err(LedgerError::Reconciliation(format!(
                "entry {}: balance_after {} != replayed {}",
                entry.entry_id, entry.balance_after, component
            )));
        }
    }

    if available != cached_available || pending != cached_pending {
        return Err(LedgerError::Reconciliation(format!(
            "wallet {}: replayed ({}, {}) != cached ({}, {})",
            wallet_id, available, pending, cached_available, cached_pending
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_roundtrip() {
        for t in [EntryType::Debit, EntryType::Credit] {
            assert_eq!(EntryType::from_id(t.id()), Some(t));
        }
        assert_eq!(EntryType::from_id(0), None);
    }

    #[test]
    fn test_balance_side_columns() {
        assert_eq!(BalanceSide::Available.column(), "available_balance");
        assert_eq!(BalanceSide::Pending.column(), "pending_balance");
        for s in [BalanceSide::Available, BalanceSide::Pending] {
            assert_eq!(BalanceSide::from_id(s.id()), Some(s));
        }
    }

    #[test]
    fn test_category_roundtrip() {
        let all = [
            LedgerCategory::EscrowHold,
            LedgerCategory::EscrowRelease,
            LedgerCategory::EscrowCapture,
            LedgerCategory::Refund,
            LedgerCategory::Payout,
            LedgerCategory::PayoutReversal,
            LedgerCategory::Deposit,
        ];
        for c in all {
            assert_eq!(LedgerCategory::from_id(c.id()), Some(c));
        }
        assert_eq!(LedgerCategory::from_id(99), None);
    }

    #[test]
    fn test_entity_kind_roundtrip() {
        for k in [
            EntityKind::Escrow,
            EntityKind::Payout,
            EntityKind::Refund,
            EntityKind::External,
        ] {
            assert_eq!(EntityKind::from_id(k.id()), Some(k));
        }
    }
}
