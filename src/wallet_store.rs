//! Wallet persistence.
//!
//! Wallets are created lazily on first financial activity and archived, never
//! hard-deleted. Row-level locks taken here (`FOR UPDATE`) are the
//! serialization point for every balance-changing operation; when two wallets
//! are involved the lock order is always ascending wallet id, so concurrent
//! transfers touching the same pair in opposite directions cannot deadlock.

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};

use crate::error::LedgerError;
use crate::money::decimal_to_amount;
use crate::types::{Currency, OwnerId, WalletId};
use crate::wallet::{Wallet, WalletBalance, WalletLifecycle, WalletMetadata};

/// Fetch the wallet for (owner, currency), creating it with zero balances on
/// first financial activity.
pub async fn get_or_create(
    pool: &PgPool,
    owner: OwnerId,
    currency: &Currency,
) -> Result<Wallet, LedgerError> {
    let id = WalletId::new();
    let metadata = serde_json::to_string(&WalletMetadata::None)?;

    // Lost races fall through to the SELECT below
    sqlx::query(
        r#"
        INSERT INTO wallets_tb
            (wallet_id, owner_id, currency, available_balance, pending_balance,
             lifecycle, metadata, version, created_at, updated_at)
        VALUES ($1, $2, $3, 0, 0, $4, $5, 0, NOW(), NOW())
        ON CONFLICT (owner_id, currency) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(owner as i64)
    .bind(currency.as_str())
    .bind(WalletLifecycle::Active.id())
    .bind(&metadata)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT * FROM wallets_tb WHERE owner_id = $1 AND currency = $2",
    )
    .bind(owner as i64)
    .bind(currency.as_str())
    .fetch_one(pool)
    .await?;

    row_to_wallet(&row)
}

/// Fetch by id without locking.
pub async fn get(pool: &PgPool, id: &WalletId) -> Result<Option<Wallet>, LedgerError> {
    let row = sqlx::query("SELECT * FROM wallets_tb WHERE wallet_id = $1")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_wallet(&r)).transpose()
}

/// Take the row lock on one wallet. Blocks until any concurrent
/// balance-changing transaction on this wallet resolves.
pub async fn lock(conn: &mut PgConnection, id: &WalletId) -> Result<Wallet, LedgerError> {
    let row = sqlx::query("SELECT * FROM wallets_tb WHERE wallet_id = $1 FOR UPDATE")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", id)))?;

    row_to_wallet(&row)
}

/// Lock two wallets in ascending id order and return them in the caller's
/// argument order.
pub async fn lock_pair(
    conn: &mut PgConnection,
    first: &WalletId,
    second: &WalletId,
) -> Result<(Wallet, Wallet), LedgerError> {
    if first == second {
        return Err(LedgerError::InvalidState(
            "cannot lock the same wallet twice".to_string(),
        ));
    }

    if first < second {
        let a = lock(conn, first).await?;
        let b = lock(conn, second).await?;
        Ok((a, b))
    } else {
        let b = lock(conn, second).await?;
        let a = lock(conn, first).await?;
        Ok((a, b))
    }
}

/// Flip the lifecycle to Archived. The wallet stays readable for
/// reconciliation; mutations are rejected from then on.
pub async fn archive(pool: &PgPool, id: &WalletId) -> Result<(), LedgerError> {
    let result = sqlx::query(
        "UPDATE wallets_tb SET lifecycle = $1, updated_at = NOW() \
         WHERE wallet_id = $2 AND lifecycle = $3",
    )
    .bind(WalletLifecycle::Archived.id())
    .bind(id.to_string())
    .bind(WalletLifecycle::Active.id())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Missing or already archived
        match get(pool, id).await? {
            None => return Err(LedgerError::NotFound(format!("wallet {}", id))),
            Some(w) => {
                return Err(LedgerError::InvalidState(format!(
                    "wallet {} is already {}",
                    id, w.lifecycle
                )));
            }
        }
    }

    tracing::info!(wallet_id = %id, "Wallet archived");
    Ok(())
}

pub(crate) fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Result<Wallet, LedgerError> {
    let id: String = row.try_get("wallet_id")?;
    let id: WalletId = id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed wallet_id".to_string()))?;

    let currency: String = row.try_get("currency")?;

    let lifecycle: i16 = row.try_get("lifecycle")?;
    let lifecycle = WalletLifecycle::from_id(lifecycle).ok_or_else(|| {
        LedgerError::InvalidState(format!("wallet {} has bad lifecycle {}", id, lifecycle))
    })?;

    let metadata: String = row.try_get("metadata")?;
    let metadata: WalletMetadata = serde_json::from_str(&metadata)?;

    let available =
        decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("available_balance")?)?;
    let pending = decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("pending_balance")?)?;
    let version: i64 = row.try_get("version")?;

    Ok(Wallet {
        id,
        owner: row.try_get::<i64, _>("owner_id")? as u64,
        currency: Currency::new(&currency)?,
        balance: WalletBalance::from_parts(available, pending, version as u64),
        lifecycle,
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
