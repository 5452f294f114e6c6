//! Payout and payout-account persistence.

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};

use crate::error::LedgerError;
use crate::money::{amount_to_decimal, decimal_to_amount};
use crate::types::{Currency, PayoutAccountId, PayoutId, WalletId};

use super::types::{Payout, PayoutAccount, PayoutStatus};

pub async fn insert(conn: &mut PgConnection, payout: &Payout) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO payouts_tb
            (payout_id, wallet_id, account_id, amount, currency, status,
             provider_ref, failure_code, failure_message, idem_key, created_at, updated_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
        "#,
    )
    .bind(payout.id.to_string())
    .bind(payout.wallet_id.to_string())
    .bind(payout.account_id.to_string())
    .bind(amount_to_decimal(payout.amount))
    .bind(payout.currency.as_str())
    .bind(payout.status.id())
    .bind(&payout.provider_ref)
    .bind(&payout.failure_code)
    .bind(&payout.failure_message)
    .bind(&payout.idempotency_key)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get(pool: &PgPool, id: &PayoutId) -> Result<Option<Payout>, LedgerError> {
    let row = sqlx::query("SELECT * FROM payouts_tb WHERE payout_id = $1")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_payout(&r)).transpose()
}

/// Take the row lock. Serializes confirmation against failure for the same
/// payout.
pub async fn lock(conn: &mut PgConnection, id: &PayoutId) -> Result<Payout, LedgerError> {
    let row = sqlx::query("SELECT * FROM payouts_tb WHERE payout_id = $1 FOR UPDATE")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("payout {}", id)))?;

    row_to_payout(&row)
}

pub async fn mark_completed(
    conn: &mut PgConnection,
    id: &PayoutId,
    provider_ref: &str,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE payouts_tb
        SET status = $1, provider_ref = $2, updated_at = NOW()
        WHERE payout_id = $3
        "#,
    )
    .bind(PayoutStatus::Completed.id())
    .bind(provider_ref)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn mark_failed(
    conn: &mut PgConnection,
    id: &PayoutId,
    failure_code: &str,
    failure_message: Option<&str>,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE payouts_tb
        SET status = $1, failure_code = $2, failure_message = $3, updated_at = NOW()
        WHERE payout_id = $4
        "#,
    )
    .bind(PayoutStatus::Failed.id())
    .bind(failure_code)
    .bind(failure_message)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Payouts awaiting provider submission, oldest first. Used by the
/// dispatcher.
pub async fn find_processing(pool: &PgPool, limit: i64) -> Result<Vec<Payout>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM payouts_tb
        WHERE status = $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(PayoutStatus::Processing.id())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut payouts = Vec::with_capacity(rows.len());
    for row in rows {
        payouts.push(row_to_payout(&row)?);
    }
    Ok(payouts)
}

pub async fn insert_account(
    conn: &mut PgConnection,
    account: &PayoutAccount,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO payout_accounts_tb
            (account_id, wallet_id, provider, external_ref, verified, created_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(account.id.to_string())
    .bind(account.wallet_id.to_string())
    .bind(&account.provider)
    .bind(&account.external_ref)
    .bind(account.verified)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_account(
    conn: &mut PgConnection,
    id: &PayoutAccountId,
) -> Result<Option<PayoutAccount>, LedgerError> {
    let row = sqlx::query("SELECT * FROM payout_accounts_tb WHERE account_id = $1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|r| row_to_account(&r)).transpose()
}

pub async fn set_account_verified(
    conn: &mut PgConnection,
    id: &PayoutAccountId,
    verified: bool,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE payout_accounts_tb SET verified = $1 WHERE account_id = $2")
        .bind(verified)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn row_to_payout(row: &sqlx::postgres::PgRow) -> Result<Payout, LedgerError> {
    let id: String = row.try_get("payout_id")?;
    let id: PayoutId = id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed payout_id".to_string()))?;

    let wallet_id: String = row.try_get("wallet_id")?;
    let wallet_id: WalletId = wallet_id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed wallet_id".to_string()))?;

    let account_id: String = row.try_get("account_id")?;
    let account_id: PayoutAccountId = account_id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed account_id".to_string()))?;

    let status: i16 = row.try_get("status")?;
    let status = PayoutStatus::from_id(status)
        .ok_or_else(|| LedgerError::InvalidState(format!("payout {} has bad status {}", id, status)))?;

    let currency: String = row.try_get("currency")?;

    Ok(Payout {
        id,
        wallet_id,
        account_id,
        amount: decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("amount")?)?,
        currency: Currency::new(&currency)?,
        status,
        provider_ref: row.try_get("provider_ref")?,
        failure_code: row.try_get("failure_code")?,
        failure_message: row.try_get("failure_message")?,
        idempotency_key: row.try_get("idem_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<PayoutAccount, LedgerError> {
    let id: String = row.try_get("account_id")?;
    let id: PayoutAccountId = id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed account_id".to_string()))?;

    let wallet_id: String = row.try_get("wallet_id")?;
    let wallet_id: WalletId = wallet_id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed wallet_id".to_string()))?;

    Ok(PayoutAccount {
        id,
        wallet_id,
        provider: row.try_get("provider")?,
        external_ref: row.try_get("external_ref")?,
        verified: row.try_get("verified")?,
        created_at: row.try_get("created_at")?,
    })
}
