//! Escrow intent persistence.
//!
//! Status transitions happen on the locked row inside the engine's
//! transaction; the helpers here never commit on their own.

use std::time::Duration;

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};

use crate::error::LedgerError;
use crate::money::{amount_to_decimal, decimal_to_amount};
use crate::types::{Currency, EscrowId, Reference, WalletId};

use super::status::EscrowStatus;
use super::types::EscrowIntent;

/// Insert a freshly authorized intent.
pub async fn insert(conn: &mut PgConnection, intent: &EscrowIntent) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO escrow_intents_tb
            (escrow_id, reference_kind, reference_id, payer_wallet_id, payee_wallet_id,
             amount, currency, captured_amount, refunded_amount, fee_amount,
             status, is_on_hold, hold_reason, idem_key, created_at, updated_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
        "#,
    )
    .bind(intent.id.to_string())
    .bind(&intent.reference.kind)
    .bind(&intent.reference.id)
    .bind(intent.payer_wallet_id.to_string())
    .bind(intent.payee_wallet_id.to_string())
    .bind(amount_to_decimal(intent.amount))
    .bind(intent.currency.as_str())
    .bind(amount_to_decimal(intent.captured_amount))
    .bind(amount_to_decimal(intent.refunded_amount))
    .bind(amount_to_decimal(intent.fee_amount))
    .bind(intent.status.id())
    .bind(intent.is_on_hold)
    .bind(&intent.hold_reason)
    .bind(&intent.idempotency_key)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Fetch without locking.
pub async fn get(pool: &PgPool, id: &EscrowId) -> Result<Option<EscrowIntent>, LedgerError> {
    let row = sqlx::query("SELECT * FROM escrow_intents_tb WHERE escrow_id = $1")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_intent(&r)).transpose()
}

/// Take the row lock. Serializes concurrent captures/cancels/refunds against
/// the same intent.
pub async fn lock(conn: &mut PgConnection, id: &EscrowId) -> Result<EscrowIntent, LedgerError> {
    let row = sqlx::query("SELECT * FROM escrow_intents_tb WHERE escrow_id = $1 FOR UPDATE")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("escrow {}", id)))?;

    row_to_intent(&row)
}

/// Status-only transition on the locked row.
pub async fn update_status(
    conn: &mut PgConnection,
    id: &EscrowId,
    status: EscrowStatus,
) -> Result<(), LedgerError> {
    sqlx::query(
        "UPDATE escrow_intents_tb SET status = $1, updated_at = NOW() WHERE escrow_id = $2",
    )
    .bind(status.id())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist a capture: new cumulative captured amount plus the status it
/// implies.
pub async fn record_capture(
    conn: &mut PgConnection,
    id: &EscrowId,
    captured_amount: u64,
    status: EscrowStatus,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE escrow_intents_tb
        SET captured_amount = $1, status = $2, updated_at = NOW()
        WHERE escrow_id = $3
        "#,
    )
    .bind(amount_to_decimal(captured_amount))
    .bind(status.id())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persist a refund: new cumulative refunded amount plus the status it
/// implies.
pub async fn record_refund(
    conn: &mut PgConnection,
    id: &EscrowId,
    refunded_amount: u64,
    status: EscrowStatus,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE escrow_intents_tb
        SET refunded_amount = $1, status = $2, updated_at = NOW()
        WHERE escrow_id = $3
        "#,
    )
    .bind(amount_to_decimal(refunded_amount))
    .bind(status.id())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flip the administrative freeze flag on the locked row.
pub async fn set_admin_hold(
    conn: &mut PgConnection,
    id: &EscrowId,
    on_hold: bool,
    reason: Option<&str>,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE escrow_intents_tb
        SET is_on_hold = $1, hold_reason = $2, updated_at = NOW()
        WHERE escrow_id = $3
        "#,
    )
    .bind(on_hold)
    .bind(reason)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Intents stuck in `Authorized` past the threshold. Used by the expiry
/// sweeper.
pub async fn find_stale_authorized(
    pool: &PgPool,
    threshold: Duration,
    limit: i64,
) -> Result<Vec<EscrowIntent>, LedgerError> {
    let threshold_secs = threshold.as_secs() as i64;

    let rows = sqlx::query(
        r#"
        SELECT * FROM escrow_intents_tb
        WHERE status = $1
          AND updated_at < NOW() - INTERVAL '1 second' * $2
        ORDER BY updated_at ASC
        LIMIT $3
        "#,
    )
    .bind(EscrowStatus::Authorized.id())
    .bind(threshold_secs)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut intents = Vec::with_capacity(rows.len());
    for row in rows {
        intents.push(row_to_intent(&row)?);
    }
    Ok(intents)
}

fn row_to_intent(row: &sqlx::postgres::PgRow) -> Result<EscrowIntent, LedgerError> {
    let id: String = row.try_get("escrow_id")?;
    let id: EscrowId = id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed escrow_id".to_string()))?;

    let payer: String = row.try_get("payer_wallet_id")?;
    let payer: WalletId = payer
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed payer_wallet_id".to_string()))?;

    let payee: String = row.try_get("payee_wallet_id")?;
    let payee: WalletId = payee
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed payee_wallet_id".to_string()))?;

    let status: i16 = row.try_get("status")?;
    let status = EscrowStatus::from_id(status)
        .ok_or_else(|| LedgerError::InvalidState(format!("escrow {} has bad status {}", id, status)))?;

    let currency: String = row.try_get("currency")?;

    Ok(EscrowIntent {
        id,
        reference: Reference::new(
            row.try_get::<String, _>("reference_kind")?,
            row.try_get::<String, _>("reference_id")?,
        ),
        payer_wallet_id: payer,
        payee_wallet_id: payee,
        amount: decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("amount")?)?,
        currency: Currency::new(&currency)?,
        captured_amount: decimal_to_amount(
            row.try_get::<rust_decimal::Decimal, _>("captured_amount")?,
        )?,
        refunded_amount: decimal_to_amount(
            row.try_get::<rust_decimal::Decimal, _>("refunded_amount")?,
        )?,
        fee_amount: decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("fee_amount")?)?,
        status,
        is_on_hold: row.try_get("is_on_hold")?,
        hold_reason: row.try_get("hold_reason")?,
        idempotency_key: row.try_get("idem_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
