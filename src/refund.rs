//! Refunds of captured escrow funds.
//!
//! A refund moves available funds from the payee back to the payer and is
//! bounded by what the escrow actually captured, net of prior refunds. The
//! posting, the refund record and the escrow counters commit atomically, so
//! a persisted refund row is always a settled fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::error::LedgerError;
use crate::escrow::{self, EscrowStatus};
use crate::events::{EventBus, LedgerEvent};
use crate::idempotency::{self, Claim, IdempotencyScope};
use crate::ledger::{self, BalanceSide, EntityKind, EntityRef, EntryType, LedgerCategory, Posting};
use crate::money::{amount_to_decimal, decimal_to_amount};
use crate::types::{Currency, EscrowId, RefundId, WalletId};
use crate::wallet_store;

/// Refund lifecycle. Refunds settle internally in the same transaction that
/// creates them, so `Processed` is reached on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum RefundStatus {
    Processed = 20,
}

impl RefundStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            20 => Some(RefundStatus::Processed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settled reversal of captured escrow funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub escrow_id: EscrowId,
    /// Wallet debited (the original payee)
    pub payee_wallet_id: WalletId,
    /// Wallet credited (the original payer)
    pub payer_wallet_id: WalletId,
    /// Scaled units
    pub amount: u64,
    pub currency: Currency,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for `RefundProcessor::refund`
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub escrow_id: EscrowId,
    pub amount: u64,
    pub reason: Option<String>,
    pub idempotency_key: String,
}

pub struct RefundProcessor {
    pool: PgPool,
    events: EventBus,
}

impl RefundProcessor {
    pub fn new(pool: PgPool, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Refund part or all of a captured escrow.
    ///
    /// Fully-refunded escrows flip to `Refunded`; partial refunds leave the
    /// escrow in `Captured`.
    pub async fn refund(&self, req: RefundRequest) -> Result<Refund, LedgerError> {
        if req.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::Refund, &req.idempotency_key).await? {
            Claim::Completed(stored) => {
                tx.rollback().await?;
                return idempotency::decode_result(&stored);
            }
            Claim::InFlight => {
                tx.rollback().await?;
                return Err(LedgerError::ConcurrentRetry);
            }
            Claim::New => {}
        }

        let mut intent = escrow::db::lock(&mut tx, &req.escrow_id).await?;

        // A Held intent is refundable once it carries partial captures
        if !intent.status.can_refund() || intent.captured_amount == 0 {
            return Err(LedgerError::InvalidState(format!(
                "cannot refund escrow {} in status {} with captured {}",
                intent.id, intent.status, intent.captured_amount
            )));
        }
        if req.amount > intent.refundable() {
            return Err(LedgerError::RefundExceedsCaptured);
        }

        // Refund flows payee -> payer, locks still taken in id order
        let (payer, payee) =
            wallet_store::lock_pair(&mut tx, &intent.payer_wallet_id, &intent.payee_wallet_id)
                .await?;
        payer.ensure_active()?;
        payee.ensure_active()?;

        if payee.balance.available() < req.amount {
            return Err(LedgerError::InsufficientFunds(payee.id.to_string()));
        }

        let refund = Refund {
            id: RefundId::new(),
            escrow_id: intent.id,
            payee_wallet_id: intent.payee_wallet_id,
            payer_wallet_id: intent.payer_wallet_id,
            amount: req.amount,
            currency: intent.currency.clone(),
            status: RefundStatus::Processed,
            reason: req.reason.clone(),
            idempotency_key: req.idempotency_key.clone(),
            created_at: chrono::Utc::now(),
        };

        let entity = EntityRef::new(EntityKind::Refund, refund.id.to_string());

        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: refund.payee_wallet_id,
                entry_type: EntryType::Debit,
                side: BalanceSide::Available,
                category: LedgerCategory::Refund,
                amount: refund.amount,
                currency: refund.currency.clone(),
                entity: entity.clone(),
            },
        )
        .await?;
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: refund.payer_wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Available,
                category: LedgerCategory::Refund,
                amount: refund.amount,
                currency: refund.currency.clone(),
                entity,
            },
        )
        .await?;

        insert(&mut tx, &refund).await?;

        intent.refunded_amount += refund.amount;
        // A Held intent stays Held: the uncaptured remainder is still live
        let status = if intent.status == EscrowStatus::Captured && intent.refundable() == 0 {
            EscrowStatus::Refunded
        } else {
            intent.status
        };
        escrow::db::record_refund(&mut tx, &intent.id, intent.refunded_amount, status).await?;

        idempotency::complete(
            &mut tx,
            IdempotencyScope::Refund,
            &req.idempotency_key,
            &idempotency::encode_result(&refund)?,
        )
        .await?;

        tx.commit().await?;

        info!(
            refund_id = %refund.id,
            escrow_id = %refund.escrow_id,
            amount = refund.amount,
            escrow_status = %status,
            "Refund processed"
        );
        self.events.publish(LedgerEvent::RefundProcessed {
            refund_id: refund.id,
            escrow_id: refund.escrow_id,
            amount: refund.amount,
        });
        if status == EscrowStatus::Refunded {
            self.events.publish(LedgerEvent::EscrowRefunded {
                escrow_id: refund.escrow_id,
            });
        }

        Ok(refund)
    }

    pub async fn get(&self, refund_id: &RefundId) -> Result<Option<Refund>, LedgerError> {
        let row = sqlx::query("SELECT * FROM refunds_tb WHERE refund_id = $1")
            .bind(refund_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_refund(&r)).transpose()
    }

    /// All refunds recorded against an escrow, oldest first.
    pub async fn list_for_escrow(&self, escrow_id: &EscrowId) -> Result<Vec<Refund>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM refunds_tb WHERE escrow_id = $1 ORDER BY created_at ASC",
        )
        .bind(escrow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut refunds = Vec::with_capacity(rows.len());
        for row in rows {
            refunds.push(row_to_refund(&row)?);
        }
        Ok(refunds)
    }
}

async fn insert(conn: &mut PgConnection, refund: &Refund) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO refunds_tb
            (refund_id, escrow_id, payee_wallet_id, payer_wallet_id,
             amount, currency, status, reason, idem_key, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        "#,
    )
    .bind(refund.id.to_string())
    .bind(refund.escrow_id.to_string())
    .bind(refund.payee_wallet_id.to_string())
    .bind(refund.payer_wallet_id.to_string())
    .bind(amount_to_decimal(refund.amount))
    .bind(refund.currency.as_str())
    .bind(refund.status.id())
    .bind(&refund.reason)
    .bind(&refund.idempotency_key)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn row_to_refund(row: &sqlx::postgres::PgRow) -> Result<Refund, LedgerError> {
    let id: String = row.try_get("refund_id")?;
    let id: RefundId = id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed refund_id".to_string()))?;

    let escrow_id: String = row.try_get("escrow_id")?;
    let escrow_id: EscrowId = escrow_id
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed escrow_id".to_string()))?;

    let payee: String = row.try_get("payee_wallet_id")?;
    let payee: WalletId = payee
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed payee_wallet_id".to_string()))?;

    let payer: String = row.try_get("payer_wallet_id")?;
    let payer: WalletId = payer
        .parse()
        .map_err(|_| LedgerError::NotFound("malformed payer_wallet_id".to_string()))?;

    let currency: String = row.try_get("currency")?;

    let status: i16 = row.try_get("status")?;
    let status = RefundStatus::from_id(status)
        .ok_or_else(|| LedgerError::InvalidState(format!("refund {} has bad status {}", id, status)))?;

    Ok(Refund {
        id,
        escrow_id,
        payee_wallet_id: payee,
        payer_wallet_id: payer,
        amount: decimal_to_amount(row.try_get::<rust_decimal::Decimal, _>("amount")?)?,
        currency: Currency::new(&currency)?,
        status,
        reason: row.try_get("reason")?,
        idempotency_key: row.try_get("idem_key")?,
        created_at: row.try_get("created_at")?,
    })
}
