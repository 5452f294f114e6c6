//! Escrow engine.
//!
//! Coordinates authorize -> hold -> capture / cancel for a payer/payee pair.
//! Every operation is one transaction: idempotency claim, escrow row lock,
//! wallet row locks in ascending id order, validations, ledger postings,
//! status transition, idempotency completion, commit. An error return means
//! no posting persisted.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::events::{EventBus, LedgerEvent};
use crate::idempotency::{self, Claim, IdempotencyScope};
use crate::ledger::{self, BalanceSide, EntityKind, EntityRef, EntryType, LedgerCategory, Posting};
use crate::types::EscrowId;
use crate::wallet_store;

use super::db;
use super::status::EscrowStatus;
use super::types::{AuthorizeRequest, EscrowIntent};

pub struct EscrowEngine {
    pool: PgPool,
    events: EventBus,
}

impl EscrowEngine {
    pub fn new(pool: PgPool, events: EventBus) -> Self {
        Self { pool, events }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reserve `amount` from the payer for `reference`.
    ///
    /// Posts debit(available) + credit(pending) on the payer wallet and
    /// leaves the intent in `Held`. Replays with the same key return the
    /// original intent without re-posting.
    pub async fn authorize(&self, req: AuthorizeRequest) -> Result<EscrowIntent, LedgerError> {
        if req.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        // Same-wallet transfers are invalid by design
        if req.payer_wallet_id == req.payee_wallet_id {
            return Err(LedgerError::InvalidState(
                "payer and payee wallet must differ".to_string(),
            ));
        }
        if req.fee_amount > req.amount {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::AuthorizeEscrow, &req.idempotency_key)
            .await?
        {
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

        let (payer, payee) =
            wallet_store::lock_pair(&mut tx, &req.payer_wallet_id, &req.payee_wallet_id).await?;
        payer.ensure_active()?;
        payee.ensure_active()?;

        for wallet in [&payer, &payee] {
            if wallet.currency != req.currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: wallet.currency.as_str().to_string(),
                    provided: req.currency.as_str().to_string(),
                });
            }
        }

        if payer.balance.available() < req.amount {
            return Err(LedgerError::InsufficientFunds(payer.id.to_string()));
        }

        let mut intent = EscrowIntent {
            id: EscrowId::new(),
            reference: req.reference,
            payer_wallet_id: req.payer_wallet_id,
            payee_wallet_id: req.payee_wallet_id,
            amount: req.amount,
            currency: req.currency.clone(),
            captured_amount: 0,
            refunded_amount: 0,
            fee_amount: req.fee_amount,
            status: EscrowStatus::Authorized,
            is_on_hold: false,
            hold_reason: None,
            idempotency_key: req.idempotency_key.clone(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        db::insert(&mut tx, &intent).await?;

        let entity = EntityRef::new(EntityKind::Escrow, intent.id.to_string());

        // The hold: funds leave available and land in pending on the same
        // wallet, so the wallet total is conserved until capture.
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payer_wallet_id,
                entry_type: EntryType::Debit,
                side: BalanceSide::Available,
                category: LedgerCategory::EscrowHold,
                amount: intent.amount,
                currency: intent.currency.clone(),
                entity: entity.clone(),
            },
        )
        .await?;
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payer_wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Pending,
                category: LedgerCategory::EscrowHold,
                amount: intent.amount,
                currency: intent.currency.clone(),
                entity,
            },
        )
        .await?;

        db::update_status(&mut tx, &intent.id, EscrowStatus::Held).await?;
        intent.status = EscrowStatus::Held;

        idempotency::complete(
            &mut tx,
            IdempotencyScope::AuthorizeEscrow,
            &req.idempotency_key,
            &idempotency::encode_result(&intent)?,
        )
        .await?;

        tx.commit().await?;

        info!(
            escrow_id = %intent.id,
            payer = %intent.payer_wallet_id,
            payee = %intent.payee_wallet_id,
            amount = intent.amount,
            "Escrow authorized and held"
        );
        self.events.publish(LedgerEvent::EscrowAuthorized {
            escrow_id: intent.id,
        });

        Ok(intent)
    }

    /// Move `amount` of held funds to the payee's available balance.
    ///
    /// Partial captures keep the intent in `Held`; consuming the full amount
    /// flips it to `Captured`.
    pub async fn capture(
        &self,
        escrow_id: &EscrowId,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<EscrowIntent, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::CaptureEscrow, idempotency_key).await? {
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

        let mut intent = db::lock(&mut tx, escrow_id).await?;

        if intent.is_on_hold {
            return Err(LedgerError::InvalidState(format!(
                "escrow {} is on administrative hold",
                intent.id
            )));
        }
        if !intent.status.can_capture() {
            return Err(LedgerError::InvalidState(format!(
                "cannot capture escrow {} in status {}",
                intent.id, intent.status
            )));
        }
        // Bound against this escrow's own remainder; the payer's pending
        // balance may also back holds for other escrows.
        if amount > intent.remaining() {
            return Err(LedgerError::InsufficientFunds(intent.id.to_string()));
        }

        let (payer, payee) =
            wallet_store::lock_pair(&mut tx, &intent.payer_wallet_id, &intent.payee_wallet_id)
                .await?;
        payer.ensure_active()?;
        payee.ensure_active()?;

        let entity = EntityRef::new(EntityKind::Escrow, intent.id.to_string());

        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payer_wallet_id,
                entry_type: EntryType::Debit,
                side: BalanceSide::Pending,
                category: LedgerCategory::EscrowCapture,
                amount,
                currency: intent.currency.clone(),
                entity: entity.clone(),
            },
        )
        .await?;
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payee_wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Available,
                category: LedgerCategory::EscrowCapture,
                amount,
                currency: intent.currency.clone(),
                entity,
            },
        )
        .await?;

        intent.captured_amount += amount;
        intent.status = if intent.remaining() == 0 {
            EscrowStatus::Captured
        } else {
            EscrowStatus::Held
        };
        db::record_capture(&mut tx, &intent.id, intent.captured_amount, intent.status).await?;
        intent.updated_at = chrono::Utc::now();

        idempotency::complete(
            &mut tx,
            IdempotencyScope::CaptureEscrow,
            idempotency_key,
            &idempotency::encode_result(&intent)?,
        )
        .await?;

        tx.commit().await?;

        info!(
            escrow_id = %intent.id,
            amount,
            captured_total = intent.captured_amount,
            status = %intent.status,
            "Escrow captured"
        );
        self.events.publish(LedgerEvent::EscrowCaptured {
            escrow_id: intent.id,
            amount,
        });

        Ok(intent)
    }

    /// Reverse the hold and close the intent. Only legal while nothing was
    /// captured.
    pub async fn cancel(
        &self,
        escrow_id: &EscrowId,
        idempotency_key: &str,
    ) -> Result<EscrowIntent, LedgerError> {
        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::CancelEscrow, idempotency_key).await? {
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

        let mut intent = db::lock(&mut tx, escrow_id).await?;

        if intent.is_on_hold {
            return Err(LedgerError::InvalidState(format!(
                "escrow {} is on administrative hold",
                intent.id
            )));
        }
        if !intent.status.can_cancel() || intent.captured_amount > 0 {
            return Err(LedgerError::InvalidState(format!(
                "cannot cancel escrow {} in status {} with captured {}",
                intent.id, intent.status, intent.captured_amount
            )));
        }

        let payer = wallet_store::lock(&mut tx, &intent.payer_wallet_id).await?;
        payer.ensure_active()?;

        let entity = EntityRef::new(EntityKind::Escrow, intent.id.to_string());

        // Reverse of the hold postings: pending back to available
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payer_wallet_id,
                entry_type: EntryType::Debit,
                side: BalanceSide::Pending,
                category: LedgerCategory::EscrowRelease,
                amount: intent.amount,
                currency: intent.currency.clone(),
                entity: entity.clone(),
            },
        )
        .await?;
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: intent.payer_wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Available,
                category: LedgerCategory::EscrowRelease,
                amount: intent.amount,
                currency: intent.currency.clone(),
                entity,
            },
        )
        .await?;

        db::update_status(&mut tx, &intent.id, EscrowStatus::Cancelled).await?;
        intent.status = EscrowStatus::Cancelled;
        intent.updated_at = chrono::Utc::now();

        idempotency::complete(
            &mut tx,
            IdempotencyScope::CancelEscrow,
            idempotency_key,
            &idempotency::encode_result(&intent)?,
        )
        .await?;

        tx.commit().await?;

        info!(escrow_id = %intent.id, "Escrow cancelled, hold reversed");
        self.events.publish(LedgerEvent::EscrowCancelled {
            escrow_id: intent.id,
        });

        Ok(intent)
    }

    /// Administrative freeze. Blocks capture and cancel, moves no funds.
    pub async fn hold(
        &self,
        escrow_id: &EscrowId,
        reason: &str,
    ) -> Result<EscrowIntent, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut intent = db::lock(&mut tx, escrow_id).await?;
        if intent.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "cannot freeze escrow {} in terminal status {}",
                intent.id, intent.status
            )));
        }

        db::set_admin_hold(&mut tx, &intent.id, true, Some(reason)).await?;
        tx.commit().await?;

        warn!(escrow_id = %intent.id, reason, "Escrow placed on administrative hold");

        intent.is_on_hold = true;
        intent.hold_reason = Some(reason.to_string());
        Ok(intent)
    }

    /// Lift an administrative freeze.
    pub async fn release(&self, escrow_id: &EscrowId) -> Result<EscrowIntent, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut intent = db::lock(&mut tx, escrow_id).await?;
        if !intent.is_on_hold {
            return Err(LedgerError::InvalidState(format!(
                "escrow {} is not on administrative hold",
                intent.id
            )));
        }

        db::set_admin_hold(&mut tx, &intent.id, false, None).await?;
        tx.commit().await?;

        info!(escrow_id = %intent.id, "Administrative hold released");

        intent.is_on_hold = false;
        intent.hold_reason = None;
        Ok(intent)
    }

    /// Read-back for collaborators polling lifecycle transitions.
    pub async fn get(&self, escrow_id: &EscrowId) -> Result<Option<EscrowIntent>, LedgerError> {
        db::get(&self.pool, escrow_id).await
    }
}
