//! Payout processor.
//!
//! `initiate` debits the wallet up front so the funds cannot be double-spent
//! while the provider works; `mark_failed` posts the compensating credit.
//! Provider I/O never happens inside these transactions, the dispatcher does
//! it between them.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::events::{EventBus, LedgerEvent};
use crate::idempotency::{self, Claim, IdempotencyScope};
use crate::ledger::{self, BalanceSide, EntityKind, EntityRef, EntryType, LedgerCategory, Posting};
use crate::types::PayoutId;
use crate::wallet_store;

use super::db;
use super::types::{Payout, PayoutRequest, PayoutStatus};

pub struct PayoutProcessor {
    pool: PgPool,
    events: EventBus,
}

impl PayoutProcessor {
    pub fn new(pool: PgPool, events: EventBus) -> Self {
        Self { pool, events }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Debit the wallet and record a `Processing` payout.
    ///
    /// Refused when the settlement account is missing, belongs to another
    /// wallet, or has not passed provider verification.
    pub async fn initiate(&self, req: PayoutRequest) -> Result<Payout, LedgerError> {
        if req.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::Payout, &req.idempotency_key).await? {
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

        let wallet = wallet_store::lock(&mut tx, &req.wallet_id).await?;
        wallet.ensure_active()?;

        if wallet.currency != req.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: wallet.currency.as_str().to_string(),
                provided: req.currency.as_str().to_string(),
            });
        }

        let account = db::get_account(&mut tx, &req.account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payout account {}", req.account_id)))?;
        if account.wallet_id != req.wallet_id {
            return Err(LedgerError::InvalidState(format!(
                "payout account {} does not belong to wallet {}",
                account.id, req.wallet_id
            )));
        }
        if !account.verified {
            return Err(LedgerError::AccountNotVerified);
        }

        if wallet.balance.available() < req.amount {
            return Err(LedgerError::InsufficientFunds(wallet.id.to_string()));
        }

        let payout = Payout {
            id: PayoutId::new(),
            wallet_id: req.wallet_id,
            account_id: req.account_id,
            amount: req.amount,
            currency: req.currency.clone(),
            status: PayoutStatus::Processing,
            provider_ref: None,
            failure_code: None,
            failure_message: None,
            idempotency_key: req.idempotency_key.clone(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        db::insert(&mut tx, &payout).await?;

        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: payout.wallet_id,
                entry_type: EntryType::Debit,
                side: BalanceSide::Available,
                category: LedgerCategory::Payout,
                amount: payout.amount,
                currency: payout.currency.clone(),
                entity: EntityRef::new(EntityKind::Payout, payout.id.to_string()),
            },
        )
        .await?;

        idempotency::complete(
            &mut tx,
            IdempotencyScope::Payout,
            &req.idempotency_key,
            &idempotency::encode_result(&payout)?,
        )
        .await?;

        tx.commit().await?;

        info!(
            payout_id = %payout.id,
            wallet = %payout.wallet_id,
            amount = payout.amount,
            "Payout initiated, wallet debited"
        );
        self.events.publish(LedgerEvent::PayoutInitiated {
            payout_id: payout.id,
        });

        Ok(payout)
    }

    /// Record provider confirmation. The debit from `initiate` stands.
    pub async fn mark_completed(
        &self,
        payout_id: &PayoutId,
        provider_ref: &str,
    ) -> Result<Payout, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut payout = db::lock(&mut tx, payout_id).await?;
        if payout.status != PayoutStatus::Processing {
            return Err(LedgerError::InvalidState(format!(
                "cannot complete payout {} in status {}",
                payout.id, payout.status
            )));
        }

        db::mark_completed(&mut tx, &payout.id, provider_ref).await?;
        tx.commit().await?;

        payout.status = PayoutStatus::Completed;
        payout.provider_ref = Some(provider_ref.to_string());
        payout.updated_at = chrono::Utc::now();

        info!(payout_id = %payout.id, provider_ref, "Payout completed");
        self.events.publish(LedgerEvent::PayoutCompleted {
            payout_id: payout.id,
        });

        Ok(payout)
    }

    /// Record provider rejection and restore the debited funds.
    pub async fn mark_failed(
        &self,
        payout_id: &PayoutId,
        failure_code: &str,
        failure_message: Option<&str>,
    ) -> Result<Payout, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let mut payout = db::lock(&mut tx, payout_id).await?;
        if payout.status != PayoutStatus::Processing {
            return Err(LedgerError::InvalidState(format!(
                "cannot fail payout {} in status {}",
                payout.id, payout.status
            )));
        }

        // Compensating credit. The wallet may be archived by now; reversal
        // still applies, archival only blocks new operations.
        let _wallet = wallet_store::lock(&mut tx, &payout.wallet_id).await?;
        ledger::post(
            &mut tx,
            &Posting {
                wallet_id: payout.wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Available,
                category: LedgerCategory::PayoutReversal,
                amount: payout.amount,
                currency: payout.currency.clone(),
                entity: EntityRef::new(EntityKind::Payout, payout.id.to_string()),
            },
        )
        .await?;

        db::mark_failed(&mut tx, &payout.id, failure_code, failure_message).await?;
        tx.commit().await?;

        payout.status = PayoutStatus::Failed;
        payout.failure_code = Some(failure_code.to_string());
        payout.failure_message = failure_message.map(str::to_string);
        payout.updated_at = chrono::Utc::now();

        warn!(payout_id = %payout.id, failure_code, "Payout failed, funds restored");
        self.events.publish(LedgerEvent::PayoutFailed {
            payout_id: payout.id,
            code: failure_code.to_string(),
        });

        Ok(payout)
    }

    pub async fn get(&self, payout_id: &PayoutId) -> Result<Option<Payout>, LedgerError> {
        db::get(&self.pool, payout_id).await
    }
}
