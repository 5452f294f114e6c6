//! Inbound funding.
//!
//! Collaborator payment services call `record_deposit` when an external
//! charge settles, crediting the wallet's available balance. This is the
//! only way value enters the ledger; everything downstream (holds, captures,
//! refunds, payouts) just moves it.

use sqlx::PgPool;
use tracing::info;

use crate::error::LedgerError;
use crate::events::{EventBus, LedgerEvent};
use crate::idempotency::{self, Claim, IdempotencyScope};
use crate::ledger::{self, BalanceSide, EntityKind, EntityRef, EntryType, LedgerCategory, Posting};
use crate::types::{Currency, WalletId};
use crate::wallet_store;

pub struct FundingService {
    pool: PgPool,
    events: EventBus,
}

impl FundingService {
    pub fn new(pool: PgPool, events: EventBus) -> Self {
        Self { pool, events }
    }

    /// Credit a settled external charge to the wallet.
    ///
    /// `external_ref` identifies the charge on the provider side and doubles
    /// as the ledger entity reference; the idempotency key makes provider
    /// webhook retries harmless.
    pub async fn record_deposit(
        &self,
        wallet_id: &WalletId,
        amount: u64,
        currency: &Currency,
        external_ref: &str,
        idempotency_key: &str,
    ) -> Result<ledger::LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        match idempotency::claim(&mut tx, IdempotencyScope::Deposit, idempotency_key).await? {
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

        let wallet = wallet_store::lock(&mut tx, wallet_id).await?;
        wallet.ensure_active()?;

        let entry = ledger::post(
            &mut tx,
            &Posting {
                wallet_id: *wallet_id,
                entry_type: EntryType::Credit,
                side: BalanceSide::Available,
                category: LedgerCategory::Deposit,
                amount,
                currency: currency.clone(),
                entity: EntityRef::new(EntityKind::External, external_ref),
            },
        )
        .await?;

        idempotency::complete(
            &mut tx,
            IdempotencyScope::Deposit,
            idempotency_key,
            &idempotency::encode_result(&entry)?,
        )
        .await?;

        tx.commit().await?;

        info!(
            wallet_id = %wallet_id,
            amount,
            external_ref,
            "Deposit credited"
        );
        self.events.publish(LedgerEvent::DepositCredited {
            wallet_id: *wallet_id,
            amount,
        });

        Ok(entry)
    }
}
