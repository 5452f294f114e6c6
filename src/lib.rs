//! Wallet, escrow and double-entry ledger core.
//!
//! PostgreSQL is the authoritative store. Every financial operation runs in
//! one transaction: idempotency claim, wallet row locks in ascending id
//! order, ledger postings with atomically-updated cached balances, status
//! transition, commit. Background workers (escrow expiry sweeper, payout
//! dispatcher) reuse the same operations.

pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod events;
pub mod funding;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod payout;
pub mod refund;
pub mod sweeper;
pub mod types;
pub mod wallet;
pub mod wallet_store;

pub use config::AppConfig;
pub use db::Database;
pub use error::LedgerError;
pub use escrow::{AuthorizeRequest, EscrowEngine, EscrowIntent, EscrowStatus};
pub use events::{EventBus, LedgerEvent};
pub use funding::FundingService;
pub use payout::{PayoutDispatcher, PayoutProcessor, PayoutRequest, PayoutStatus};
pub use refund::{Refund, RefundProcessor, RefundRequest, RefundStatus};
pub use sweeper::{EscrowSweeper, SweeperConfig};
pub use types::{Currency, EscrowId, PayoutAccountId, PayoutId, RefundId, WalletId};
pub use wallet::{Wallet, WalletLifecycle};
