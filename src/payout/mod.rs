//! Payouts: withdraw available funds to an external settlement account.

pub mod db;
pub mod dispatcher;
pub mod gateway;
pub mod processor;
pub mod types;

pub use dispatcher::{DispatcherConfig, PayoutDispatcher};
pub use gateway::{GatewayOutcome, MockGateway, SettlementGateway};
pub use processor::PayoutProcessor;
pub use types::{Payout, PayoutAccount, PayoutRequest, PayoutStatus};
