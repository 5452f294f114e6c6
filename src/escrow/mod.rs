//! Escrow intents: authorize, hold, capture, cancel.

pub mod db;
pub mod engine;
pub mod status;
pub mod types;

pub use engine::EscrowEngine;
pub use status::EscrowStatus;
pub use types::{AuthorizeRequest, EscrowIntent};
