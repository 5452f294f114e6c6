//! Escrow state machine definitions.
//!
//! State IDs are stored as SMALLINT. Terminal states are negative:
//! CANCELLED (-10), REFUNDED (-20).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escrow intent lifecycle
///
/// `Authorized -> Held -> Captured -> Refunded`, with `Authorized`/`Held`
/// also able to go to `Cancelled`. Authorization and the hold commit in one
/// transaction, so a persisted `Authorized` row is a crash artifact that the
/// sweeper expires through the normal cancel path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum EscrowStatus {
    /// Intent recorded, hold not yet confirmed
    Authorized = 10,

    /// Funds reserved in the payer's pending balance
    Held = 20,

    /// Full amount consumed; partial captures stay in `Held`
    Captured = 30,

    /// Terminal: hold reversed, nothing was captured
    Cancelled = -10,

    /// Terminal: every captured unit was refunded
    Refunded = -20,
}

impl EscrowStatus {
    /// No more transitions possible
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Cancelled | EscrowStatus::Refunded)
    }

    /// Capture consumes held funds, so it is only legal while funds are held
    #[inline]
    pub fn can_capture(&self) -> bool {
        matches!(self, EscrowStatus::Held)
    }

    /// Cancel is only legal before anything was captured; the zero-captured
    /// check is enforced by the engine on top of this
    #[inline]
    pub fn can_cancel(&self) -> bool {
        matches!(self, EscrowStatus::Authorized | EscrowStatus::Held)
    }

    /// Refunds reverse captured funds. `Held` intents may carry partial
    /// captures; the nonzero-captured check is enforced by the processor on
    /// top of this
    #[inline]
    pub fn can_refund(&self) -> bool {
        matches!(self, EscrowStatus::Captured | EscrowStatus::Held)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(EscrowStatus::Authorized),
            20 => Some(EscrowStatus::Held),
            30 => Some(EscrowStatus::Captured),
            -10 => Some(EscrowStatus::Cancelled),
            -20 => Some(EscrowStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Authorized => "AUTHORIZED",
            EscrowStatus::Held => "HELD",
            EscrowStatus::Captured => "CAPTURED",
            EscrowStatus::Cancelled => "CANCELLED",
            EscrowStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for EscrowStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        EscrowStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(EscrowStatus::Cancelled.is_terminal());
        assert!(EscrowStatus::Refunded.is_terminal());

        assert!(!EscrowStatus::Authorized.is_terminal());
        assert!(!EscrowStatus::Held.is_terminal());
        assert!(!EscrowStatus::Captured.is_terminal());
    }

    #[test]
    fn test_capture_legality() {
        assert!(EscrowStatus::Held.can_capture());
        assert!(!EscrowStatus::Authorized.can_capture());
        assert!(!EscrowStatus::Captured.can_capture());
        assert!(!EscrowStatus::Cancelled.can_capture());
        assert!(!EscrowStatus::Refunded.can_capture());
    }

    #[test]
    fn test_cancel_legality() {
        assert!(EscrowStatus::Authorized.can_cancel());
        assert!(EscrowStatus::Held.can_cancel());
        assert!(!EscrowStatus::Captured.can_cancel());
        assert!(!EscrowStatus::Cancelled.can_cancel());
        assert!(!EscrowStatus::Refunded.can_cancel());
    }

    #[test]
    fn test_refund_legality() {
        assert!(EscrowStatus::Captured.can_refund());
        assert!(EscrowStatus::Held.can_refund());
        assert!(!EscrowStatus::Authorized.can_refund());
        assert!(!EscrowStatus::Cancelled.can_refund());
        assert!(!EscrowStatus::Refunded.can_refund());
    }

    #[test]
    fn test_status_id_roundtrip() {
        let states = [
            EscrowStatus::Authorized,
            EscrowStatus::Held,
            EscrowStatus::Captured,
            EscrowStatus::Cancelled,
            EscrowStatus::Refunded,
        ];
        for state in states {
            assert_eq!(EscrowStatus::from_id(state.id()), Some(state));
        }
        assert!(EscrowStatus::from_id(999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(EscrowStatus::Held.to_string(), "HELD");
        assert_eq!(EscrowStatus::Refunded.to_string(), "REFUNDED");
    }
}
