//! Core identifier types.
//!
//! Entity IDs are ULIDs: monotonic, sortable, and coordination-free. They are
//! stored as TEXT primary keys; their ordering doubles as the fixed global
//! lock-acquisition order for multi-wallet operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id! {
    /// Wallet identifier. Also defines the global lock order: operations
    /// touching two wallets always lock the smaller id first.
    WalletId
}

ulid_id! {
    /// Escrow intent identifier
    EscrowId
}

ulid_id! {
    /// Payout identifier
    PayoutId
}

ulid_id! {
    /// Refund identifier
    RefundId
}

ulid_id! {
    /// Payout account identifier
    PayoutAccountId
}

/// Collaborator-side owner reference (user/org id). Opaque here.
pub type OwnerId = u64;

/// ISO-style currency code: 3..=8 uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, LedgerError> {
        let code = code.trim();
        let valid = (3..=8).contains(&code.len())
            && code.chars().all(|c| c.is_ascii_uppercase());
        if !valid {
            return Err(LedgerError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

/// Opaque pointer to the collaborator entity an escrow backs (order,
/// project, gig). Never dereferenced inside this crate; looked up by the
/// collaborator via foreign key, never traversed as an object reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Collaborator entity kind, e.g. "order" or "project"
    pub kind: String,
    /// Collaborator-side identifier
    pub id: String,
}

impl Reference {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_id_roundtrip() {
        let id = WalletId::new();
        let parsed: WalletId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_wallet_id_ordering_matches_string_order() {
        // Crockford base32 preserves numeric order, so the string form and
        // the u128 form sort identically. Lock ordering relies on this.
        let a = WalletId::new();
        let b = WalletId::new();
        assert_eq!(a < b, a.to_string() < b.to_string());
    }

    #[test]
    fn test_currency_validation() {
        assert!(Currency::new("USD").is_ok());
        assert!(Currency::new("USDT").is_ok());
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("TOOLONGCODE").is_err());
        assert!(Currency::new("U$D").is_err());
    }

    #[test]
    fn test_reference_display() {
        let r = Reference::new("order", "order-1");
        assert_eq!(r.to_string(), "order:order-1");
    }
}
