use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque backing-store transaction identifier (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(uuid::Uuid);

impl TxId {
    /// Generate a new time-ordered transaction ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.short_id())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidTxId(e.to_string()))
    }
}

/// Lifecycle of a transaction. Every state but `Open` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxState {
    Open,
    Committed,
    Aborted,
    /// A commit or the final abort attempt failed; the store's view of the
    /// transaction is not known.
    Unknown,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = TxId::new();
        let b = TxId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn parse_roundtrip() {
        let id = TxId::new();
        let parsed: TxId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<TxId>(),
            Err(TypeError::InvalidTxId(_))
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(!TxState::Open.is_terminal());
        assert!(TxState::Committed.is_terminal());
        assert!(TxState::Aborted.is_terminal());
        assert!(TxState::Unknown.is_terminal());
    }
}
