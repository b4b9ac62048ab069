//! Identifiers: transaction ids and canonical security ids

use crate::error::{MessageError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-assigned command id. Zero means "not set".
pub type TransactionId = u64;

/// Transaction id of the subscription a data message belongs to
pub type SubscriptionId = TransactionId;

/// Process-unique, monotonically increasing transaction id source
#[derive(Debug)]
pub struct TransactionIdGenerator {
    last: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Generator whose first id is `last + 1`
    pub fn starting_after(last: TransactionId) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next_id(&self) -> TransactionId {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last id handed out (0 if none)
    pub fn current(&self) -> TransactionId {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Security identifier with canonical string form `CODE@BOARD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SecurityId {
    pub code: String,
    pub board: String,
}

impl SecurityId {
    pub fn new(code: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            board: board.into(),
        }
    }

    pub fn has_board(&self) -> bool {
        !self.board.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.board.is_empty()
    }

    /// Reject ids without a board
    pub fn require_board(&self) -> Result<&Self> {
        if self.has_board() {
            Ok(self)
        } else {
            Err(MessageError::MissingBoard(self.code.clone()))
        }
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.board)
    }
}

impl FromStr for SecurityId {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self> {
        let (code, board) = s
            .rsplit_once('@')
            .ok_or_else(|| MessageError::InvalidSecurityId(s.to_string()))?;

        if code.is_empty() {
            return Err(MessageError::InvalidSecurityId(s.to_string()));
        }
        if board.is_empty() {
            return Err(MessageError::MissingBoard(code.to_string()));
        }

        Ok(Self::new(code, board))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique_and_start_at_one() {
        let ids = TransactionIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.current(), 2);
    }

    #[test]
    fn test_security_id_parse() {
        let id: SecurityId = "AAPL@NASDAQ".parse().unwrap();
        assert_eq!(id, SecurityId::new("AAPL", "NASDAQ"));
        assert_eq!(id.to_string(), "AAPL@NASDAQ");

        assert!(matches!(
            "AAPL@".parse::<SecurityId>(),
            Err(MessageError::MissingBoard(_))
        ));
        assert!(matches!(
            "AAPL".parse::<SecurityId>(),
            Err(MessageError::InvalidSecurityId(_))
        ));
    }

    #[test]
    fn test_require_board() {
        assert!(SecurityId::new("SBER", "TQBR").require_board().is_ok());
        assert!(SecurityId::new("SBER", "").require_board().is_err());
    }
}
