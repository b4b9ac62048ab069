//! Cache error types

use thiserror::Error;
use trading_messages::{MessageError, TransactionId};

/// Errors raised by cache operations
///
/// Argument errors (zero transaction ids, missing identity) are programmer errors and are
/// returned to the caller. Correlation anomalies are classified as recoverable so the
/// connector can log them and keep processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Transaction ids start at 1; 0 marks unsolicited updates only
    #[error("Transaction id must be positive")]
    ZeroTransactionId,

    /// Unsolicited update with neither a transaction id nor an exchange id
    #[error("Execution carries no transaction id, order id or order string id")]
    MissingOrderIdentity,

    /// Failure replies go through order failure processing
    #[error("Failure reply routed to order processing: {0}")]
    UnexpectedFailure(String),

    #[error("No order registered under transaction {0}")]
    UnknownOrder(TransactionId),

    #[error("Transaction {0} is already tracked")]
    DuplicateTransaction(TransactionId),

    #[error("Security {0} has no board")]
    MissingBoard(String),

    #[error("Portfolio name is empty")]
    EmptyPortfolioName,

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl CacheError {
    /// Protocol or correlation anomaly rather than a caller mistake
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::UnknownOrder(_) | CacheError::MissingBoard(_) | CacheError::Message(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(CacheError::UnknownOrder(5).is_recoverable());
        assert!(CacheError::MissingBoard("SBER".into()).is_recoverable());
        assert!(!CacheError::ZeroTransactionId.is_recoverable());
        assert!(!CacheError::MissingOrderIdentity.is_recoverable());
    }
}
