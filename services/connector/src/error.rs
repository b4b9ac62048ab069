//! Connector error types

use entity_cache::CacheError;
use message_pipeline::PipelineError;
use thiserror::Error;
use trading_messages::TransactionId;

use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Command rejected before reaching the venue
    #[error("Order {transaction_id} rejected: {reason}")]
    InvalidOrder {
        transaction_id: TransactionId,
        reason: String,
    },

    #[error("No order registered under transaction {0}")]
    UnknownOrder(TransactionId),

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("No subscription under transaction {0}")]
    UnknownSubscription(TransactionId),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl ConnectorError {
    pub fn invalid_order(transaction_id: TransactionId, reason: impl Into<String>) -> Self {
        ConnectorError::InvalidOrder {
            transaction_id,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same command later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConnectorError::InvalidState { .. } | ConnectorError::Storage(_) => true,
            ConnectorError::Pipeline(e) => e.is_recoverable(),
            ConnectorError::Cache(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
