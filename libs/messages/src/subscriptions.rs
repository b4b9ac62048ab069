//! Lookups, portfolio subscriptions and the replies that terminate them

use crate::ids::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connect/Disconnect notification (error set on transport failure)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionReply {
    pub error: Option<String>,
}

impl ConnectionReply {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

/// Security lookup by optional criteria
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityLookup {
    pub transaction_id: TransactionId,
    pub code: Option<String>,
    pub board: Option<String>,
}

impl SecurityLookup {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            ..Default::default()
        }
    }
}

/// Board lookup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoardLookup {
    pub transaction_id: TransactionId,
    pub code: Option<String>,
}

/// Portfolio lookup (ranged when `from`/`to` are set)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortfolioLookup {
    pub transaction_id: TransactionId,
    pub original_transaction_id: TransactionId,
    pub is_subscribe: bool,
    pub portfolio_name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl PortfolioLookup {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            is_subscribe: true,
            ..Default::default()
        }
    }

    pub fn unsubscribe(transaction_id: TransactionId, original_transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            original_transaction_id,
            is_subscribe: false,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }
}

/// Portfolio subscribe/unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortfolioSubscription {
    pub transaction_id: TransactionId,
    pub original_transaction_id: TransactionId,
    pub is_subscribe: bool,
    pub portfolio_name: String,
}

/// First reply to a subscription; an error terminates it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub original_transaction_id: TransactionId,
    pub error: Option<String>,
}

impl SubscriptionResponse {
    pub fn ok(original_transaction_id: TransactionId) -> Self {
        Self {
            original_transaction_id,
            error: None,
        }
    }

    pub fn failed(original_transaction_id: TransactionId, error: impl Into<String>) -> Self {
        Self {
            original_transaction_id,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Online/finished reply and the internal partial-download trigger
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionReply {
    pub original_transaction_id: TransactionId,
}

impl SubscriptionReply {
    pub fn new(original_transaction_id: TransactionId) -> Self {
        Self {
            original_transaction_id,
        }
    }
}
