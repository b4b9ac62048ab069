//! Explicit composite keys for the cache indices
//!
//! Every correlation table is keyed by one of these structs instead of an ad-hoc tuple, so
//! the equality contract of each key is spelled out (and tested) in one place:
//!
//! - [`OrderKey`]: `(transaction, conditional?, cancel?)`; a conditional order and a plain
//!   order registered under the same transaction id never collide
//! - [`TradeKey`]: numeric id wins over string id; string ids compare case-insensitively
//! - [`PositionKey`]: absent client code / depo name are the same as empty ones

use serde::{Deserialize, Serialize};
use trading_messages::{LimitType, OrderType, SecurityId, TransactionId};

/// Per-security order slot: registration or cancellation of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub transaction_id: TransactionId,
    pub is_conditional: bool,
    pub is_cancel: bool,
}

impl OrderKey {
    pub fn new(transaction_id: TransactionId, order_type: Option<OrderType>, is_cancel: bool) -> Self {
        Self {
            transaction_id,
            is_conditional: order_type == Some(OrderType::Conditional),
            is_cancel,
        }
    }

    /// Same transaction, conditional slot
    pub fn conditional(self) -> Self {
        Self {
            is_conditional: true,
            ..self
        }
    }
}

/// Global transaction index key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub transaction_id: TransactionId,
    pub is_cancel: bool,
}

impl TransactionKey {
    pub fn new(transaction_id: TransactionId, is_cancel: bool) -> Self {
        Self {
            transaction_id,
            is_cancel,
        }
    }
}

/// Trade identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKey {
    Id(u64),
    /// Stored lowercase
    StringId(String),
}

impl TradeKey {
    /// Numeric id if present, else the string id; `None` for anonymous trades
    pub fn new(id: Option<u64>, string_id: Option<&str>) -> Option<Self> {
        match (id, string_id) {
            (Some(id), _) => Some(TradeKey::Id(id)),
            (None, Some(s)) if !s.is_empty() => Some(TradeKey::StringId(s.to_lowercase())),
            _ => None,
        }
    }
}

/// Own trade identity: the owning order's transaction plus the trade identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MyTradeKey {
    pub transaction_id: TransactionId,
    pub trade: Option<TradeKey>,
}

impl MyTradeKey {
    pub fn new(transaction_id: TransactionId, trade: Option<TradeKey>) -> Self {
        Self {
            transaction_id,
            trade,
        }
    }
}

/// Position identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub portfolio_name: String,
    pub security_id: SecurityId,
    pub client_code: String,
    pub depo_name: String,
    pub limit_type: Option<LimitType>,
}

impl PositionKey {
    pub fn new(portfolio_name: impl Into<String>, security_id: SecurityId) -> Self {
        Self {
            portfolio_name: portfolio_name.into(),
            security_id,
            client_code: String::new(),
            depo_name: String::new(),
            limit_type: None,
        }
    }

    pub fn with_client_code(mut self, client_code: Option<&str>) -> Self {
        self.client_code = client_code.unwrap_or_default().to_string();
        self
    }

    pub fn with_depo_name(mut self, depo_name: Option<&str>) -> Self {
        self.depo_name = depo_name.unwrap_or_default().to_string();
        self
    }

    pub fn with_limit_type(mut self, limit_type: Option<LimitType>) -> Self {
        self.limit_type = limit_type;
        self
    }
}

/// Order book identity; filtered books (own orders removed) are kept apart
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepthKey {
    pub security_id: SecurityId,
    pub is_filtered: bool,
}

impl DepthKey {
    pub fn new(security_id: SecurityId, is_filtered: bool) -> Self {
        Self {
            security_id,
            is_filtered,
        }
    }
}

/// Lowercased string id used by the order string-id indices
pub(crate) fn normalize_string_id(id: &str) -> String {
    id.to_lowercase()
}
