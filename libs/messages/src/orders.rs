//! Outbound order commands

use crate::enums::{OrderType, Side};
use crate::ids::{SecurityId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trigger description attached to conditional orders
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderCondition {
    pub trigger_price: Option<Decimal>,
    pub parameters: BTreeMap<String, String>,
}

/// New order registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRegister {
    pub transaction_id: TransactionId,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub volume: Decimal,
    pub condition: Option<OrderCondition>,
    pub client_code: Option<String>,
    pub comment: Option<String>,
    pub user_order_id: Option<String>,
}

impl OrderRegister {
    pub fn new(
        transaction_id: TransactionId,
        security_id: SecurityId,
        portfolio_name: impl Into<String>,
        side: Side,
        price: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            transaction_id,
            security_id,
            portfolio_name: portfolio_name.into(),
            side,
            order_type: OrderType::Limit,
            price,
            volume,
            condition: None,
            client_code: None,
            comment: None,
            user_order_id: None,
        }
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_condition(mut self, condition: OrderCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.order_type == OrderType::Conditional
    }
}

/// Cancel of a previously registered order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancel {
    pub transaction_id: TransactionId,
    /// Transaction id of the order being cancelled
    pub original_transaction_id: TransactionId,
    pub order_id: Option<u64>,
    pub order_string_id: Option<String>,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Option<Side>,
    pub order_type: Option<OrderType>,
    pub volume: Option<Decimal>,
}

impl OrderCancel {
    pub fn new(
        transaction_id: TransactionId,
        original_transaction_id: TransactionId,
        security_id: SecurityId,
        portfolio_name: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id,
            original_transaction_id,
            order_id: None,
            order_string_id: None,
            security_id,
            portfolio_name: portfolio_name.into(),
            side: None,
            order_type: None,
            volume: None,
        }
    }
}

/// Atomic cancel-and-register of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReplace {
    /// Transaction id of the order being replaced
    pub old_transaction_id: TransactionId,
    pub old_order_id: Option<u64>,
    pub old_order_string_id: Option<String>,
    /// Replacement order; its transaction id is the command's transaction id
    pub new_order: OrderRegister,
}

impl OrderReplace {
    pub fn new(old_transaction_id: TransactionId, new_order: OrderRegister) -> Self {
        Self {
            old_transaction_id,
            old_order_id: None,
            old_order_string_id: None,
            new_order,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.new_order.transaction_id
    }
}

/// Two replaces submitted together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPairReplace {
    pub first: OrderReplace,
    pub second: OrderReplace,
}

/// Filtered mass cancel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderGroupCancel {
    pub transaction_id: TransactionId,
    /// `Some(true)` cancels only conditional orders, `Some(false)` only plain ones
    pub is_stop: Option<bool>,
    pub portfolio_name: Option<String>,
    pub side: Option<Side>,
    pub board: Option<String>,
    pub security_id: Option<SecurityId>,
}

/// Order status request (a lookup; may be ranged)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderStatus {
    pub transaction_id: TransactionId,
    /// Request an unsubscribe refers to
    pub original_transaction_id: TransactionId,
    pub is_subscribe: bool,
    pub order_id: Option<u64>,
    pub order_string_id: Option<String>,
    pub portfolio_name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderStatus {
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

    /// Requests naming a concrete order bypass lookup queuing and range splitting
    pub fn has_order_id(&self) -> bool {
        self.order_id.is_some() || self.order_string_id.is_some()
    }
}
