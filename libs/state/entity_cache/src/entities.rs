//! Cached trading entities
//!
//! Entities are owned by the cache and mutated only through cache operations. Everything
//! handed out of the cache is a snapshot clone.

use crate::keys::{PositionKey, TradeKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trading_messages::{
    ExecutionMessage, LimitType, OrderCondition, OrderRegister, OrderState, OrderType,
    QuoteLevel, SecurityId, Side, TransactionId,
};

/// Order as tracked by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Primary key, assigned once and never reused
    pub transaction_id: TransactionId,
    pub id: Option<u64>,
    pub string_id: Option<String>,
    pub board_id: Option<String>,
    pub security_id: SecurityId,
    pub portfolio_name: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub volume: Decimal,
    /// Remaining volume; never increases
    pub balance: Decimal,
    pub state: OrderState,
    /// Registration time reported by the venue
    pub time: Option<DateTime<Utc>>,
    pub last_change_time: Option<DateTime<Utc>>,
    pub local_time: Option<DateTime<Utc>>,
    pub commission: Option<Decimal>,
    pub latency_registration: Option<Duration>,
    pub latency_cancellation: Option<Duration>,
    pub condition: Option<OrderCondition>,
    pub client_code: Option<String>,
    pub comment: Option<String>,
    pub user_order_id: Option<String>,
}

impl Order {
    /// Local order for an outbound registration; balance starts at the full volume
    pub fn from_register(register: &OrderRegister) -> Self {
        Self {
            transaction_id: register.transaction_id,
            id: None,
            string_id: None,
            board_id: None,
            security_id: register.security_id.clone(),
            portfolio_name: register.portfolio_name.clone(),
            side: register.side,
            order_type: register.order_type,
            price: register.price,
            volume: register.volume,
            balance: register.volume,
            state: OrderState::None,
            time: None,
            last_change_time: None,
            local_time: None,
            commission: None,
            latency_registration: None,
            latency_cancellation: None,
            condition: register.condition.clone(),
            client_code: register.client_code.clone(),
            comment: register.comment.clone(),
            user_order_id: register.user_order_id.clone(),
        }
    }

    /// Order first seen in a venue reply
    pub(crate) fn from_execution(
        transaction_id: TransactionId,
        exec: &ExecutionMessage,
        portfolio_name: String,
    ) -> Self {
        let volume = exec.order_volume.unwrap_or_default();
        Self {
            transaction_id,
            id: None,
            string_id: None,
            board_id: None,
            security_id: exec.security_id.clone(),
            portfolio_name,
            side: exec.side.unwrap_or(Side::Buy),
            order_type: exec.order_type.unwrap_or_default(),
            price: exec.order_price.unwrap_or_default(),
            volume,
            balance: exec.balance.unwrap_or(volume),
            // venue-created orders enter the lifecycle as already submitted
            state: OrderState::Pending,
            time: Some(exec.server_time),
            last_change_time: Some(exec.server_time),
            local_time: None,
            commission: None,
            latency_registration: None,
            latency_cancellation: None,
            condition: None,
            client_code: exec.client_code.clone(),
            comment: exec.comment.clone(),
            user_order_id: None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.order_type == OrderType::Conditional
    }

    /// Whether the reply's exchange identifiers name this order
    pub fn is_identified_by(&self, exec: &ExecutionMessage) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| {
            matches!((a, b), (Some(a), Some(b)) if a.eq_ignore_ascii_case(b))
        };
        (exec.order_id.is_some() && exec.order_id == self.id)
            || same(&exec.order_string_id, &self.string_id)
            || same(&exec.order_board_id, &self.board_id)
    }

    /// Execution report describing this order's current state
    pub fn to_reply(&self, server_time: DateTime<Utc>) -> ExecutionMessage {
        let mut reply =
            ExecutionMessage::order_reply(self.security_id.clone(), self.transaction_id, server_time)
                .with_state(self.state)
                .with_portfolio(self.portfolio_name.clone())
                .with_side(self.side)
                .with_order(self.price, self.volume)
                .with_balance(self.balance);
        reply.order_type = Some(self.order_type);
        reply.order_id = self.id;
        reply.order_string_id = self.string_id.clone();
        reply.comment = self.comment.clone();
        reply
    }
}

/// Order change produced by a single reply
#[derive(Debug, Clone, PartialEq)]
pub struct OrderChange {
    pub order: Order,
    /// First notification for this order
    pub is_new: bool,
    /// Fields were modified by the reply
    pub is_changed: bool,
}

/// Failed registration or cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFail {
    pub order: Order,
    pub error: String,
    pub server_time: DateTime<Utc>,
    pub local_time: DateTime<Utc>,
}

impl OrderFail {
    pub fn new(order: Order, error: impl Into<String>, server_time: DateTime<Utc>) -> Self {
        Self {
            order,
            error: error.into(),
            server_time,
            local_time: server_time,
        }
    }

    /// Failure reply correlated to `original_transaction_id`
    pub fn to_reply(&self, original_transaction_id: TransactionId) -> ExecutionMessage {
        let mut reply = ExecutionMessage::order_reply(
            self.order.security_id.clone(),
            original_transaction_id,
            self.server_time,
        )
        .with_state(OrderState::Failed)
        .with_portfolio(self.order.portfolio_name.clone())
        .with_side(self.order.side)
        .with_error(self.error.clone());
        reply.order_type = Some(self.order.order_type);
        reply
    }
}

/// Public trade (tick)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub security_id: SecurityId,
    pub id: Option<u64>,
    pub string_id: Option<String>,
    pub price: Decimal,
    pub volume: Decimal,
    pub side: Option<Side>,
    pub server_time: DateTime<Utc>,
    pub local_time: DateTime<Utc>,
}

impl Trade {
    pub(crate) fn from_execution(exec: &ExecutionMessage, local_time: DateTime<Utc>) -> Self {
        Self {
            security_id: exec.security_id.clone(),
            id: exec.trade_id,
            string_id: exec.trade_string_id.clone(),
            price: exec.trade_price.unwrap_or_default(),
            volume: exec.trade_volume.unwrap_or_default(),
            side: exec.side,
            server_time: exec.server_time,
            local_time,
        }
    }

    pub fn key(&self) -> Option<TradeKey> {
        TradeKey::new(self.id, self.string_id.as_deref())
    }
}

/// Own trade: a fill of one of our orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MyTrade {
    pub order_transaction_id: TransactionId,
    pub order_id: Option<u64>,
    pub portfolio_name: String,
    pub side: Side,
    pub trade: Trade,
    pub commission: Option<Decimal>,
    /// Running position after the fill, when the pipeline derived one
    pub position: Option<Decimal>,
}

impl MyTrade {
    pub(crate) fn new(order: &Order, exec: &ExecutionMessage, local_time: DateTime<Utc>) -> Self {
        Self {
            order_transaction_id: order.transaction_id,
            order_id: order.id,
            portfolio_name: order.portfolio_name.clone(),
            side: order.side,
            trade: Trade::from_execution(exec, local_time),
            commission: exec.commission,
            position: exec.position,
        }
    }
}

/// Position for one [`PositionKey`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub portfolio_name: String,
    pub security_id: SecurityId,
    pub client_code: String,
    pub depo_name: String,
    pub limit_type: Option<LimitType>,
    pub current_value: Decimal,
    pub average_price: Option<Decimal>,
    pub blocked_value: Option<Decimal>,
    pub last_change_time: Option<DateTime<Utc>>,
    pub local_time: Option<DateTime<Utc>>,
}

impl Position {
    pub(crate) fn new(key: &PositionKey) -> Self {
        Self {
            portfolio_name: key.portfolio_name.clone(),
            security_id: key.security_id.clone(),
            client_code: key.client_code.clone(),
            depo_name: key.depo_name.clone(),
            limit_type: key.limit_type,
            current_value: Decimal::ZERO,
            average_price: None,
            blocked_value: None,
            last_change_time: None,
            local_time: None,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey {
            portfolio_name: self.portfolio_name.clone(),
            security_id: self.security_id.clone(),
            client_code: self.client_code.clone(),
            depo_name: self.depo_name.clone(),
            limit_type: self.limit_type,
        }
    }
}

/// Tradable instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub name: String,
    pub price_step: Option<Decimal>,
    pub volume_step: Option<Decimal>,
}

impl Security {
    pub(crate) fn new(id: SecurityId) -> Self {
        Self {
            name: id.code.clone(),
            id,
            price_step: None,
            volume_step: None,
        }
    }

    /// Board is fixed by the id at creation
    pub fn board(&self) -> &str {
        &self.id.board
    }
}

/// Trading account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub current_value: Option<Decimal>,
    pub blocked_value: Option<Decimal>,
}

impl Portfolio {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Order book snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub security_id: SecurityId,
    pub is_filtered: bool,
    pub bids: Vec<QuoteLevel>,
    pub asks: Vec<QuoteLevel>,
    pub last_change_time: Option<DateTime<Utc>>,
    pub local_time: Option<DateTime<Utc>>,
}

impl MarketDepth {
    pub(crate) fn new(security_id: SecurityId, is_filtered: bool) -> Self {
        Self {
            security_id,
            is_filtered,
            bids: Vec::new(),
            asks: Vec::new(),
            last_change_time: None,
            local_time: None,
        }
    }

    pub fn best_bid(&self) -> Option<&QuoteLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&QuoteLevel> {
        self.asks.first()
    }
}
