//! Execution reports: own order updates, own trades and public ticks

use crate::enums::{ExecutionKind, OrderState, OrderType, ReplyCorrelation, Side};
use crate::ids::{SecurityId, SubscriptionId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution report
///
/// A single report may describe an order update (`has_order_info`), a trade
/// (`has_trade_info`) or both. A populated `error` marks a failure reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub kind: ExecutionKind,
    pub security_id: SecurityId,
    pub portfolio_name: Option<String>,
    pub transaction_id: TransactionId,
    pub original_transaction_id: TransactionId,
    pub subscription_ids: Vec<SubscriptionId>,
    pub server_time: DateTime<Utc>,

    pub has_order_info: bool,
    pub order_id: Option<u64>,
    pub order_string_id: Option<String>,
    pub order_board_id: Option<String>,
    pub order_state: Option<OrderState>,
    pub order_type: Option<OrderType>,
    pub side: Option<Side>,
    pub order_price: Option<Decimal>,
    pub order_volume: Option<Decimal>,
    pub balance: Option<Decimal>,
    pub is_cancellation: bool,

    pub has_trade_info: bool,
    pub trade_id: Option<u64>,
    pub trade_string_id: Option<String>,
    pub trade_price: Option<Decimal>,
    pub trade_volume: Option<Decimal>,

    pub commission: Option<Decimal>,
    pub latency: Option<Duration>,
    /// Running position after this trade, stamped by position derivation
    pub position: Option<Decimal>,
    pub client_code: Option<String>,
    pub comment: Option<String>,
    pub error: Option<String>,
    pub correlation: Option<ReplyCorrelation>,
}

impl ExecutionMessage {
    /// Order update correlated to an outbound command
    pub fn order_reply(
        security_id: SecurityId,
        original_transaction_id: TransactionId,
        server_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: ExecutionKind::Transaction,
            security_id,
            original_transaction_id,
            server_time,
            has_order_info: true,
            ..Default::default()
        }
    }

    /// Public trade
    pub fn tick(security_id: SecurityId, server_time: DateTime<Utc>) -> Self {
        Self {
            kind: ExecutionKind::Tick,
            security_id,
            server_time,
            has_trade_info: true,
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: OrderState) -> Self {
        self.order_state = Some(state);
        self
    }

    pub fn with_order_id(mut self, order_id: u64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_order_string_id(mut self, order_string_id: impl Into<String>) -> Self {
        self.order_string_id = Some(order_string_id.into());
        self
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_portfolio(mut self, portfolio_name: impl Into<String>) -> Self {
        self.portfolio_name = Some(portfolio_name.into());
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_order(mut self, price: Decimal, volume: Decimal) -> Self {
        self.order_price = Some(price);
        self.order_volume = Some(volume);
        self
    }

    /// Attach trade details; marks the report as carrying trade info
    pub fn with_trade(mut self, trade_id: u64, price: Decimal, volume: Decimal) -> Self {
        self.has_trade_info = true;
        self.trade_id = Some(trade_id);
        self.trade_price = Some(price);
        self.trade_volume = Some(volume);
        self
    }

    pub fn with_trade_string_id(mut self, trade_string_id: impl Into<String>) -> Self {
        self.has_trade_info = true;
        self.trade_string_id = Some(trade_string_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_correlation(mut self, correlation: ReplyCorrelation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Failure reply
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
