//! Domain events raised from cache mutations
//!
//! Events fire synchronously on the thread that processed the triggering inbound message.
//! Handlers must not block; anything slow belongs on a channel owned by the handler.

use crate::state::ConnectionState;
use entity_cache::{
    MarketDepth, MyTrade, Order, OrderFail, Portfolio, Position, Security, Trade,
};
use std::sync::Arc;
use std::time::Duration;
use trading_messages::{Level1Field, SecurityId, TransactionId};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    ConnectionStateChanged(ConnectionState),
    ConnectionError(String),

    NewOrder(Order),
    OrderChanged(Order),
    OrderRegisterFailed(OrderFail),
    OrderCancelFailed(OrderFail),
    MassOrderCanceled(TransactionId),
    MassOrderCancelFailed { transaction_id: TransactionId, error: String },

    NewMyTrade(MyTrade),
    NewTrade(Trade),

    NewSecurity(Security),
    SecurityChanged(Security),
    NewPortfolio(Portfolio),
    PortfolioChanged(Portfolio),
    NewPosition(Position),
    PositionChanged(Position),

    NewMarketDepth(MarketDepth),
    MarketDepthChanged(MarketDepth),
    Level1Changed { security_id: SecurityId, fields: Vec<Level1Field> },

    SubscriptionStarted(TransactionId),
    SubscriptionFailed { transaction_id: TransactionId, error: String },
    SubscriptionOnline(TransactionId),
    SubscriptionFinished(TransactionId),

    /// Market time advanced by at least the configured interval
    MarketTimeChanged(Duration),
}

pub type EventHandler = Arc<dyn Fn(&ConnectorEvent) + Send + Sync>;
