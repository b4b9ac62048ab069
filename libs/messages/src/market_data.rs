//! Market data messages and market data subscriptions

use crate::enums::{DataType, Level1Field, LimitType};
use crate::ids::{SecurityId, SubscriptionId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One price level of an order book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLevel {
    pub price: Decimal,
    pub volume: Decimal,
}

impl QuoteLevel {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }
}

/// Order book snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuoteChange {
    pub security_id: SecurityId,
    pub server_time: DateTime<Utc>,
    /// Best bid first
    pub bids: Vec<QuoteLevel>,
    /// Best ask first
    pub asks: Vec<QuoteLevel>,
    /// Synthesized from level1 best bid/ask rather than a native depth feed
    pub is_by_level1: bool,
    pub is_filtered: bool,
    pub original_transaction_id: TransactionId,
    pub subscription_ids: Vec<SubscriptionId>,
}

impl QuoteChange {
    pub fn new(
        security_id: SecurityId,
        server_time: DateTime<Utc>,
        bids: Vec<QuoteLevel>,
        asks: Vec<QuoteLevel>,
    ) -> Self {
        Self {
            security_id,
            server_time,
            bids,
            asks,
            ..Default::default()
        }
    }

    /// Keep at most `depth` levels on each side
    pub fn truncate(&mut self, depth: usize) {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
    }

    pub fn best_bid(&self) -> Option<&QuoteLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&QuoteLevel> {
        self.asks.first()
    }
}

/// Top-of-book field changes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Level1Change {
    pub security_id: SecurityId,
    pub server_time: DateTime<Utc>,
    pub changes: BTreeMap<Level1Field, Decimal>,
    pub original_transaction_id: TransactionId,
    pub subscription_ids: Vec<SubscriptionId>,
}

impl Level1Change {
    pub fn new(security_id: SecurityId, server_time: DateTime<Utc>) -> Self {
        Self {
            security_id,
            server_time,
            ..Default::default()
        }
    }

    pub fn with(mut self, field: Level1Field, value: Decimal) -> Self {
        self.changes.insert(field, value);
        self
    }

    pub fn get(&self, field: Level1Field) -> Option<Decimal> {
        self.changes.get(&field).copied()
    }

    /// Carries any best bid/ask price or volume field
    pub fn has_best_quotes(&self) -> bool {
        [
            Level1Field::BestBidPrice,
            Level1Field::BestBidVolume,
            Level1Field::BestAskPrice,
            Level1Field::BestAskVolume,
        ]
        .iter()
        .any(|field| self.changes.contains_key(field))
    }
}

/// Market data subscribe/unsubscribe (ranged when `from`/`to` are set)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataRequest {
    pub transaction_id: TransactionId,
    /// For unsubscribes: the subscription being stopped
    pub original_transaction_id: TransactionId,
    pub is_subscribe: bool,
    pub security_id: SecurityId,
    pub data_type: DataType,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub max_depth: Option<u32>,
}

impl MarketDataRequest {
    pub fn subscribe(
        transaction_id: TransactionId,
        security_id: SecurityId,
        data_type: DataType,
    ) -> Self {
        Self {
            transaction_id,
            original_transaction_id: 0,
            is_subscribe: true,
            security_id,
            data_type,
            from: None,
            to: None,
            max_depth: None,
        }
    }

    pub fn unsubscribe(
        transaction_id: TransactionId,
        subscription_id: TransactionId,
        security_id: SecurityId,
        data_type: DataType,
    ) -> Self {
        Self {
            transaction_id,
            original_transaction_id: subscription_id,
            is_subscribe: false,
            security_id,
            data_type,
            from: None,
            to: None,
            max_depth: None,
        }
    }

    pub fn with_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// Security definition delivered by a lookup or a venue push
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityDefinition {
    pub security_id: SecurityId,
    pub name: Option<String>,
    pub price_step: Option<Decimal>,
    pub volume_step: Option<Decimal>,
    pub original_transaction_id: TransactionId,
}

/// Position update for one (portfolio, security, client code, depo, limit type) key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionChange {
    pub portfolio_name: String,
    pub security_id: SecurityId,
    pub client_code: Option<String>,
    pub depo_name: Option<String>,
    pub limit_type: Option<LimitType>,
    pub server_time: DateTime<Utc>,
    pub current_value: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub blocked_value: Option<Decimal>,
    /// Produced by position derivation rather than reported by the venue
    pub is_derived: bool,
    pub original_transaction_id: TransactionId,
    pub subscription_ids: Vec<SubscriptionId>,
}

impl PositionChange {
    pub fn new(
        portfolio_name: impl Into<String>,
        security_id: SecurityId,
        server_time: DateTime<Utc>,
    ) -> Self {
        Self {
            portfolio_name: portfolio_name.into(),
            security_id,
            server_time,
            ..Default::default()
        }
    }

    pub fn with_current_value(mut self, value: Decimal) -> Self {
        self.current_value = Some(value);
        self
    }
}
