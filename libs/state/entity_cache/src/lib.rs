//! # Entity Cache - Order, Trade and Position Correlation
//!
//! ## Purpose
//!
//! Stateful core of the connector. Venue replies arrive keyed by whatever identifier the
//! venue chose to echo (our transaction id, its numeric order id, its string order id); the
//! cache resolves every reply to a single tracked entity, drives the order state machine and
//! keeps memory bounded by recycling terminal orders and old trades.
//!
//! ## Integration Points
//!
//! - **Input**: `ExecutionMessage`, `QuoteChange`, `Level1Change`, `PositionChange` routed by the connector
//! - **Output**: snapshot clones of [`Order`], [`MyTrade`], [`Trade`], [`Position`], [`Security`]
//! - **Monitoring**: [`Statistics`] collector injected at construction
//!
//! ## Architecture Role
//!
//! ```text
//! Pipeline ──inbound──► Connector ──► [EntityCache] ──changes──► Connector events
//!                                       │
//!                                       ├─ OrderIndex  (orders + own trades, one lock)
//!                                       ├─ TradeIndex  (public ticks)
//!                                       ├─ securities / portfolios / positions (sharded)
//!                                       └─ depth + level1 snapshots
//! ```
//!
//! ## Order Lifecycle
//!
//! ```text
//! None ──► Pending ──► Active ──► Done
//!             │           │
//!             ├──► Done   └─────► Failed
//!             └──► Failed
//! ```
//!
//! Terminal orders never change again. Balance never increases. Replies that would break
//! either rule are logged and dropped rather than returned as errors, since the venue has
//! already acted on them.
//!
//! ## Retention
//!
//! Orders and trades are recycled once their count exceeds 1.5x the configured keep count,
//! back down to the keep count. Only terminal orders are eligible; open orders stay however
//! old they are.

pub mod cache;
pub mod entities;
pub mod error;
pub mod keys;
mod market;
mod orders;
pub mod stats;
mod trades;

pub use cache::{CacheConfig, EntityCache, OrderFailures, OrderUpdate};
pub use entities::{
    MarketDepth, MyTrade, Order, OrderChange, OrderFail, Portfolio, Position, Security, Trade,
};
pub use error::{CacheError, Result};
pub use keys::{DepthKey, MyTradeKey, OrderKey, PositionKey, TradeKey, TransactionKey};
pub use stats::{Statistics, StatisticsSnapshot};
