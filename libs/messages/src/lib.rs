//! # Trading Messages - Venue-Agnostic Message Model
//!
//! ## Purpose
//!
//! Single internal message model every venue binding normalizes into. Messages are a closed
//! set of tagged variants: connection control, order commands, execution reports, level1 and
//! quote-change market data, subscription requests and their response/online/finished replies.
//! Every message carries an immutable type tag, a mutable local time and the correlation ids
//! used to route asynchronous replies back to the command that caused them.
//!
//! ## Integration Points
//!
//! - **Adapter Pipeline** (`message-pipeline`): stages inspect and rewrite messages in both directions
//! - **Entity Cache** (`entity-cache`): correlates execution replies to orders and trades
//! - **Connector** (`connector`): builds outbound commands and consumes inbound replies
//!
//! ## Architecture Role
//!
//! ```text
//! Connector ──commands──► [Message] ──► Pipeline stages ──► Venue adapter
//!     ▲                                                          │
//!     └──events◄── Entity Cache ◄── Pipeline stages ◄──replies───┘
//! ```
//!
//! ## Correlation Ids
//!
//! - `transaction_id`: assigned by the caller to an outbound command, never reused (0 = none)
//! - `original_transaction_id`: carried by inbound replies, names the command being answered
//! - `subscription_ids`: data messages may serve several subscriptions at once
//!
//! ## Example
//!
//! ```rust
//! use trading_messages::{Message, MessageBody, MessageType, SubscriptionReply};
//!
//! let finished = Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(42)));
//! assert_eq!(finished.message_type(), MessageType::SubscriptionFinished);
//! assert_eq!(finished.original_transaction_id(), 42);
//! ```

pub mod enums;
pub mod error;
pub mod execution;
pub mod ids;
pub mod market_data;
pub mod message;
pub mod orders;
pub mod subscriptions;

pub use enums::{
    DataType, ExecutionKind, Level1Field, LimitType, OfflineMode, OrderState, OrderType,
    ReplyCorrelation, Side,
};
pub use error::{MessageError, Result};
pub use execution::ExecutionMessage;
pub use ids::{SecurityId, SubscriptionId, TransactionId, TransactionIdGenerator};
pub use market_data::{
    Level1Change, MarketDataRequest, PositionChange, QuoteChange, QuoteLevel, SecurityDefinition,
};
pub use message::{Message, MessageBody, MessageType};
pub use orders::{
    OrderCancel, OrderCondition, OrderGroupCancel, OrderPairReplace, OrderRegister, OrderReplace,
    OrderStatus,
};
pub use subscriptions::{
    BoardLookup, ConnectionReply, PortfolioLookup, PortfolioSubscription, SecurityLookup,
    SubscriptionReply, SubscriptionResponse,
};
