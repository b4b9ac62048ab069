//! # Connector - Order Lifecycle Orchestration
//!
//! ## Purpose
//!
//! Composition root for one venue connection. Owns an [`EntityCache`](entity_cache::EntityCache)
//! and an adapter [`Pipeline`](message_pipeline::Pipeline), exposes the synchronous command API
//! (register, cancel, replace, mass cancel, lookups, subscriptions) and turns cache mutations
//! into [`ConnectorEvent`]s.
//!
//! ## Integration Points
//!
//! - **Outbound**: commands become messages sent through the pipeline toward the venue adapter
//! - **Inbound**: the pipeline's inbound handler feeds every reply into the entity cache
//! - **Events**: handlers registered with [`Connector::subscribe`] run synchronously on the
//!   delivering thread
//! - **Storage**: optional [`SecurityStorage`], [`PositionStorage`] and [`MessageStorage`] sinks
//! - **Configuration**: [`connector_config::ConnectorSettings`]
//!
//! ## Architecture Role
//!
//! ```text
//! caller ──commands──► [Connector] ──► Pipeline stages ──► venue adapter
//!                          ▲                                     │
//!   events ◄── EntityCache ┴──── inbound handler ◄── stages ◄────┘
//!                          ▲
//!                   timer thread (Time)
//! ```
//!
//! ## Failure Surface
//!
//! Invalid commands never reach the venue. They are turned into a failure execution that runs
//! through normal inbound processing, so a local rejection and a venue rejection raise the same
//! `OrderRegisterFailed` / `OrderCancelFailed` event. Only programmer errors (unknown order,
//! duplicate transaction id) and offline buffer overflow are returned as `Err`.
//!
//! ## Example
//!
//! ```rust
//! use connector::{Connector, ConnectionState, PaperVenue};
//! use rust_decimal::Decimal;
//! use trading_messages::{OrderRegister, SecurityId, Side};
//!
//! let connector = Connector::builder(Box::new(PaperVenue::new())).build();
//! connector.connect().unwrap();
//! assert_eq!(connector.connection_state(), ConnectionState::Connected);
//!
//! let security = SecurityId::new("SBER", "TQBR");
//! let register = OrderRegister::new(0, security, "pf", Side::Buy, Decimal::new(100, 0), Decimal::ONE);
//! let transaction_id = connector.register_order(register).unwrap();
//! assert!(connector.cache().order(transaction_id).unwrap().id.is_some());
//! ```

pub mod connector;
pub mod error;
pub mod events;
mod inbound;
pub mod state;
pub mod storage;
pub mod timer;
pub mod validation;
pub mod venue;

pub use connector::{build_pipeline, Connector, ConnectorBuilder};
pub use error::{ConnectorError, Result};
pub use events::{ConnectorEvent, EventHandler};
pub use state::ConnectionState;
pub use storage::{
    InMemoryMessageStorage, InMemoryPositionStorage, InMemorySecurityStorage, MessageStorage,
    PositionStorage, SecurityStorage,
};
pub use timer::TimerHandle;
pub use venue::PaperVenue;
