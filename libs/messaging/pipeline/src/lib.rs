//! # Message Pipeline - Bidirectional Adapter Chain
//!
//! ## Purpose
//!
//! Sits between the connector and a venue adapter and transforms traffic in both directions.
//! Each stage may rewrite, suppress, queue, duplicate or synthesize messages before handing
//! them to the next hop. Stages are plain objects in an ordered list rather than wrappers
//! inheriting from one another, so the chain is assembled explicitly with [`PipelineBuilder`].
//!
//! ## Architecture Role
//!
//! ```text
//!            outbound (app → venue)
//!   Connector ──► Offline ──► LookupTracking ──► PartialDownload ──► DepthTruncate ──► Level1Depth ──► Position ──► Venue
//!   Connector ◄── Offline ◄── LookupTracking ◄── PartialDownload ◄── DepthTruncate ◄── Level1Depth ◄── Position ◄── Venue
//!            inbound (venue → app)
//! ```
//!
//! ## Stage Contract
//!
//! - `on_outbound` returns messages to forward inward, replies to send back outward and
//!   loop-back messages to re-submit through itself
//! - `on_inbound` returns messages to forward outward and loop-back messages
//! - every stage clears its state on `Reset`
//! - no stage lock is held while the pipeline moves a message to another hop
//!
//! ## Integration Points
//!
//! - **Venue adapters** implement [`MessageAdapter`]
//! - **Connector** owns one [`Pipeline`] per connection and installs the inbound handler
//! - **Timer** pushes synthetic time messages through [`Pipeline::inject_inbound`]

pub mod adapter;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod stages;
pub mod test_utils;

pub use adapter::{MessageAdapter, OutputCallback};
pub use error::{PipelineError, Result};
pub use pipeline::{InboundHandler, Pipeline, PipelineBuilder};
pub use stage::{Stage, StageContext, StageOutput};
pub use stages::{
    DepthTruncateStage, Level1DepthStage, LookupTrackingConfig, LookupTrackingStage,
    OfflineConfig, OfflineStage, PartialDownloadStage, PositionStage,
};
