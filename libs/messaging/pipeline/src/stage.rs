//! Stage trait and the values stages hand back to the pipeline

use crate::adapter::MessageAdapter;
use crate::error::Result;
use std::fmt::Debug;
use trading_messages::{Message, TransactionIdGenerator};

/// What a stage hands back to the pipeline after handling a message
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Continue in the same direction
    pub forward: Vec<Message>,
    /// Outbound only: send back toward the application from this stage
    pub replies: Vec<Message>,
    /// Re-submit outbound starting at this stage, flagged as loop-back
    pub loop_back: Vec<Message>,
}

impl StageOutput {
    /// Pass a single message on
    pub fn forward(message: Message) -> Self {
        Self {
            forward: vec![message],
            ..Default::default()
        }
    }

    /// Drop the message
    pub fn suppress() -> Self {
        Self::default()
    }

    /// Answer locally instead of forwarding
    pub fn reply(message: Message) -> Self {
        Self {
            replies: vec![message],
            ..Default::default()
        }
    }

    pub fn with_reply(mut self, message: Message) -> Self {
        self.replies.push(message);
        self
    }

    pub fn with_loop_back(mut self, message: Message) -> Self {
        self.loop_back.push(message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.replies.is_empty() && self.loop_back.is_empty()
    }
}

/// Read-only view of the pipeline a stage may consult
pub struct StageContext<'a> {
    /// Venue capabilities
    pub adapter: &'a dyn MessageAdapter,
    /// Shared transaction id source
    pub ids: &'a TransactionIdGenerator,
}

/// One transformer in the pipeline
///
/// Stages keep their state behind their own lock and must release it before returning.
pub trait Stage: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Handle a message travelling toward the venue
    fn on_outbound(&self, message: Message, ctx: &StageContext<'_>) -> Result<StageOutput>;

    /// Handle a message travelling toward the application
    fn on_inbound(&self, message: Message, ctx: &StageContext<'_>) -> StageOutput;

    /// Same configuration, empty state
    fn fresh(&self) -> Box<dyn Stage>;
}
