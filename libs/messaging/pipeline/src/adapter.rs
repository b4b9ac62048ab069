//! Inner venue adapter contract

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use trading_messages::{DataType, Message, MessageType};

/// Callback a venue adapter uses to emit inbound messages
pub type OutputCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Venue-specific protocol binding at the inner end of a pipeline
///
/// Implementations emit inbound messages through the callback installed with
/// [`set_output`](MessageAdapter::set_output), from any thread.
pub trait MessageAdapter: Send + Sync + Debug {
    /// Adapter name for logging
    fn name(&self) -> &str;

    /// Hand a message to the venue. Returns false if the venue refused it.
    fn send(&self, message: Message) -> bool;

    /// Install the inbound callback
    fn set_output(&self, output: OutputCallback);

    /// Independent copy with the same settings and no shared connection state
    fn clone_adapter(&self) -> Box<dyn MessageAdapter>;

    /// Largest history range served by one request. `Duration::ZERO` means history is
    /// not available for this data type; `Duration::MAX` means no limit.
    fn history_step_size(&self, _data_type: DataType) -> Duration {
        Duration::MAX
    }

    /// Closest order book depth the venue can serve for a requested depth
    fn nearest_supported_depth(&self, depth: u32) -> u32 {
        depth
    }

    /// Whether the venue emits its own terminal result for a lookup type
    fn is_result_message_supported(&self, _lookup_type: MessageType) -> bool {
        false
    }

    /// Whether the venue ever emits messages of this type
    fn is_out_message_supported(&self, _message_type: MessageType) -> bool {
        true
    }
}
