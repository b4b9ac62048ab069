//! Test doubles for pipeline consumers
//!
//! [`MockVenue`] records everything sent to it and emits whatever a test scripts.
//! Cloning a `MockVenue` yields a second handle onto the same recorder, which is how tests
//! keep access to a venue after moving it into a pipeline. `clone_adapter` instead produces
//! an independent venue with the same capabilities.

use crate::adapter::{MessageAdapter, OutputCallback};
use crate::pipeline::InboundHandler;
use crate::stage::StageContext;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trading_messages::{DataType, Message, MessageType, TransactionIdGenerator};

#[derive(Debug, Clone, Default)]
struct Capabilities {
    history_steps: HashMap<DataType, Duration>,
    depth_tiers: Vec<u32>,
    result_supported: HashSet<MessageType>,
    out_unsupported: HashSet<MessageType>,
}

/// Scripted venue adapter
#[derive(Clone)]
pub struct MockVenue {
    name: String,
    capabilities: Arc<RwLock<Capabilities>>,
    sent: Arc<Mutex<Vec<Message>>>,
    output: Arc<RwLock<Option<OutputCallback>>>,
    refuse: Arc<AtomicBool>,
}

impl std::fmt::Debug for MockVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVenue")
            .field("name", &self.name)
            .field("sent", &self.sent.lock().len())
            .finish()
    }
}

impl MockVenue {
    pub fn new() -> Self {
        Self::with_name("mock-venue")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Arc::new(RwLock::new(Capabilities::default())),
            sent: Arc::new(Mutex::new(Vec::new())),
            output: Arc::new(RwLock::new(None)),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Serve history for `data_type` in windows of `step`
    pub fn with_history_step(self, data_type: DataType, step: Duration) -> Self {
        self.capabilities
            .write()
            .history_steps
            .insert(data_type, step);
        self
    }

    /// Order book depths the venue can serve, ascending
    pub fn with_depth_tiers(self, tiers: &[u32]) -> Self {
        let mut sorted = tiers.to_vec();
        sorted.sort_unstable();
        self.capabilities.write().depth_tiers = sorted;
        self
    }

    /// Venue emits its own terminal result for this lookup type
    pub fn with_result_support(self, lookup_type: MessageType) -> Self {
        self.capabilities
            .write()
            .result_supported
            .insert(lookup_type);
        self
    }

    /// Venue never emits this message type
    pub fn without_out_message(self, message_type: MessageType) -> Self {
        self.capabilities
            .write()
            .out_unsupported
            .insert(message_type);
        self
    }

    /// Make subsequent sends return false
    pub fn refuse_sends(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_sent(&self) -> Option<Message> {
        self.sent.lock().last().cloned()
    }

    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_of_type(&self, message_type: MessageType) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.message_type() == message_type)
            .cloned()
            .collect()
    }

    /// Emit an inbound message through the installed callback
    pub fn emit(&self, message: Message) {
        let output = self.output.read().clone();
        if let Some(output) = output {
            output(message);
        }
    }

    /// Context for driving a single stage directly in unit tests
    pub fn with_context<R>(&self, f: impl FnOnce(&StageContext<'_>) -> R) -> R {
        let ids = TransactionIdGenerator::starting_after(1000);
        let ctx = StageContext { adapter: self, ids: &ids };
        f(&ctx)
    }
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAdapter for MockVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: Message) -> bool {
        if self.refuse.load(Ordering::Relaxed) {
            return false;
        }
        self.sent.lock().push(message);
        true
    }

    fn set_output(&self, output: OutputCallback) {
        *self.output.write() = Some(output);
    }

    fn clone_adapter(&self) -> Box<dyn MessageAdapter> {
        let copy = MockVenue::with_name(self.name.clone());
        *copy.capabilities.write() = self.capabilities.read().clone();
        Box::new(copy)
    }

    fn history_step_size(&self, data_type: DataType) -> Duration {
        self.capabilities
            .read()
            .history_steps
            .get(&data_type)
            .copied()
            .unwrap_or(Duration::MAX)
    }

    fn nearest_supported_depth(&self, depth: u32) -> u32 {
        let capabilities = self.capabilities.read();
        capabilities
            .depth_tiers
            .iter()
            .copied()
            .find(|tier| *tier >= depth)
            .or_else(|| capabilities.depth_tiers.last().copied())
            .unwrap_or(depth)
    }

    fn is_result_message_supported(&self, lookup_type: MessageType) -> bool {
        self.capabilities
            .read()
            .result_supported
            .contains(&lookup_type)
    }

    fn is_out_message_supported(&self, message_type: MessageType) -> bool {
        !self
            .capabilities
            .read()
            .out_unsupported
            .contains(&message_type)
    }
}

/// Inbound handler that records what reaches the application
#[derive(Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<Message>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> InboundHandler {
        let received = Arc::clone(&self.received);
        Arc::new(move |message| received.lock().push(message))
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn of_type(&self, message_type: MessageType) -> Vec<Message> {
        self.received
            .lock()
            .iter()
            .filter(|m| m.message_type() == message_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}
