//! Pipeline driver and builder

use crate::adapter::MessageAdapter;
use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use trading_messages::{Message, TransactionIdGenerator};

/// Receives every message that leaves the outermost stage
pub type InboundHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Ordered stage chain in front of one venue adapter
///
/// Index 0 is the outermost stage (closest to the application). Outbound messages walk the
/// chain upward toward the adapter, inbound messages walk it downward toward the handler.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    adapter: Box<dyn MessageAdapter>,
    ids: Arc<TransactionIdGenerator>,
    handler: RwLock<Option<InboundHandler>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

impl Pipeline {
    pub fn builder(adapter: Box<dyn MessageAdapter>) -> PipelineBuilder {
        PipelineBuilder::new(adapter)
    }

    /// Submit a message from the application side.
    ///
    /// Returns whether anything reached the venue. Capacity errors are returned to the caller
    /// and leave already-buffered state untouched.
    pub fn send(&self, message: Message) -> Result<bool> {
        self.dispatch_outbound(0, message)
    }

    /// Feed a message into the inbound path as if the venue had emitted it
    pub fn inject_inbound(&self, message: Message) {
        self.dispatch_inbound(self.stages.len(), message);
    }

    pub fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_inbound_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn adapter(&self) -> &dyn MessageAdapter {
        self.adapter.as_ref()
    }

    pub fn transaction_ids(&self) -> &Arc<TransactionIdGenerator> {
        &self.ids
    }

    /// Independent pipeline: every stage restarts empty, the adapter is cloned, the
    /// transaction id source is shared. The inbound handler is not copied.
    pub fn deep_clone(&self) -> Arc<Pipeline> {
        let stages = self.stages.iter().map(|stage| stage.fresh()).collect();
        Self::assemble(stages, self.adapter.clone_adapter(), Arc::clone(&self.ids))
    }

    fn assemble(
        stages: Vec<Box<dyn Stage>>,
        adapter: Box<dyn MessageAdapter>,
        ids: Arc<TransactionIdGenerator>,
    ) -> Arc<Pipeline> {
        let pipeline = Arc::new(Pipeline {
            stages,
            adapter,
            ids,
            handler: RwLock::new(None),
        });

        let weak = Arc::downgrade(&pipeline);
        pipeline.adapter.set_output(Arc::new(move |message| {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.inject_inbound(message);
            }
        }));

        pipeline
    }

    fn context(&self) -> StageContext<'_> {
        StageContext {
            adapter: self.adapter.as_ref(),
            ids: &self.ids,
        }
    }

    fn dispatch_outbound(&self, index: usize, message: Message) -> Result<bool> {
        let Some(stage) = self.stages.get(index) else {
            return Ok(self.send_to_adapter(message));
        };

        let StageOutput {
            forward,
            replies,
            loop_back,
        } = stage.on_outbound(message, &self.context())?;

        for reply in replies {
            self.dispatch_inbound(index, reply);
        }

        let mut sent = false;
        for next in forward {
            sent |= self.dispatch_outbound(index + 1, next)?;
        }
        for message in loop_back {
            sent |= self.dispatch_outbound(index, message.loop_back())?;
        }

        Ok(sent)
    }

    /// Run `message` through the stages below `end`, outermost last
    fn dispatch_inbound(&self, end: usize, message: Message) {
        if end == 0 {
            self.deliver(message);
            return;
        }

        let index = end - 1;
        let stage = &self.stages[index];
        let StageOutput {
            forward,
            replies,
            loop_back,
        } = stage.on_inbound(message, &self.context());

        for next in forward.into_iter().chain(replies) {
            self.dispatch_inbound(index, next);
        }

        for message in loop_back {
            if let Err(error) = self.dispatch_outbound(index, message.loop_back()) {
                warn!(stage = stage.name(), %error, "Loop-back message rejected");
            }
        }
    }

    fn send_to_adapter(&self, mut message: Message) -> bool {
        message.clear_back();
        let message_type = message.message_type();
        let sent = self.adapter.send(message);
        if !sent {
            warn!(adapter = self.adapter.name(), ?message_type, "Venue adapter refused message");
        }
        sent
    }

    fn deliver(&self, message: Message) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(message),
            None => debug!(
                message_type = ?message.message_type(),
                "No inbound handler installed, message dropped"
            ),
        }
    }
}

/// Assembles a [`Pipeline`] stage by stage, outermost first
pub struct PipelineBuilder {
    adapter: Box<dyn MessageAdapter>,
    stages: Vec<Box<dyn Stage>>,
    ids: Option<Arc<TransactionIdGenerator>>,
}

impl PipelineBuilder {
    pub fn new(adapter: Box<dyn MessageAdapter>) -> Self {
        Self {
            adapter,
            stages: Vec::new(),
            ids: None,
        }
    }

    /// Share a transaction id source with the caller
    pub fn with_transaction_ids(mut self, ids: Arc<TransactionIdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Append a stage inside the ones already added
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Arc<Pipeline> {
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(TransactionIdGenerator::new()));
        Pipeline::assemble(self.stages, self.adapter, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockVenue, RecordingHandler};
    use trading_messages::{MessageBody, SubscriptionReply};

    #[derive(Debug, Default)]
    struct EchoStage;

    impl Stage for EchoStage {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn on_outbound(&self, message: Message, _ctx: &StageContext<'_>) -> Result<StageOutput> {
            let reply = Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(
                message.transaction_id(),
            )));
            Ok(StageOutput::forward(message).with_reply(reply))
        }

        fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
            StageOutput::forward(message)
        }

        fn fresh(&self) -> Box<dyn Stage> {
            Box::new(EchoStage)
        }
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let venue = MockVenue::new();
        let pipeline = Pipeline::builder(Box::new(venue.clone())).build();
        let handler = RecordingHandler::new();
        pipeline.set_inbound_handler(handler.callback());

        assert!(pipeline.send(Message::new(MessageBody::Time)).unwrap());
        assert_eq!(venue.sent_count(), 1);

        venue.emit(Message::new(MessageBody::Time));
        assert_eq!(handler.count(), 1);
    }

    #[test]
    fn test_stage_replies_reach_handler() {
        let venue = MockVenue::new();
        let pipeline = Pipeline::builder(Box::new(venue.clone()))
            .stage(EchoStage)
            .build();
        let handler = RecordingHandler::new();
        pipeline.set_inbound_handler(handler.callback());

        pipeline.send(Message::new(MessageBody::Time)).unwrap();

        assert_eq!(venue.sent_count(), 1);
        assert_eq!(handler.count(), 1);
    }

    #[test]
    fn test_deep_clone_isolates_adapter() {
        let venue = MockVenue::new();
        let pipeline = Pipeline::builder(Box::new(venue.clone()))
            .stage(EchoStage)
            .build();

        let cloned = pipeline.deep_clone();
        cloned.send(Message::new(MessageBody::Time)).unwrap();

        assert_eq!(venue.sent_count(), 0);
        assert_eq!(cloned.stage_names(), vec!["echo"]);
    }
}
