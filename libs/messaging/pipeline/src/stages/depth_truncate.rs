//! Order book depth truncation
//!
//! Venues serve depth in fixed tiers. When a subscriber asks for a depth the venue cannot
//! serve exactly, the next tier is requested and inbound books are clipped back to what each
//! subscriber asked for. One inbound book shared by subscriptions with different requested
//! depths is fanned out into one clone per depth.

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trading_messages::{DataType, Message, MessageType, TransactionId};

#[derive(Debug, Default)]
pub struct DepthTruncateStage {
    /// subscription transaction id → depth the subscriber asked for
    depths: Mutex<HashMap<TransactionId, u32>>,
}

impl DepthTruncateStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested_depth(&self, transaction_id: TransactionId) -> Option<u32> {
        self.depths.lock().get(&transaction_id).copied()
    }

    fn truncate(&self, mut message: Message) -> StageOutput {
        let depths = self.depths.lock();
        if depths.is_empty() {
            return StageOutput::forward(message);
        }

        let mut groups: BTreeMap<u32, Vec<TransactionId>> = BTreeMap::new();
        let mut untouched = Vec::new();
        for id in message.subscription_ids() {
            match depths.get(&id) {
                Some(depth) => groups.entry(*depth).or_default().push(id),
                None => untouched.push(id),
            }
        }
        drop(depths);

        if groups.is_empty() {
            return StageOutput::forward(message);
        }

        let mut output = StageOutput::default();
        for (depth, ids) in groups {
            let mut clipped = message.clone();
            if let Some(quote) = clipped.as_quote_change_mut() {
                quote.truncate(depth as usize);
            }
            clipped.set_subscription_ids(ids);
            output.forward.push(clipped);
        }

        if !untouched.is_empty() {
            message.set_subscription_ids(untouched);
            output.forward.insert(0, message);
        }

        output
    }
}

impl Stage for DepthTruncateStage {
    fn name(&self) -> &'static str {
        "depth_truncate"
    }

    fn on_outbound(&self, mut message: Message, ctx: &StageContext<'_>) -> Result<StageOutput> {
        match message.message_type() {
            MessageType::Reset => self.depths.lock().clear(),
            MessageType::MarketData => {
                let transaction_id = message.transaction_id();
                if let Some(request) = message.as_market_data_mut() {
                    if request.data_type != DataType::MarketDepth {
                        return Ok(StageOutput::forward(message));
                    }

                    if !request.is_subscribe {
                        self.depths.lock().remove(&request.original_transaction_id);
                    } else if let Some(requested) = request.max_depth {
                        let supported = ctx.adapter.nearest_supported_depth(requested);
                        if supported != requested {
                            request.max_depth = Some(supported);
                            self.depths.lock().insert(transaction_id, requested);
                            debug!(
                                transaction_id,
                                requested, supported, "Requesting supported depth tier"
                            );
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(StageOutput::forward(message))
    }

    fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
        match message.message_type() {
            MessageType::QuoteChange => self.truncate(message),
            MessageType::Reset => {
                self.depths.lock().clear();
                StageOutput::forward(message)
            }
            _ => StageOutput::forward(message),
        }
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(DepthTruncateStage::new())
    }
}
