//! # Lookup Tracking Stage
//!
//! ## Purpose
//!
//! Keeps at most one lookup per lookup type in flight. Further lookups of the same type wait
//! in a FIFO queue and are dispatched, as loop-back messages, once the head completes
//! (finished, online or an error response). Unsubscribing a queued lookup drops it before it
//! is ever sent; unsubscribing the head is passed on and its round trip runs to completion.
//!
//! ## Timeouts
//!
//! When the venue does not emit its own lookup result, each dispatched lookup gets a timeout.
//! Time is measured from the deltas between local timestamps of successive inbound messages,
//! so the periodic time message is what advances it on a quiet connection. An expired lookup
//! is completed with a synthesized `SubscriptionFinished`, indistinguishable from a real one.

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};
use trading_messages::{
    Message, MessageBody, MessageType, SubscriptionReply, SubscriptionResponse, TransactionId,
};

/// Default lookup timeout
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTrackingConfig {
    /// Zero disables timeouts
    pub timeout: Duration,
}

impl Default for LookupTrackingConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct LookupInfo {
    lookup_type: MessageType,
    timeout: Duration,
    left: Duration,
}

impl LookupInfo {
    fn new(lookup_type: MessageType, timeout: Duration) -> Self {
        Self {
            lookup_type,
            timeout,
            left: timeout,
        }
    }

    fn refresh(&mut self) {
        self.left = self.timeout;
    }

    /// Returns true once the lookup has expired
    fn process_time(&mut self, elapsed: Duration) -> bool {
        self.left = self.left.saturating_sub(elapsed);
        self.left.is_zero()
    }
}

#[derive(Debug, Default)]
struct LookupState {
    lookups: HashMap<TransactionId, LookupInfo>,
    queues: HashMap<MessageType, VecDeque<(TransactionId, Message)>>,
    prev_time: Option<DateTime<Utc>>,
}

impl LookupState {
    /// Remove a completed lookup and return the next one to dispatch, if any
    fn complete(&mut self, transaction_id: TransactionId) -> Option<Message> {
        let lookup_type = match self.lookups.remove(&transaction_id) {
            Some(info) => info.lookup_type,
            None => self
                .queues
                .iter()
                .find(|(_, queue)| queue.iter().any(|(tx, _)| *tx == transaction_id))
                .map(|(lookup_type, _)| *lookup_type)?,
        };
        self.advance(lookup_type, transaction_id)
    }

    fn advance(&mut self, lookup_type: MessageType, finished: TransactionId) -> Option<Message> {
        let queue = self.queues.get_mut(&lookup_type)?;
        let was_head = queue.front().map(|(tx, _)| *tx) == Some(finished);
        queue.retain(|(tx, _)| *tx != finished);

        let next = if was_head {
            queue.front().map(|(_, message)| message.clone())
        } else {
            None
        };

        if queue.is_empty() {
            self.queues.remove(&lookup_type);
        }
        next
    }

    /// Drop a lookup still waiting behind the head; false when it is in flight or unknown
    fn withdraw(&mut self, lookup_type: MessageType, transaction_id: TransactionId) -> bool {
        let Some(queue) = self.queues.get_mut(&lookup_type) else {
            return false;
        };
        match queue.iter().position(|(tx, _)| *tx == transaction_id) {
            Some(index) if index > 0 => {
                queue.remove(index);
                true
            }
            _ => false,
        }
    }
}

/// Serializes lookups per type and times out unanswered ones
#[derive(Debug, Default)]
pub struct LookupTrackingStage {
    config: LookupTrackingConfig,
    state: Mutex<LookupState>,
}

impl LookupTrackingStage {
    pub fn new(config: LookupTrackingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LookupState::default()),
        }
    }

    /// Lookups with an armed timeout
    pub fn in_flight(&self) -> usize {
        self.state.lock().lookups.len()
    }

    /// Lookups waiting behind the head of their queue
    pub fn queued(&self) -> usize {
        self.state
            .lock()
            .queues
            .values()
            .map(|queue| queue.len().saturating_sub(1))
            .sum()
    }

    fn is_terminal_reply(message: &Message) -> bool {
        match message.message_type() {
            MessageType::SubscriptionFinished | MessageType::SubscriptionOnline => true,
            MessageType::SubscriptionResponse => message.error().is_some(),
            _ => false,
        }
    }
}

impl Stage for LookupTrackingStage {
    fn name(&self) -> &'static str {
        "lookup_tracking"
    }

    fn on_outbound(&self, message: Message, ctx: &StageContext<'_>) -> Result<StageOutput> {
        let lookup_type = message.message_type();

        if lookup_type == MessageType::Reset {
            *self.state.lock() = LookupState::default();
            return Ok(StageOutput::forward(message));
        }

        if !lookup_type.is_lookup() {
            return Ok(StageOutput::forward(message));
        }

        if !message.is_subscribe() {
            let original = message.original_transaction_id();
            if !self.state.lock().withdraw(lookup_type, original) {
                return Ok(StageOutput::forward(message));
            }
            debug!(original, ?lookup_type, "Queued lookup withdrawn by unsubscribe");
            let response = Message::at(
                MessageBody::SubscriptionResponse(SubscriptionResponse::ok(
                    message.transaction_id(),
                )),
                message.local_time,
            );
            return Ok(StageOutput::reply(response));
        }

        if message
            .as_order_status()
            .is_some_and(|status| status.has_order_id())
        {
            return Ok(StageOutput::forward(message));
        }

        let transaction_id = message.transaction_id();
        let mut state = self.state.lock();
        let queue = state.queues.entry(lookup_type).or_default();

        if !queue.iter().any(|(tx, _)| *tx == transaction_id) {
            queue.push_back((transaction_id, message.clone()));
            if queue.len() > 1 {
                debug!(transaction_id, ?lookup_type, "Lookup queued behind in-flight request");
                return Ok(StageOutput::suppress());
            }
        } else if queue.front().map(|(tx, _)| *tx) != Some(transaction_id) {
            return Ok(StageOutput::suppress());
        }

        if !self.config.timeout.is_zero() && !ctx.adapter.is_result_message_supported(lookup_type)
        {
            state
                .lookups
                .insert(transaction_id, LookupInfo::new(lookup_type, self.config.timeout));
        }

        Ok(StageOutput::forward(message))
    }

    fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
        let mut state = self.state.lock();
        let local_time = message.local_time;

        if message.message_type() == MessageType::Reset {
            *state = LookupState::default();
            return StageOutput::forward(message);
        }

        let mut output = StageOutput::default();

        if Self::is_terminal_reply(&message) {
            if let Some(next) = state.complete(message.original_transaction_id()) {
                output.loop_back.push(next);
            }
        } else if !state.lookups.is_empty() {
            let mut referenced = message.subscription_ids();
            referenced.push(message.original_transaction_id());
            for id in referenced {
                if let Some(info) = state.lookups.get_mut(&id) {
                    info.refresh();
                }
            }
        }

        output.forward.push(message);

        let elapsed = state
            .prev_time
            .and_then(|prev| (local_time - prev).to_std().ok())
            .unwrap_or(Duration::ZERO);

        if !elapsed.is_zero() {
            let expired: Vec<(TransactionId, MessageType)> = state
                .lookups
                .iter_mut()
                .filter_map(|(tx, info)| {
                    info.process_time(elapsed)
                        .then_some((*tx, info.lookup_type))
                })
                .collect();

            for (transaction_id, lookup_type) in expired {
                state.lookups.remove(&transaction_id);
                info!(transaction_id, ?lookup_type, "Lookup timed out, completing locally");

                output.forward.push(Message::at(
                    MessageBody::SubscriptionFinished(SubscriptionReply::new(transaction_id)),
                    local_time,
                ));
                if let Some(next) = state.advance(lookup_type, transaction_id) {
                    output.loop_back.push(next);
                }
            }
        }

        if state.prev_time.map_or(true, |prev| local_time > prev) {
            state.prev_time = Some(local_time);
        }

        output
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(LookupTrackingStage::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVenue;
    use chrono::TimeZone;
    use trading_messages::{OrderStatus, PortfolioLookup, SecurityLookup};

    fn lookup(tx: TransactionId) -> Message {
        Message::new(MessageBody::SecurityLookup(SecurityLookup::new(tx)))
    }

    fn at(message: MessageBody, secs: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Message::at(message, base + chrono::Duration::seconds(secs))
    }

    #[test]
    fn test_second_lookup_waits_for_first() {
        let stage = LookupTrackingStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let first = stage.on_outbound(lookup(1), ctx).unwrap();
            assert_eq!(first.forward.len(), 1);

            let second = stage.on_outbound(lookup(2), ctx).unwrap();
            assert!(second.forward.is_empty());
            assert_eq!(stage.queued(), 1);

            let finished = Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(1)));
            let out = stage.on_inbound(finished, ctx);
            assert_eq!(out.loop_back.len(), 1);
            assert_eq!(out.loop_back[0].transaction_id(), 2);

            let dispatched = stage.on_outbound(out.loop_back[0].clone(), ctx).unwrap();
            assert_eq!(dispatched.forward.len(), 1);
        });
    }

    #[test]
    fn test_unsubscribe_withdraws_queued_lookup() {
        let stage = LookupTrackingStage::default();
        let venue = MockVenue::new();
        let portfolio_lookup =
            |tx| Message::new(MessageBody::PortfolioLookup(PortfolioLookup::new(tx)));

        venue.with_context(|ctx| {
            stage.on_outbound(portfolio_lookup(1), ctx).unwrap();
            stage.on_outbound(portfolio_lookup(2), ctx).unwrap();
            stage.on_outbound(portfolio_lookup(3), ctx).unwrap();

            let unsubscribe =
                Message::new(MessageBody::PortfolioLookup(PortfolioLookup::unsubscribe(4, 2)));
            let out = stage.on_outbound(unsubscribe, ctx).unwrap();
            assert!(out.forward.is_empty());
            let response = out.replies[0].as_subscription_response().unwrap();
            assert_eq!(response.original_transaction_id, 4);
            assert!(response.is_ok());
            assert_eq!(stage.queued(), 1);

            let finished = Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(1)));
            let out = stage.on_inbound(finished, ctx);
            let next: Vec<_> = out.loop_back.iter().map(|m| m.transaction_id()).collect();
            assert_eq!(next, vec![3]);
        });
    }

    #[test]
    fn test_unsubscribe_of_in_flight_lookup_is_forwarded() {
        let stage = LookupTrackingStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let status = Message::new(MessageBody::OrderStatus(OrderStatus::new(1)));
            stage.on_outbound(status, ctx).unwrap();

            let unsubscribe = Message::new(MessageBody::OrderStatus(OrderStatus::unsubscribe(2, 1)));
            let out = stage.on_outbound(unsubscribe, ctx).unwrap();
            assert_eq!(out.forward.len(), 1);
            assert_eq!(out.forward[0].original_transaction_id(), 1);
        });

        assert_eq!(stage.in_flight(), 1);
    }

    #[test]
    fn test_timeout_synthesizes_finished() {
        let stage = LookupTrackingStage::new(LookupTrackingConfig {
            timeout: Duration::from_secs(10),
        });
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(lookup(1), ctx).unwrap();

            stage.on_inbound(at(MessageBody::Time, 0), ctx);
            let out = stage.on_inbound(at(MessageBody::Time, 5), ctx);
            assert_eq!(out.forward.len(), 1);

            let out = stage.on_inbound(at(MessageBody::Time, 11), ctx);
            assert_eq!(out.forward.len(), 2);
            assert_eq!(out.forward[1].message_type(), MessageType::SubscriptionFinished);
            assert_eq!(out.forward[1].original_transaction_id(), 1);
        });

        assert_eq!(stage.in_flight(), 0);
    }

    #[test]
    fn test_no_timeout_when_venue_reports_results() {
        let stage = LookupTrackingStage::default();
        let venue = MockVenue::new().with_result_support(MessageType::SecurityLookup);

        venue.with_context(|ctx| {
            stage.on_outbound(lookup(1), ctx).unwrap();
        });

        assert_eq!(stage.in_flight(), 0);
    }

    #[test]
    fn test_related_message_refreshes_timeout() {
        let stage = LookupTrackingStage::new(LookupTrackingConfig {
            timeout: Duration::from_secs(10),
        });
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(lookup(1), ctx).unwrap();
            stage.on_inbound(at(MessageBody::Time, 0), ctx);
            stage.on_inbound(at(MessageBody::Time, 8), ctx);

            let mut definition = trading_messages::SecurityDefinition::default();
            definition.original_transaction_id = 1;
            stage.on_inbound(at(MessageBody::Security(definition), 9), ctx);

            let out = stage.on_inbound(at(MessageBody::Time, 15), ctx);
            assert_eq!(out.forward.len(), 1);
        });

        assert_eq!(stage.in_flight(), 1);
    }
}
