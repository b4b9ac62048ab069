//! # Offline Buffering Stage
//!
//! ## Purpose
//!
//! Holds outbound traffic while the venue connection is down and replays it, in submission
//! order, once the connection comes back. Commands that cancel each other out while still
//! buffered never reach the venue.
//!
//! ## Buffering Rules (while disconnected)
//!
//! - registration: buffered, remembered by transaction id
//! - cancel of a buffered registration: both dropped, a local `Done` execution is replied
//! - replace of a buffered registration: the registration is rewritten in place and the
//!   replaced order gets a local `Done`
//! - market data / portfolio subscribe: buffered; a matching unsubscribe removes both
//! - time: dropped unless forced
//! - anything else: buffered (`OfflineMode::None`), passed (`Force`) or answered with a
//!   negative response (`Cancel`)
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──Connect ok / ReconnectingFinished──► Connected (buffer drained as loop-back)
//! Connected ──Disconnect / ReconnectingStarted──► Disconnected
//! ```

use crate::error::{PipelineError, Result};
use crate::stage::{Stage, StageContext, StageOutput};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use trading_messages::{
    ExecutionMessage, Message, MessageBody, MessageType, OfflineMode, OrderReplace, OrderState,
    SubscriptionResponse, TransactionId,
};

/// Default number of messages held while offline
pub const DEFAULT_OFFLINE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Maximum buffered messages, `None` for unbounded
    pub capacity: Option<usize>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_OFFLINE_CAPACITY),
        }
    }
}

impl OfflineConfig {
    pub fn unbounded() -> Self {
        Self { capacity: None }
    }
}

#[derive(Debug, Default, Clone)]
struct OfflineState {
    connected: bool,
    pending: Vec<Message>,
    pending_registrations: HashSet<TransactionId>,
    pending_subscriptions: HashSet<(MessageType, TransactionId)>,
}

impl OfflineState {
    fn store(&mut self, capacity: Option<usize>, message: Message) -> Result<()> {
        if let Some(capacity) = capacity {
            if self.pending.len() >= capacity {
                return Err(PipelineError::BufferFull { capacity });
            }
        }
        self.pending.push(message);
        Ok(())
    }

    fn remove_pending(&mut self, message_type: MessageType, transaction_id: TransactionId) {
        self.pending.retain(|m| {
            !(m.message_type() == message_type && m.transaction_id() == transaction_id)
        });
    }

    fn position_of(
        &self,
        message_type: MessageType,
        transaction_id: TransactionId,
    ) -> Option<usize> {
        self.pending.iter().position(|m| {
            m.message_type() == message_type && m.transaction_id() == transaction_id
        })
    }
}

/// Buffers outbound messages while the venue is unreachable
#[derive(Debug)]
pub struct OfflineStage {
    config: OfflineConfig,
    state: Mutex<OfflineState>,
}

impl OfflineStage {
    pub fn new(config: OfflineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(OfflineState::default()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn done_reply(template: &Message, replace_or_cancel: DoneTarget) -> Message {
        let exec = ExecutionMessage::order_reply(
            replace_or_cancel.security_id,
            replace_or_cancel.original_transaction_id,
            template.local_time,
        )
        .with_state(OrderState::Done)
        .with_portfolio(replace_or_cancel.portfolio_name);

        Message::at(MessageBody::Execution(exec), template.local_time)
    }

    fn buffer_replace(
        &self,
        state: &mut OfflineState,
        message: Message,
        replace: OrderReplace,
    ) -> Result<StageOutput> {
        if !state
            .pending_registrations
            .contains(&replace.old_transaction_id)
        {
            state.store(self.config.capacity, message)?;
            return Ok(StageOutput::suppress());
        }

        let new_transaction_id = replace.transaction_id();
        let register = Message::at(
            MessageBody::OrderRegister(replace.new_order.clone()),
            message.local_time,
        )
        .with_offline_mode(message.offline_mode);

        match state.position_of(MessageType::OrderRegister, replace.old_transaction_id) {
            Some(index) => state.pending[index] = register,
            None => state.store(self.config.capacity, register)?,
        }

        state
            .pending_registrations
            .remove(&replace.old_transaction_id);
        state.pending_registrations.insert(new_transaction_id);

        debug!(
            old_transaction_id = replace.old_transaction_id,
            new_transaction_id, "Buffered registration replaced in place"
        );

        let done = Self::done_reply(
            &message,
            DoneTarget {
                security_id: replace.new_order.security_id.clone(),
                portfolio_name: replace.new_order.portfolio_name.clone(),
                original_transaction_id: replace.old_transaction_id,
            },
        );
        Ok(StageOutput::reply(done))
    }

    fn buffer_subscription(&self, state: &mut OfflineState, message: Message) -> Result<StageOutput> {
        let message_type = message.message_type();

        if message.is_subscribe() {
            let transaction_id = message.transaction_id();
            state.store(self.config.capacity, message)?;
            state
                .pending_subscriptions
                .insert((message_type, transaction_id));
            return Ok(StageOutput::suppress());
        }

        let subscription_id = message.original_transaction_id();
        if state
            .pending_subscriptions
            .remove(&(message_type, subscription_id))
        {
            state.remove_pending(message_type, subscription_id);
            debug!(subscription_id, "Buffered subscription cancelled by unsubscribe");
        } else {
            state.store(self.config.capacity, message)?;
        }

        Ok(StageOutput::suppress())
    }

    fn drain(state: &mut OfflineState) -> Vec<Message> {
        state.connected = true;
        state.pending_registrations.clear();
        state.pending_subscriptions.clear();
        let drained = std::mem::take(&mut state.pending);
        if !drained.is_empty() {
            info!(count = drained.len(), "Replaying messages buffered while offline");
        }
        drained
    }
}

struct DoneTarget {
    security_id: trading_messages::SecurityId,
    portfolio_name: String,
    original_transaction_id: TransactionId,
}

impl Default for OfflineStage {
    fn default() -> Self {
        Self::new(OfflineConfig::default())
    }
}

impl Stage for OfflineStage {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn on_outbound(&self, message: Message, _ctx: &StageContext<'_>) -> Result<StageOutput> {
        let mut state = self.state.lock();

        match message.message_type() {
            MessageType::Reset => {
                *state = OfflineState::default();
                return Ok(StageOutput::forward(message));
            }
            MessageType::Connect
            | MessageType::Disconnect
            | MessageType::ReconnectingStarted
            | MessageType::ReconnectingFinished => return Ok(StageOutput::forward(message)),
            _ => {}
        }

        if state.connected {
            return Ok(StageOutput::forward(message));
        }

        match message.body() {
            MessageBody::Time => {
                if message.offline_mode == OfflineMode::Force {
                    Ok(StageOutput::forward(message))
                } else {
                    Ok(StageOutput::suppress())
                }
            }
            MessageBody::OrderRegister(register) => {
                let transaction_id = register.transaction_id;
                state.store(self.config.capacity, message)?;
                state.pending_registrations.insert(transaction_id);
                Ok(StageOutput::suppress())
            }
            MessageBody::OrderCancel(cancel) => {
                if !state
                    .pending_registrations
                    .remove(&cancel.original_transaction_id)
                {
                    state.store(self.config.capacity, message)?;
                    return Ok(StageOutput::suppress());
                }

                state.remove_pending(MessageType::OrderRegister, cancel.original_transaction_id);
                debug!(
                    transaction_id = cancel.original_transaction_id,
                    "Buffered registration cancelled before sending"
                );

                let done = Self::done_reply(
                    &message,
                    DoneTarget {
                        security_id: cancel.security_id.clone(),
                        portfolio_name: cancel.portfolio_name.clone(),
                        original_transaction_id: cancel.transaction_id,
                    },
                );
                Ok(StageOutput::reply(done))
            }
            MessageBody::OrderReplace(replace) => {
                let replace = replace.clone();
                self.buffer_replace(&mut state, message, replace)
            }
            MessageBody::OrderPairReplace(pair) => {
                // both halves land or neither does
                let halves = [pair.first.clone(), pair.second.clone()];
                let mut staged = state.clone();
                let mut output = StageOutput::suppress();
                for half in halves {
                    let half_message =
                        Message::at(MessageBody::OrderReplace(half.clone()), message.local_time)
                            .with_offline_mode(message.offline_mode);
                    let result = self.buffer_replace(&mut staged, half_message, half)?;
                    output.replies.extend(result.replies);
                }
                *state = staged;
                Ok(output)
            }
            MessageBody::MarketData(_) | MessageBody::Portfolio(_) => {
                self.buffer_subscription(&mut state, message)
            }
            _ => match message.offline_mode {
                OfflineMode::None => {
                    state.store(self.config.capacity, message)?;
                    Ok(StageOutput::suppress())
                }
                OfflineMode::Force => Ok(StageOutput::forward(message)),
                OfflineMode::Cancel => {
                    let transaction_id = message.transaction_id();
                    if transaction_id == 0 {
                        return Ok(StageOutput::suppress());
                    }
                    let reply = Message::at(
                        MessageBody::SubscriptionResponse(SubscriptionResponse::failed(
                            transaction_id,
                            "venue is offline",
                        )),
                        message.local_time,
                    );
                    Ok(StageOutput::reply(reply))
                }
            },
        }
    }

    fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
        let mut state = self.state.lock();

        match message.message_type() {
            MessageType::Connect | MessageType::ReconnectingFinished => {
                if message.error().is_some() {
                    return StageOutput::forward(message);
                }
                let drained = Self::drain(&mut state);
                StageOutput {
                    forward: vec![message],
                    replies: Vec::new(),
                    loop_back: drained,
                }
            }
            MessageType::Disconnect => {
                state.connected = false;
                StageOutput::forward(message)
            }
            MessageType::ReconnectingStarted => {
                state.connected = false;
                info!("Venue reconnecting, buffering outbound messages");
                StageOutput::suppress()
            }
            MessageType::Reset => {
                *state = OfflineState::default();
                StageOutput::forward(message)
            }
            _ => StageOutput::forward(message),
        }
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(OfflineStage::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVenue;
    use rust_decimal_macros::dec;
    use trading_messages::{
        ConnectionReply, DataType, MarketDataRequest, OrderCancel, OrderPairReplace,
        OrderRegister, SecurityId, Side,
    };

    fn security() -> SecurityId {
        SecurityId::new("SBER", "TQBR")
    }

    fn register(tx: TransactionId) -> Message {
        Message::new(MessageBody::OrderRegister(OrderRegister::new(
            tx,
            security(),
            "acc",
            Side::Buy,
            dec!(100),
            dec!(1),
        )))
    }

    fn cancel(tx: TransactionId, order_tx: TransactionId) -> Message {
        Message::new(MessageBody::OrderCancel(OrderCancel::new(
            tx,
            order_tx,
            security(),
            "acc",
        )))
    }

    #[test]
    fn test_cancel_of_buffered_registration_replies_done() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let out = stage.on_outbound(register(1), ctx).unwrap();
            assert!(out.is_empty());

            let out = stage.on_outbound(cancel(2, 1), ctx).unwrap();
            assert!(out.forward.is_empty());
            assert_eq!(out.replies.len(), 1);

            let exec = out.replies[0].as_execution().unwrap();
            assert_eq!(exec.order_state, Some(OrderState::Done));
            assert_eq!(exec.original_transaction_id, 2);
        });

        assert_eq!(stage.pending_count(), 0);
    }

    #[test]
    fn test_reconnect_drains_in_order() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            stage.on_outbound(register(2), ctx).unwrap();

            let connect = Message::new(MessageBody::Connect(ConnectionReply::ok()));
            let out = stage.on_inbound(connect, ctx);

            assert_eq!(out.forward.len(), 1);
            let drained: Vec<_> = out.loop_back.iter().map(|m| m.transaction_id()).collect();
            assert_eq!(drained, vec![1, 2]);
        });

        assert!(stage.is_connected());
        assert_eq!(stage.pending_count(), 0);
    }

    #[test]
    fn test_failed_connect_keeps_buffer() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            let failed = Message::new(MessageBody::Connect(ConnectionReply::failed("refused")));
            let out = stage.on_inbound(failed, ctx);
            assert!(out.loop_back.is_empty());
        });

        assert!(!stage.is_connected());
        assert_eq!(stage.pending_count(), 1);
    }

    #[test]
    fn test_replace_rewrites_registration_in_place() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            stage.on_outbound(register(5), ctx).unwrap();

            let new_order =
                OrderRegister::new(3, security(), "acc", Side::Buy, dec!(101), dec!(1));
            let replace = Message::new(MessageBody::OrderReplace(OrderReplace::new(1, new_order)));
            let out = stage.on_outbound(replace, ctx).unwrap();

            let done = out.replies[0].as_execution().unwrap();
            assert_eq!(done.original_transaction_id, 1);

            let connect = Message::new(MessageBody::Connect(ConnectionReply::ok()));
            let out = stage.on_inbound(connect, ctx);
            let drained: Vec<_> = out
                .loop_back
                .iter()
                .map(|m| (m.message_type(), m.transaction_id()))
                .collect();
            assert_eq!(
                drained,
                vec![
                    (MessageType::OrderRegister, 3),
                    (MessageType::OrderRegister, 5)
                ]
            );
        });
    }

    #[test]
    fn test_subscribe_unsubscribe_cancel_out() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let subscribe = MarketDataRequest::subscribe(10, security(), DataType::Ticks);
            stage
                .on_outbound(Message::new(MessageBody::MarketData(subscribe)), ctx)
                .unwrap();

            let unsubscribe = MarketDataRequest::unsubscribe(11, 10, security(), DataType::Ticks);
            stage
                .on_outbound(Message::new(MessageBody::MarketData(unsubscribe)), ctx)
                .unwrap();
        });

        assert_eq!(stage.pending_count(), 0);
    }

    #[test]
    fn test_buffer_full_rejects_only_new_message() {
        let stage = OfflineStage::new(OfflineConfig { capacity: Some(2) });
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            stage.on_outbound(register(2), ctx).unwrap();

            let err = stage.on_outbound(register(3), ctx).unwrap_err();
            assert_eq!(err, PipelineError::BufferFull { capacity: 2 });
            assert!(err.is_recoverable());
        });

        assert_eq!(stage.pending_count(), 2);
    }

    #[test]
    fn test_rejected_pair_replace_leaves_buffer_untouched() {
        let stage = OfflineStage::new(OfflineConfig { capacity: Some(1) });
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();

            let pair = OrderPairReplace {
                first: OrderReplace::new(
                    1,
                    OrderRegister::new(10, security(), "acc", Side::Buy, dec!(101), dec!(1)),
                ),
                second: OrderReplace::new(
                    99,
                    OrderRegister::new(11, security(), "acc", Side::Sell, dec!(105), dec!(1)),
                ),
            };
            let err = stage
                .on_outbound(Message::new(MessageBody::OrderPairReplace(pair)), ctx)
                .unwrap_err();
            assert_eq!(err, PipelineError::BufferFull { capacity: 1 });
            assert_eq!(stage.pending_count(), 1);

            let connect = Message::new(MessageBody::Connect(ConnectionReply::ok()));
            let out = stage.on_inbound(connect, ctx);
            let drained: Vec<_> = out
                .loop_back
                .iter()
                .map(|m| (m.message_type(), m.transaction_id()))
                .collect();
            assert_eq!(drained, vec![(MessageType::OrderRegister, 1)]);
        });
    }

    #[test]
    fn test_pair_replace_of_buffered_registrations() {
        let stage = OfflineStage::new(OfflineConfig { capacity: Some(2) });
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            stage.on_outbound(register(2), ctx).unwrap();

            let pair = OrderPairReplace {
                first: OrderReplace::new(
                    1,
                    OrderRegister::new(10, security(), "acc", Side::Buy, dec!(101), dec!(1)),
                ),
                second: OrderReplace::new(
                    2,
                    OrderRegister::new(11, security(), "acc", Side::Buy, dec!(102), dec!(1)),
                ),
            };
            let out = stage
                .on_outbound(Message::new(MessageBody::OrderPairReplace(pair)), ctx)
                .unwrap();
            let done: Vec<_> = out
                .replies
                .iter()
                .map(|m| m.original_transaction_id())
                .collect();
            assert_eq!(done, vec![1, 2]);
        });

        assert_eq!(stage.pending_count(), 2);
    }

    #[test]
    fn test_time_dropped_unless_forced() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let out = stage
                .on_outbound(Message::new(MessageBody::Time), ctx)
                .unwrap();
            assert!(out.is_empty());

            let forced = Message::new(MessageBody::Time).with_offline_mode(OfflineMode::Force);
            let out = stage.on_outbound(forced, ctx).unwrap();
            assert_eq!(out.forward.len(), 1);
        });

        assert_eq!(stage.pending_count(), 0);
    }

    #[test]
    fn test_cancel_mode_replies_negative_result() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let lookup = Message::new(MessageBody::SecurityLookup(
                trading_messages::SecurityLookup::new(7),
            ))
            .with_offline_mode(OfflineMode::Cancel);
            let out = stage.on_outbound(lookup, ctx).unwrap();

            assert!(out.forward.is_empty());
            let response = out.replies[0].as_subscription_response().unwrap();
            assert_eq!(response.original_transaction_id, 7);
            assert!(!response.is_ok());
        });
    }

    #[test]
    fn test_reset_clears_buffer() {
        let stage = OfflineStage::default();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_outbound(register(1), ctx).unwrap();
            stage
                .on_outbound(Message::new(MessageBody::Reset), ctx)
                .unwrap();
        });

        assert_eq!(stage.pending_count(), 0);
    }
}
