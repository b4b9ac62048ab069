//! # Partial Download Stage
//!
//! ## Purpose
//!
//! Splits ranged history requests into windows no larger than the venue's maximum step for
//! the data type. One window is in flight at a time; the caller sees a single subscription
//! lifecycle under its own transaction id no matter how many windows were needed.
//!
//! ## Window Flow
//!
//! ```text
//! subscribe [from, to] ──► window 1 (new tx) ──► finished ──► loop-back trigger
//!                          window 2 (new tx) ──► finished ──► loop-back trigger
//!                          ...
//!                          window N (new tx) ──► finished (remapped to original tx)
//! ```
//!
//! Unbounded requests (`to` absent) continue as a live subscription under the original
//! transaction id once history up to the request time has been read.

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use trading_messages::{
    DataType, Message, MessageBody, MessageType, SubscriptionReply, SubscriptionResponse,
    TransactionId, TransactionIdGenerator,
};

#[derive(Debug)]
struct DownloadInfo {
    origin: Message,
    step: Duration,
    current_from: DateTime<Utc>,
    next_from: DateTime<Utc>,
    to: DateTime<Utc>,
    is_bounded: bool,
    first_iteration: bool,
    reply_received: bool,
    unsubscribe_id: Option<TransactionId>,
}

impl DownloadInfo {
    fn new(origin: Message, step: Duration, from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Self {
        let is_bounded = to.is_some();
        let to = to.unwrap_or(origin.local_time);
        Self {
            origin,
            step,
            current_from: from,
            next_from: from,
            to,
            is_bounded,
            first_iteration: true,
            reply_received: false,
            unsubscribe_id: None,
        }
    }

    fn last_iteration(&self) -> bool {
        self.is_bounded && self.next_from >= self.to
    }

    fn try_update_next_from(&mut self, time: DateTime<Utc>) {
        if time > self.next_from {
            self.next_from = time;
        }
    }

    /// Next window request, or the live continuation once history is exhausted
    fn init_next(&mut self, ids: &TransactionIdGenerator) -> Message {
        if self.first_iteration {
            self.first_iteration = false;
        } else {
            if self.next_from >= self.to {
                let mut live = self.origin.clone();
                live.set_range(None, None);
                return live;
            }
            self.current_from = self.next_from;
        }

        let window_end = chrono::Duration::from_std(self.step)
            .ok()
            .and_then(|step| self.current_from.checked_add_signed(step))
            .map_or(self.to, |end| end.min(self.to));
        self.next_from = window_end;

        let mut window = self.origin.clone();
        window.set_transaction_id(ids.next_id());
        window.set_range(Some(self.current_from), Some(window_end));
        window
    }
}

#[derive(Debug, Default)]
struct PartialState {
    downloads: HashMap<TransactionId, DownloadInfo>,
    /// window transaction id → original transaction id
    partial_requests: HashMap<TransactionId, TransactionId>,
    /// live transaction id → whether it continues a history download
    live_requests: HashMap<TransactionId, bool>,
}

impl PartialState {
    fn forget(&mut self, original: TransactionId) {
        self.downloads.remove(&original);
        self.partial_requests.retain(|_, origin| *origin != original);
    }
}

/// Splits ranged requests into venue-sized windows
#[derive(Debug, Default)]
pub struct PartialDownloadStage {
    state: Mutex<PartialState>,
}

impl PartialDownloadStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downloads currently being iterated
    pub fn active_downloads(&self) -> usize {
        self.state.lock().downloads.len()
    }

    fn data_type_of(message: &Message) -> DataType {
        match message.body() {
            MessageBody::MarketData(request) => request.data_type,
            MessageBody::PortfolioLookup(_) => DataType::Positions,
            _ => DataType::Transactions,
        }
    }

    fn finished(original: TransactionId, template: &Message) -> Message {
        Message::at(
            MessageBody::SubscriptionFinished(SubscriptionReply::new(original)),
            template.local_time,
        )
    }

    fn process_ranged(&self, mut message: Message, ctx: &StageContext<'_>) -> StageOutput {
        let mut state = self.state.lock();
        let transaction_id = message.transaction_id();

        if !message.is_subscribe() {
            let subscription_id = message.original_transaction_id();
            if let Some(info) = state.downloads.get_mut(&subscription_id) {
                info.unsubscribe_id = Some(transaction_id);
                debug!(subscription_id, "Unsubscribe deferred until current window completes");
                return StageOutput::suppress();
            }
            state.live_requests.remove(&subscription_id);
            return StageOutput::forward(message);
        }

        if message
            .as_order_status()
            .is_some_and(|status| status.has_order_id())
        {
            return StageOutput::forward(message);
        }

        let Some((from, to)) = message.range() else {
            return StageOutput::forward(message);
        };

        if from.is_none() && to.is_none() {
            state.live_requests.insert(transaction_id, false);
            return StageOutput::forward(message);
        }

        let step = ctx.adapter.history_step_size(Self::data_type_of(&message));

        if step.is_zero() {
            if to.is_some() {
                debug!(transaction_id, "History unavailable, finishing bounded request");
                let finished = Self::finished(transaction_id, &message);
                return StageOutput::reply(finished);
            }
            message.set_range(None, None);
            state.live_requests.insert(transaction_id, false);
            return StageOutput::forward(message);
        }

        let Some(from) = from else {
            return StageOutput::forward(message);
        };

        let mut info = DownloadInfo::new(message, step, from, to);
        let window = info.init_next(ctx.ids);

        info!(
            transaction_id,
            window_transaction_id = window.transaction_id(),
            step_secs = step.as_secs(),
            "Partial download started"
        );

        state
            .partial_requests
            .insert(window.transaction_id(), transaction_id);
        state.downloads.insert(transaction_id, info);

        StageOutput::forward(window)
    }

    fn process_next_window(&self, message: Message, ctx: &StageContext<'_>) -> StageOutput {
        let mut state = self.state.lock();
        let original = message.original_transaction_id();

        let Some(info) = state.downloads.get_mut(&original) else {
            return StageOutput::suppress();
        };

        if let Some(unsubscribe_id) = info.unsubscribe_id {
            state.forget(original);
            debug!(original, unsubscribe_id, "Partial download stopped by unsubscribe");
            let response = Message::at(
                MessageBody::SubscriptionResponse(SubscriptionResponse::ok(unsubscribe_id)),
                message.local_time,
            );
            return StageOutput::reply(response);
        }

        let next = info.init_next(ctx.ids);

        if next.range() == Some((None, None)) {
            state.forget(original);
            state.live_requests.insert(original, true);
            info!(transaction_id = original, "History complete, switching to live");
        } else {
            state
                .partial_requests
                .insert(next.transaction_id(), original);
        }

        StageOutput::forward(next)
    }

    fn process_response(&self, mut message: Message, ctx: &StageContext<'_>) -> StageOutput {
        let mut state = self.state.lock();
        let id = message.original_transaction_id();
        let is_ok = message.error().is_none();

        if let Some(is_partial) = state.live_requests.remove(&id) {
            if !is_ok || ctx.adapter.is_out_message_supported(MessageType::SubscriptionOnline) {
                return StageOutput::forward(message);
            }

            let online = Message::at(
                MessageBody::SubscriptionOnline(SubscriptionReply::new(id)),
                message.local_time,
            );
            if is_partial {
                return StageOutput::forward(online);
            }
            return StageOutput {
                forward: vec![message, online],
                ..Default::default()
            };
        }

        let Some(&original) = state.partial_requests.get(&id) else {
            return StageOutput::forward(message);
        };

        message.set_original_transaction_id(original);

        if !is_ok {
            state.forget(original);
            return StageOutput::forward(message);
        }

        match state.downloads.get_mut(&original) {
            Some(info) if info.reply_received => StageOutput::suppress(),
            Some(info) => {
                info.reply_received = true;
                StageOutput::forward(message)
            }
            None => StageOutput::forward(message),
        }
    }

    fn process_finished(&self, mut message: Message) -> StageOutput {
        let mut state = self.state.lock();
        let id = message.original_transaction_id();

        let Some(original) = state.partial_requests.remove(&id) else {
            return StageOutput::forward(message);
        };

        let last = state
            .downloads
            .get(&original)
            .map_or(true, |info| info.last_iteration());

        if last {
            state.downloads.remove(&original);
            message.set_original_transaction_id(original);
            info!(transaction_id = original, "Partial download finished");
            return StageOutput::forward(message);
        }

        let trigger = Message::at(
            MessageBody::PartialDownload(SubscriptionReply::new(original)),
            message.local_time,
        );
        StageOutput::suppress().with_loop_back(trigger)
    }

    fn process_data(&self, mut message: Message) -> StageOutput {
        let mut state = self.state.lock();
        if state.partial_requests.is_empty() {
            return StageOutput::forward(message);
        }

        let server_time = message.server_time();
        let mut remapped = false;
        let ids: Vec<TransactionId> = message
            .subscription_ids()
            .into_iter()
            .map(|id| match state.partial_requests.get(&id).copied() {
                Some(original) => {
                    remapped = true;
                    if let (Some(info), Some(time)) =
                        (state.downloads.get_mut(&original), server_time)
                    {
                        info.try_update_next_from(time);
                    }
                    original
                }
                None => id,
            })
            .collect();

        if remapped {
            if let Some(&original) = state.partial_requests.get(&message.original_transaction_id())
            {
                message.set_original_transaction_id(original);
            }
            message.set_subscription_ids(ids);
        }

        StageOutput::forward(message)
    }
}

impl Stage for PartialDownloadStage {
    fn name(&self) -> &'static str {
        "partial_download"
    }

    fn on_outbound(&self, message: Message, ctx: &StageContext<'_>) -> Result<StageOutput> {
        let output = match message.message_type() {
            MessageType::Reset => {
                *self.state.lock() = PartialState::default();
                StageOutput::forward(message)
            }
            MessageType::MarketData | MessageType::OrderStatus | MessageType::PortfolioLookup => {
                self.process_ranged(message, ctx)
            }
            MessageType::PartialDownload => self.process_next_window(message, ctx),
            _ => StageOutput::forward(message),
        };
        Ok(output)
    }

    fn on_inbound(&self, message: Message, ctx: &StageContext<'_>) -> StageOutput {
        match message.message_type() {
            MessageType::Reset | MessageType::Disconnect => {
                *self.state.lock() = PartialState::default();
                StageOutput::forward(message)
            }
            MessageType::SubscriptionResponse => self.process_response(message, ctx),
            MessageType::SubscriptionFinished => self.process_finished(message),
            t if t.is_data() => self.process_data(message),
            _ => StageOutput::forward(message),
        }
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(PartialDownloadStage::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVenue;
    use chrono::TimeZone;
    use trading_messages::{MarketDataRequest, PortfolioLookup, SecurityId};

    fn ticks_request(tx: TransactionId, hours: i64) -> Message {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = from + chrono::Duration::hours(hours);
        let request = MarketDataRequest::subscribe(tx, SecurityId::new("ES", "CME"), DataType::Ticks)
            .with_range(Some(from), Some(to));
        Message::new(MessageBody::MarketData(request))
    }

    #[test]
    fn test_zero_step_finishes_bounded_request() {
        let stage = PartialDownloadStage::new();
        let venue = MockVenue::new().with_history_step(DataType::Ticks, Duration::ZERO);

        venue.with_context(|ctx| {
            let out = stage.on_outbound(ticks_request(5, 3), ctx).unwrap();
            assert!(out.forward.is_empty());
            assert_eq!(out.replies[0].message_type(), MessageType::SubscriptionFinished);
            assert_eq!(out.replies[0].original_transaction_id(), 5);
        });
    }

    #[test]
    fn test_zero_step_degrades_unbounded_to_live() {
        let stage = PartialDownloadStage::new();
        let venue = MockVenue::new().with_history_step(DataType::Ticks, Duration::ZERO);

        venue.with_context(|ctx| {
            let mut request = ticks_request(5, 3);
            let from = request.range().and_then(|(from, _)| from);
            request.set_range(from, None);

            let out = stage.on_outbound(request, ctx).unwrap();
            assert_eq!(out.forward[0].range(), Some((None, None)));
            assert_eq!(out.forward[0].transaction_id(), 5);
        });
    }

    #[test]
    fn test_first_window_gets_new_transaction_id() {
        let stage = PartialDownloadStage::new();
        let venue = MockVenue::new().with_history_step(DataType::Ticks, Duration::from_secs(3600));

        venue.with_context(|ctx| {
            let out = stage.on_outbound(ticks_request(5, 3), ctx).unwrap();
            let window = &out.forward[0];

            assert_ne!(window.transaction_id(), 5);
            let (from, to) = window.range().unwrap();
            assert_eq!(to.unwrap() - from.unwrap(), chrono::Duration::hours(1));
        });

        assert_eq!(stage.active_downloads(), 1);
    }

    #[test]
    fn test_unsubscribe_of_ranged_portfolio_lookup_stops_after_window() {
        let stage = PartialDownloadStage::new();
        let venue =
            MockVenue::new().with_history_step(DataType::Positions, Duration::from_secs(3600));

        venue.with_context(|ctx| {
            let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let lookup = PortfolioLookup::new(5)
                .with_range(Some(from), Some(from + chrono::Duration::hours(3)));
            let out = stage
                .on_outbound(Message::new(MessageBody::PortfolioLookup(lookup)), ctx)
                .unwrap();
            let window_tx = out.forward[0].transaction_id();

            let unsubscribe =
                Message::new(MessageBody::PortfolioLookup(PortfolioLookup::unsubscribe(9, 5)));
            let out = stage.on_outbound(unsubscribe, ctx).unwrap();
            assert!(out.is_empty());

            let finished =
                Message::new(MessageBody::SubscriptionFinished(SubscriptionReply::new(window_tx)));
            let out = stage.on_inbound(finished, ctx);
            assert!(out.forward.is_empty());
            assert_eq!(out.loop_back.len(), 1);

            let out = stage.on_outbound(out.loop_back[0].clone(), ctx).unwrap();
            assert!(out.forward.is_empty());
            let response = out.replies[0].as_subscription_response().unwrap();
            assert_eq!(response.original_transaction_id, 9);
        });

        assert_eq!(stage.active_downloads(), 0);
    }

    #[test]
    fn test_duplicate_window_responses_are_suppressed() {
        let stage = PartialDownloadStage::new();
        let venue = MockVenue::new().with_history_step(DataType::Ticks, Duration::from_secs(3600));

        venue.with_context(|ctx| {
            let out = stage.on_outbound(ticks_request(5, 3), ctx).unwrap();
            let window_tx = out.forward[0].transaction_id();

            let response = Message::new(MessageBody::SubscriptionResponse(
                SubscriptionResponse::ok(window_tx),
            ));
            let first = stage.on_inbound(response.clone(), ctx);
            assert_eq!(first.forward[0].original_transaction_id(), 5);

            let second = stage.on_inbound(response, ctx);
            assert!(second.forward.is_empty());
        });
    }
}
