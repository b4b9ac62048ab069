//! Level1 → one-level order book synthesis
//!
//! For securities without a native depth feed, best bid/ask level1 fields are turned into a
//! single-level `QuoteChange` (flagged `is_by_level1`). The synthetic book is emitted ahead of
//! the level1 message that produced it and only when a best price or volume actually changed.
//! The first native book seen for a security switches synthesis off until `Reset`.

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use trading_messages::{
    Level1Change, Level1Field, Message, MessageBody, MessageType, QuoteChange, QuoteLevel,
    SecurityId,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BestQuotes {
    bid_price: Option<Decimal>,
    bid_volume: Option<Decimal>,
    ask_price: Option<Decimal>,
    ask_volume: Option<Decimal>,
}

#[derive(Debug, Default)]
struct Level1DepthBuilder {
    has_depth: bool,
    current: BestQuotes,
}

impl Level1DepthBuilder {
    fn process(&mut self, level1: &Level1Change) -> Option<QuoteChange> {
        if self.has_depth || !level1.has_best_quotes() {
            return None;
        }

        let next = BestQuotes {
            bid_price: level1.get(Level1Field::BestBidPrice).or(self.current.bid_price),
            bid_volume: level1.get(Level1Field::BestBidVolume).or(self.current.bid_volume),
            ask_price: level1.get(Level1Field::BestAskPrice).or(self.current.ask_price),
            ask_volume: level1.get(Level1Field::BestAskVolume).or(self.current.ask_volume),
        };

        if next == self.current {
            return None;
        }
        self.current = next;

        let level = |price: Option<Decimal>, volume: Option<Decimal>| {
            price
                .map(|price| QuoteLevel::new(price, volume.unwrap_or_default()))
                .into_iter()
                .collect::<Vec<_>>()
        };

        let mut quote = QuoteChange::new(
            level1.security_id.clone(),
            level1.server_time,
            level(next.bid_price, next.bid_volume),
            level(next.ask_price, next.ask_volume),
        );
        quote.is_by_level1 = true;
        quote.original_transaction_id = level1.original_transaction_id;
        quote.subscription_ids = level1.subscription_ids.clone();
        Some(quote)
    }
}

#[derive(Debug, Default)]
pub struct Level1DepthStage {
    builders: Mutex<HashMap<SecurityId, Level1DepthBuilder>>,
}

impl Level1DepthStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a native book has been observed for the security
    pub fn has_native_depth(&self, security_id: &SecurityId) -> bool {
        self.builders
            .lock()
            .get(security_id)
            .is_some_and(|builder| builder.has_depth)
    }
}

impl Stage for Level1DepthStage {
    fn name(&self) -> &'static str {
        "level1_depth"
    }

    fn on_outbound(&self, message: Message, _ctx: &StageContext<'_>) -> Result<StageOutput> {
        if message.message_type() == MessageType::Reset {
            self.builders.lock().clear();
        }
        Ok(StageOutput::forward(message))
    }

    fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
        match message.body() {
            MessageBody::Reset => {
                self.builders.lock().clear();
                StageOutput::forward(message)
            }
            MessageBody::QuoteChange(quote) if !quote.is_by_level1 => {
                self.builders
                    .lock()
                    .entry(quote.security_id.clone())
                    .or_default()
                    .has_depth = true;
                StageOutput::forward(message)
            }
            MessageBody::Level1Change(level1) => {
                let synthetic = self
                    .builders
                    .lock()
                    .entry(level1.security_id.clone())
                    .or_default()
                    .process(level1);

                match synthetic {
                    Some(quote) => {
                        let book = Message::at(MessageBody::QuoteChange(quote), message.local_time);
                        StageOutput {
                            forward: vec![book, message],
                            ..Default::default()
                        }
                    }
                    None => StageOutput::forward(message),
                }
            }
            _ => StageOutput::forward(message),
        }
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(Level1DepthStage::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVenue;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn security() -> SecurityId {
        SecurityId::new("EURUSD", "FX")
    }

    fn level1(bid: Decimal, ask: Decimal) -> Message {
        let change = Level1Change::new(security(), Utc::now())
            .with(Level1Field::BestBidPrice, bid)
            .with(Level1Field::BestAskPrice, ask);
        Message::new(MessageBody::Level1Change(change))
    }

    #[test]
    fn test_synthesizes_book_before_level1() {
        let stage = Level1DepthStage::new();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let out = stage.on_inbound(level1(dec!(1.1), dec!(1.2)), ctx);
            assert_eq!(out.forward.len(), 2);

            let book = out.forward[0].as_quote_change().unwrap();
            assert!(book.is_by_level1);
            assert_eq!(book.bids[0].price, dec!(1.1));
            assert_eq!(book.asks[0].price, dec!(1.2));
            assert_eq!(out.forward[1].message_type(), MessageType::Level1Change);
        });
    }

    #[test]
    fn test_unchanged_quotes_are_not_repeated() {
        let stage = Level1DepthStage::new();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            stage.on_inbound(level1(dec!(1.1), dec!(1.2)), ctx);
            let out = stage.on_inbound(level1(dec!(1.1), dec!(1.2)), ctx);
            assert_eq!(out.forward.len(), 1);
        });
    }

    #[test]
    fn test_native_depth_disables_synthesis_until_reset() {
        let stage = Level1DepthStage::new();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let native = QuoteChange::new(security(), Utc::now(), vec![], vec![]);
            stage.on_inbound(Message::new(MessageBody::QuoteChange(native)), ctx);

            let out = stage.on_inbound(level1(dec!(1.1), dec!(1.2)), ctx);
            assert_eq!(out.forward.len(), 1);

            stage
                .on_outbound(Message::new(MessageBody::Reset), ctx)
                .unwrap();
            let out = stage.on_inbound(level1(dec!(1.1), dec!(1.2)), ctx);
            assert_eq!(out.forward.len(), 2);
        });
    }
}
