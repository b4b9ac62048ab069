//! Position derivation from own trades
//!
//! Remembers the side, portfolio and security of outbound registrations so that inbound
//! trade reports can be turned into a signed running position per (portfolio, security).
//! Each trade's execution report is stamped with the resulting position and followed by a
//! derived `PositionChange`. Redelivered trades are counted once.
//!
//! Registrations are forgotten once their order reports a final state; remembered trade keys
//! are bounded by a retention count, oldest first.

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageOutput};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use trading_messages::{
    ExecutionKind, Message, MessageBody, OrderRegister, PositionChange, SecurityId, Side,
    TransactionId,
};

/// Trade keys remembered for redelivery detection
pub const DEFAULT_TRADES_KEEP_COUNT: usize = 100_000;

#[derive(Debug, Clone)]
struct OrderOrigin {
    side: Side,
    portfolio_name: String,
}

impl From<&OrderRegister> for OrderOrigin {
    fn from(register: &OrderRegister) -> Self {
        Self {
            side: register.side,
            portfolio_name: register.portfolio_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TradeKey {
    transaction_id: TransactionId,
    trade_id: Option<u64>,
    trade_string_id: Option<String>,
}

#[derive(Debug, Default)]
struct PositionState {
    orders: HashMap<TransactionId, OrderOrigin>,
    positions: HashMap<(String, SecurityId), Decimal>,
    seen_trades: HashSet<TradeKey>,
    trade_order: VecDeque<TradeKey>,
}

impl PositionState {
    /// False when the trade was already counted
    fn record_trade(&mut self, key: TradeKey, keep_count: usize) -> bool {
        if self.seen_trades.contains(&key) {
            return false;
        }
        if keep_count == 0 {
            return true;
        }
        self.seen_trades.insert(key.clone());
        self.trade_order.push_back(key);
        while self.trade_order.len() > keep_count {
            if let Some(oldest) = self.trade_order.pop_front() {
                self.seen_trades.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Debug)]
pub struct PositionStage {
    trades_keep_count: usize,
    state: Mutex<PositionState>,
}

impl Default for PositionStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStage {
    pub fn new() -> Self {
        Self::with_trades_keep_count(DEFAULT_TRADES_KEEP_COUNT)
    }

    /// `0` disables redelivery detection
    pub fn with_trades_keep_count(trades_keep_count: usize) -> Self {
        Self {
            trades_keep_count,
            state: Mutex::new(PositionState::default()),
        }
    }

    /// Registrations still awaiting a final state
    pub fn tracked_orders(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// Trade keys held for redelivery detection
    pub fn tracked_trades(&self) -> usize {
        self.state.lock().seen_trades.len()
    }

    pub fn position(&self, portfolio_name: &str, security_id: &SecurityId) -> Option<Decimal> {
        self.state
            .lock()
            .positions
            .get(&(portfolio_name.to_string(), security_id.clone()))
            .copied()
    }

    fn remember(&self, register: &OrderRegister) {
        self.state
            .lock()
            .orders
            .insert(register.transaction_id, OrderOrigin::from(register));
    }

    fn apply_trade(&self, mut message: Message) -> StageOutput {
        let mut state = self.state.lock();

        let Some(exec) = message.as_execution_mut() else {
            return StageOutput::forward(message);
        };

        if exec.kind != ExecutionKind::Transaction || !exec.has_trade_info || exec.is_failure() {
            return StageOutput::forward(message);
        }

        let Some(volume) = exec.trade_volume else {
            return StageOutput::forward(message);
        };

        let origin = state.orders.get(&exec.original_transaction_id).cloned();
        let side = exec.side.or(origin.as_ref().map(|o| o.side));
        let portfolio_name = exec
            .portfolio_name
            .clone()
            .or_else(|| origin.as_ref().map(|o| o.portfolio_name.clone()));

        let (Some(side), Some(portfolio_name)) = (side, portfolio_name) else {
            debug!(
                original_transaction_id = exec.original_transaction_id,
                "Trade without side or portfolio, position not derived"
            );
            return StageOutput::forward(message);
        };

        let key = TradeKey {
            transaction_id: exec.original_transaction_id,
            trade_id: exec.trade_id,
            trade_string_id: exec.trade_string_id.clone(),
        };
        let position_key = (portfolio_name.clone(), exec.security_id.clone());

        if !state.record_trade(key, self.trades_keep_count) {
            exec.position = state.positions.get(&position_key).copied();
            return StageOutput::forward(message);
        }

        let position = state.positions.entry(position_key).or_default();
        *position += Decimal::from(side.sign()) * volume;
        exec.position = Some(*position);

        let change = PositionChange {
            is_derived: true,
            current_value: Some(*position),
            ..PositionChange::new(portfolio_name, exec.security_id.clone(), exec.server_time)
        };
        let derived = Message::at(MessageBody::PositionChange(change), message.local_time);

        StageOutput {
            forward: vec![message, derived],
            ..Default::default()
        }
    }
}

impl Stage for PositionStage {
    fn name(&self) -> &'static str {
        "position"
    }

    fn on_outbound(&self, message: Message, _ctx: &StageContext<'_>) -> Result<StageOutput> {
        match message.body() {
            MessageBody::Reset => *self.state.lock() = PositionState::default(),
            MessageBody::OrderRegister(register) => self.remember(register),
            MessageBody::OrderReplace(replace) => self.remember(&replace.new_order),
            MessageBody::OrderPairReplace(pair) => {
                self.remember(&pair.first.new_order);
                self.remember(&pair.second.new_order);
            }
            _ => {}
        }
        Ok(StageOutput::forward(message))
    }

    fn on_inbound(&self, message: Message, _ctx: &StageContext<'_>) -> StageOutput {
        match message.body() {
            MessageBody::Reset => {
                *self.state.lock() = PositionState::default();
                StageOutput::forward(message)
            }
            MessageBody::Execution(exec) => {
                let finished = (exec.kind == ExecutionKind::Transaction
                    && exec.order_state.is_some_and(|state| state.is_final()))
                .then_some(exec.original_transaction_id);

                let output = self.apply_trade(message);
                if let Some(transaction_id) = finished {
                    self.state.lock().orders.remove(&transaction_id);
                }
                output
            }
            _ => StageOutput::forward(message),
        }
    }

    fn fresh(&self) -> Box<dyn Stage> {
        Box::new(PositionStage::with_trades_keep_count(self.trades_keep_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockVenue;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trading_messages::{ExecutionMessage, MessageType, OrderState};

    fn security() -> SecurityId {
        SecurityId::new("SBER", "TQBR")
    }

    fn fill(tx: TransactionId, trade_id: u64, volume: Decimal) -> Message {
        let exec = ExecutionMessage::order_reply(security(), tx, Utc::now())
            .with_trade(trade_id, dec!(100), volume);
        Message::new(MessageBody::Execution(exec))
    }

    #[test]
    fn test_position_accumulates_signed_trades() {
        let stage = PositionStage::new();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let buy = OrderRegister::new(1, security(), "acc", Side::Buy, dec!(100), dec!(10));
            let sell = OrderRegister::new(2, security(), "acc", Side::Sell, dec!(100), dec!(4));
            stage
                .on_outbound(Message::new(MessageBody::OrderRegister(buy)), ctx)
                .unwrap();
            stage
                .on_outbound(Message::new(MessageBody::OrderRegister(sell)), ctx)
                .unwrap();

            let out = stage.on_inbound(fill(1, 11, dec!(10)), ctx);
            assert_eq!(out.forward.len(), 2);
            assert_eq!(out.forward[0].as_execution().unwrap().position, Some(dec!(10)));
            assert_eq!(out.forward[1].message_type(), MessageType::PositionChange);

            stage.on_inbound(fill(2, 12, dec!(4)), ctx);
        });

        assert_eq!(stage.position("acc", &security()), Some(dec!(6)));
    }

    #[test]
    fn test_redelivered_trade_counted_once() {
        let stage = PositionStage::new();
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            let buy = OrderRegister::new(1, security(), "acc", Side::Buy, dec!(100), dec!(10));
            stage
                .on_outbound(Message::new(MessageBody::OrderRegister(buy)), ctx)
                .unwrap();

            stage.on_inbound(fill(1, 11, dec!(3)), ctx);
            let out = stage.on_inbound(fill(1, 11, dec!(3)), ctx);
            assert_eq!(out.forward.len(), 1);
        });

        assert_eq!(stage.position("acc", &security()), Some(dec!(3)));
    }

    #[test]
    fn test_finished_orders_and_old_trades_are_forgotten() {
        let stage = PositionStage::with_trades_keep_count(2);
        let venue = MockVenue::new();

        venue.with_context(|ctx| {
            for tx in 1..=3 {
                let buy = OrderRegister::new(tx, security(), "acc", Side::Buy, dec!(100), dec!(1));
                stage
                    .on_outbound(Message::new(MessageBody::OrderRegister(buy)), ctx)
                    .unwrap();
            }
            assert_eq!(stage.tracked_orders(), 3);

            for tx in 1..=3 {
                let exec = ExecutionMessage::order_reply(security(), tx, Utc::now())
                    .with_state(OrderState::Done)
                    .with_trade(10 + tx, dec!(100), dec!(1));
                stage.on_inbound(Message::new(MessageBody::Execution(exec)), ctx);
            }
        });

        assert_eq!(stage.tracked_orders(), 0);
        assert_eq!(stage.tracked_trades(), 2);
        assert_eq!(stage.position("acc", &security()), Some(dec!(3)));
    }
}
