//! Enumerations shared across the message model
//!
//! The order state graph lives here so every layer (pipeline stages, cache, connector)
//! agrees on which transitions are legal.

use crate::error::{MessageError, Result};
use serde::{Deserialize, Serialize};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Opposite direction
    pub fn invert(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// Order lifecycle state
///
/// ```text
/// None ──► Pending ──► Active ──► Done
///             │           └─────► Failed
///             ├─────────────────► Done
///             └─────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderState {
    /// Created locally, not yet submitted
    #[default]
    None,
    /// Submitted, awaiting venue acknowledgement
    Pending,
    /// Accepted by the venue and working
    Active,
    /// Fully filled or cancelled
    Done,
    /// Rejected
    Failed,
}

impl OrderState {
    /// Done or Failed
    pub fn is_final(self) -> bool {
        matches!(self, OrderState::Done | OrderState::Failed)
    }

    /// Whether `next` is reachable from `self` in one step. Staying in place is allowed.
    pub fn can_transition_to(self, next: OrderState) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (OrderState::None, OrderState::Pending)
                | (OrderState::Pending, OrderState::Active)
                | (OrderState::Pending, OrderState::Done)
                | (OrderState::Pending, OrderState::Failed)
                | (OrderState::Active, OrderState::Done)
                | (OrderState::Active, OrderState::Failed)
        )
    }

    /// Validate a requested transition, returning the new state on success
    pub fn check_modification(self, next: OrderState) -> Result<OrderState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MessageError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Order execution style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Limit,
    Market,
    /// Stop/take-profit style order carrying an [`OrderCondition`](crate::OrderCondition)
    Conditional,
}

/// Kind of data a subscription delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Ticks,
    Level1,
    MarketDepth,
    OrderLog,
    Candles { time_frame_secs: u64 },
    Transactions,
    Positions,
}

/// Top-of-book scalar fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level1Field {
    BestBidPrice,
    BestBidVolume,
    BestAskPrice,
    BestAskVolume,
    LastTradePrice,
    LastTradeVolume,
    OpenPrice,
    HighPrice,
    LowPrice,
    ClosePrice,
    Volume,
    OpenInterest,
}

/// Settlement horizon of a position limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitType {
    T0,
    T1,
    T2,
    Tx,
}

/// Whether an execution report describes a public tick or an own transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutionKind {
    Tick,
    #[default]
    Transaction,
}

/// How the offline buffering stage treats a message while disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OfflineMode {
    /// Buffer until reconnect
    #[default]
    None,
    /// Always pass through
    Force,
    /// Answer immediately with a negative result
    Cancel,
}

/// Explicit reply classification supplied by a venue adapter
///
/// When absent the cache infers cancel-vs-replace from the reply's identifying fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyCorrelation {
    /// Reply describes the order being cancelled or replaced
    Cancellation,
    /// Reply describes the replacement order
    Replacement,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_state_graph() {
        use OrderState::*;

        assert!(None.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Failed));
        assert!(Active.can_transition_to(Done));
        assert!(Active.can_transition_to(Failed));
        assert!(Done.can_transition_to(Done));

        assert!(!Done.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Pending));
        assert!(!None.can_transition_to(Active));
    }

    #[test]
    fn test_check_modification_rejects_resurrection() {
        let err = OrderState::Done
            .check_modification(OrderState::Active)
            .unwrap_err();
        assert_eq!(
            err,
            MessageError::InvalidStateTransition {
                from: OrderState::Done,
                to: OrderState::Active
            }
        );
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.sign(), 1);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.invert(), Side::Sell);
    }
}
