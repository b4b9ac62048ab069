//! Error types for the message model

use crate::enums::OrderState;
use thiserror::Error;

/// Errors raised while building or validating messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Security id string could not be parsed
    #[error("Invalid security id: {0}")]
    InvalidSecurityId(String),

    /// Security id has no board component
    #[error("Security {0} has no board")]
    MissingBoard(String),

    /// Requested order state change is outside the lifecycle graph
    #[error("Invalid order state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: OrderState, to: OrderState },
}

pub type Result<T> = std::result::Result<T, MessageError>;
