use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Offline buffer full, message dropped (capacity: {capacity})")]
    BufferFull { capacity: usize },

    #[error("Invalid message for {stage}: {reason}")]
    InvalidMessage { stage: &'static str, reason: String },
}

impl PipelineError {
    /// Create an invalid message error
    pub fn invalid_message(stage: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidMessage {
            stage,
            reason: reason.into(),
        }
    }

    /// Check if retrying the same message later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::BufferFull { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
