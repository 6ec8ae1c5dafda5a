use thiserror::Error;

use crate::database::models::StreamStatus;

/// Errors surfaced to callers of the coordinator operations.
///
/// Probe-level failures never show up here: they are recorded as
/// `ProbeResult` rows (see [`crate::monitoring::checker::ProbeFailure`]).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid transition: {from} → {to}")]
    InvalidTransition { from: StreamStatus, to: StreamStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Store unavailable or a query failed; callers in loops retry after a backoff
    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_both_states() {
        let err = CoordinatorError::InvalidTransition {
            from: StreamStatus::Live,
            to: StreamStatus::Ready,
        };
        assert_eq!(err.to_string(), "Invalid transition: LIVE → READY");
    }

    #[test]
    fn test_store_errors_display_the_cause() {
        let err = CoordinatorError::from(anyhow::anyhow!("database is locked"));
        assert_eq!(err.to_string(), "database is locked");
    }
}
