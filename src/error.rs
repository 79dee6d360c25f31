//! Error types for the streams runtime.

use crate::types::SubscriberId;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by user-supplied transformations and sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for stream operations and error signals.
#[derive(Clone, Debug, Error)]
pub enum FlowError {
    #[error("Invalid demand: {0} (requests must be positive)")]
    InvalidDemand(u64),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Subscriber {0} received more items than it requested")]
    SubscriberOverrun(SubscriberId),

    #[error("Scheduler is shut down")]
    SchedulerShutdown,

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl FlowError {
    /// Wrap a source or transformation error.
    pub fn upstream<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FlowError::UpstreamFailure(Arc::new(error))
    }

    /// Wrap an already boxed error.
    pub fn from_boxed(error: BoxError) -> Self {
        FlowError::UpstreamFailure(Arc::from(error))
    }

    /// Upstream failure carrying only a message.
    pub fn message(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self::from_boxed(msg.into())
    }

    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, FlowError::UpstreamFailure(_))
    }
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_display() {
        let err = FlowError::message("boom");
        assert!(err.is_upstream_failure());
        assert_eq!(err.to_string(), "Upstream failure: boom");
    }

    #[test]
    fn test_invalid_demand_display() {
        let err = FlowError::InvalidDemand(0);
        assert_eq!(err.to_string(), "Invalid demand: 0 (requests must be positive)");
    }

    #[test]
    fn test_overrun_display() {
        let err = FlowError::SubscriberOverrun(SubscriberId(7));
        assert!(err.to_string().contains("7"));
    }
}
