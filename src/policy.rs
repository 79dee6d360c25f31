//! Per-stage error policies.
//!
//! A stage whose transformation can fail is built with an `ErrorPolicy`.
//! `Propagate` ends the stream with the failure; `Skip` drops the failing
//! element, reports it to an observer, and keeps going.

use crate::error::FlowError;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Receives failures discarded by a `Skip` policy.
pub trait ErrorObserver: Send + Sync {
    fn on_skip(&self, stage: &str, error: &FlowError);
}

impl<F> ErrorObserver for F
where
    F: Fn(&str, &FlowError) + Send + Sync,
{
    fn on_skip(&self, stage: &str, error: &FlowError) {
        self(stage, error)
    }
}

/// Observer that logs skipped failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl ErrorObserver for LogObserver {
    fn on_skip(&self, stage: &str, error: &FlowError) {
        warn!(stage, %error, "skipping failed element");
    }
}

/// What a stage does with a failed element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Terminate downstream with the error and cancel upstream.
    Propagate,
    /// Drop the element and continue.
    Skip,
}

/// Error policy attached to a stage at construction.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    #[default]
    Propagate,
    Skip(Arc<dyn ErrorObserver>),
}

impl ErrorPolicy {
    /// Skip failures, logging each one.
    pub fn skip() -> Self {
        ErrorPolicy::Skip(Arc::new(LogObserver))
    }

    /// Skip failures, reporting each one to `observer`.
    pub fn skip_with(observer: impl ErrorObserver + 'static) -> Self {
        ErrorPolicy::Skip(Arc::new(observer))
    }

    /// Decide what to do with `error`, notifying the observer on skip.
    pub fn decide(&self, stage: &str, error: &FlowError) -> Decision {
        match self {
            ErrorPolicy::Propagate => Decision::Propagate,
            ErrorPolicy::Skip(observer) => {
                observer.on_skip(stage, error);
                Decision::Skip
            }
        }
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Propagate => write!(f, "Propagate"),
            ErrorPolicy::Skip(_) => write!(f, "Skip"),
        }
    }
}
