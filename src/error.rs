use std::time::Duration;
use thiserror::Error;

/// Type-erased error returned by fallible listeners and operation steps.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("max listeners must be non-negative, got {0}")]
    InvalidMaxListeners(i64),

    #[error("listener call limit must be greater than zero")]
    InvalidTimes,

    #[error("cannot compose operation chain for `{found}` onto chain for `{expected}`")]
    ChainMismatch { expected: String, found: String },
}

/// Failure of an [`Emitter::once`](crate::Emitter::once) wait.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OnceError {
    #[error("timed out after {}ms waiting for event", .0.as_millis())]
    Timeout(Duration),

    #[error("wait for event was aborted")]
    Aborted,

    /// The one-shot listener was removed (e.g. by `remove_all_listeners`)
    /// before any event reached it.
    #[error("listener was removed before an event arrived")]
    Detached,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_configured_duration() {
        let err = OnceError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn chain_mismatch_names_both_events() {
        let err = Error::ChainMismatch {
            expected: "\"a\"".into(),
            found: "\"b\"".into(),
        };
        let message = err.to_string();
        assert!(message.contains("\"a\""));
        assert!(message.contains("\"b\""));
    }
}
