//! Error taxonomy for the pipeline.
//!
//! Each stage has its own error type so callers can tell a caller mistake
//! ([`ValidationError`]) from a transient dependency outage
//! (`*::DependencyUnavailable`) from a record that can never be applied
//! ([`ProcessingError::Fatal`]).

use crate::envelope::EventId;
use thiserror::Error;

/// A request or stream record breaks an envelope invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `userId` is zero or negative.
    #[error("userId must be a positive integer, got {0}")]
    InvalidUserId(i64),

    /// `action` is empty or whitespace only.
    #[error("action must not be empty")]
    EmptyAction,

    /// `action` exceeds the accepted length.
    #[error("action is {len} characters, maximum is {max}")]
    ActionTooLong {
        /// Actual length in characters
        len: usize,
        /// Accepted maximum
        max: usize,
    },

    /// `action` contains a control character such as NUL.
    #[error("action must not contain control characters")]
    ActionControlCharacter,

    /// `timestamp` is not a parseable date-time.
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// The rejected value
        value: String,
        /// Parser message
        reason: String,
    },

    /// A caller-supplied `eventId` is unusable as a deduplication key.
    #[error("invalid eventId '{value}': {reason}")]
    InvalidEventId {
        /// The rejected value
        value: String,
        /// Which rule it broke
        reason: &'static str,
    },

    /// The payload is not an envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Name of the offending field, for API error bodies.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidUserId(_) => "userId",
            Self::EmptyAction
            | Self::ActionTooLong { .. }
            | Self::ActionControlCharacter => "action",
            Self::InvalidTimestamp { .. } => "timestamp",
            Self::InvalidEventId { .. } => "eventId",
            Self::Malformed(_) => "body",
        }
    }
}

/// Errors reported by the history, counter and dead-letter stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this event id already exists.
    #[error("event {0} already recorded")]
    Duplicate(EventId),

    /// The store could not be reached or timed out. Retrying may succeed.
    #[error("{store} unavailable: {reason}")]
    Unavailable {
        /// Which store failed ("history", "counter", "dead_letter")
        store: &'static str,
        /// Driver message
        reason: String,
    },

    /// The store returned data that cannot be interpreted. Retrying will not help.
    #[error("{store} returned corrupt data: {reason}")]
    Corrupt {
        /// Which store failed
        store: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(store: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            store,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for [`StoreError::Corrupt`].
    pub fn corrupt(store: &'static str, reason: impl ToString) -> Self {
        Self::Corrupt {
            store,
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by the ingress gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The request was rejected; nothing was appended.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The stream log did not acknowledge the append. The caller may retry.
    #[error("stream log unavailable: {0}")]
    DependencyUnavailable(String),
}

/// Outcome of applying one stream record, when it is not a plain success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// A sink is unreachable. The record must be retried and its offset left uncommitted.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The record was already fully applied. Committing the offset is safe.
    #[error("event {0} already applied")]
    DuplicateApplication(EventId),

    /// The record can never be applied. It goes to the dead-letter sink.
    #[error("fatal processing error: {0}")]
    Fatal(String),
}

impl ProcessingError {
    /// Whether the same record should be attempted again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DependencyUnavailable(_))
    }
}

impl From<StoreError> for ProcessingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate(event_id) => Self::DuplicateApplication(event_id),
            StoreError::Unavailable { .. } => Self::DependencyUnavailable(error.to_string()),
            StoreError::Corrupt { .. } => Self::Fatal(error.to_string()),
        }
    }
}

impl From<ValidationError> for ProcessingError {
    fn from(error: ValidationError) -> Self {
        Self::Fatal(error.to_string())
    }
}

/// Errors returned by the query service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// `userId` is zero or negative.
    #[error("userId must be a positive integer, got {0}")]
    InvalidUserId(i64),

    /// The backing store did not answer in time.
    #[error("{store} store unavailable: {reason}")]
    DependencyUnavailable {
        /// "counter" or "history"
        store: &'static str,
        /// What went wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(ProcessingError::DependencyUnavailable("redis".into()).is_retryable());
        assert!(!ProcessingError::Fatal("bad".into()).is_retryable());
        assert!(!ProcessingError::DuplicateApplication(EventId::generate()).is_retryable());
    }

    #[test]
    fn store_errors_map_to_processing_outcomes() {
        let id = EventId::generate();
        assert_eq!(
            ProcessingError::from(StoreError::Duplicate(id.clone())),
            ProcessingError::DuplicateApplication(id)
        );
        assert!(ProcessingError::from(StoreError::unavailable("history", "timeout")).is_retryable());
        assert!(matches!(
            ProcessingError::from(StoreError::corrupt("counter", "not an integer")),
            ProcessingError::Fatal(_)
        ));
    }

    #[test]
    fn validation_errors_name_their_field() {
        assert_eq!(ValidationError::InvalidUserId(0).field(), "userId");
        assert_eq!(ValidationError::EmptyAction.field(), "action");
        assert_eq!(ValidationError::Malformed("x".into()).field(), "body");
    }
}
