//! The event envelope: the validated unit flowing through the pipeline.
//!
//! An [`IngestRequest`] is what a caller sends. [`Envelope::validate`] turns it
//! into an [`Envelope`], assigning an [`EventId`] when the caller did not supply
//! one. Once appended to the stream log an envelope is never modified.
//!
//! # Wire Format
//!
//! Envelopes travel through the stream log as one JSON object per record, using
//! the same camelCase field names as the HTTP API:
//!
//! ```json
//! {"eventId":"0b7c…","userId":1,"action":"click","timestamp":"2024-01-01T00:00:00Z"}
//! ```
//!
//! The `timestamp` string is carried exactly as the caller sent it. Decoding
//! re-runs validation, so a record written by a foreign producer that breaks an
//! invariant is rejected instead of reaching the sinks.

use crate::error::ValidationError;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted length of `action`, in characters.
pub const MAX_ACTION_LEN: usize = 256;

/// Maximum accepted length of a caller-supplied `eventId`, in characters.
pub const MAX_EVENT_ID_LEN: usize = 128;

const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// Positive user identifier.
///
/// Only constructible through [`UserId::new`], which rejects zero and negative values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Validate and wrap a raw user id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUserId`] if `raw <= 0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use actionstream_core::UserId;
    ///
    /// assert!(UserId::new(1).is_ok());
    /// assert!(UserId::new(0).is_err());
    /// assert!(UserId::new(-1).is_err());
    /// ```
    pub const fn new(raw: i64) -> Result<Self, ValidationError> {
        if raw > 0 {
            Ok(Self(raw))
        } else {
            Err(ValidationError::InvalidUserId(raw))
        }
    }

    /// The raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Key used to partition the stream log, so one user's actions stay ordered.
    #[must_use]
    pub fn partition_key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique identifier of one envelope.
///
/// Deduplication across redeliveries is keyed on this value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh random identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidEventId`] if the value is empty, longer than
    /// [`MAX_EVENT_ID_LEN`] characters, or contains whitespace or control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::InvalidEventId {
                value: raw,
                reason: "must not be empty",
            });
        }
        if raw.chars().count() > MAX_EVENT_ID_LEN {
            return Err(ValidationError::InvalidEventId {
                value: raw,
                reason: "too long",
            });
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidEventId {
                value: raw,
                reason: "must not contain whitespace",
            });
        }
        if raw.chars().any(char::is_control) {
            return Err(ValidationError::InvalidEventId {
                value: raw,
                reason: "must not contain control characters",
            });
        }
        Ok(Self(raw))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unvalidated envelope candidate, as received from a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Acting user; must be positive.
    pub user_id: i64,
    /// Application-defined action name; must not be blank.
    pub action: String,
    /// RFC 3339 / ISO 8601 timestamp of the action.
    pub timestamp: String,
    /// Optional caller-chosen identifier, used for idempotent retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl IngestRequest {
    /// Build a request without an explicit event id.
    #[must_use]
    pub fn new(user_id: i64, action: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            user_id,
            action: action.into(),
            timestamp: timestamp.into(),
            event_id: None,
        }
    }

    /// Attach a caller-chosen event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

/// A validated, immutable event envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    event_id: EventId,
    user_id: UserId,
    action: String,
    timestamp: String,
    #[serde(skip)]
    occurred_at: DateTime<Utc>,
}

/// Shape of an envelope on the stream log, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    event_id: String,
    user_id: i64,
    action: String,
    timestamp: String,
}

impl Envelope {
    /// Validate a caller's request, assigning an [`EventId`] if none was given.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, checking `userId`, `action`,
    /// `timestamp` and `eventId` in that order.
    ///
    /// # Examples
    ///
    /// ```
    /// use actionstream_core::{Envelope, IngestRequest};
    ///
    /// let envelope = Envelope::validate(IngestRequest::new(1, "click", "2024-01-01T00:00:00Z"))
    ///     .expect("valid request");
    /// assert_eq!(envelope.user_id().get(), 1);
    /// assert!(!envelope.event_id().as_str().is_empty());
    ///
    /// assert!(Envelope::validate(IngestRequest::new(5, "", "2024-01-01T00:00:00Z")).is_err());
    /// ```
    pub fn validate(request: IngestRequest) -> Result<Self, ValidationError> {
        let user_id = UserId::new(request.user_id)?;
        let action = validate_action(request.action)?;
        let occurred_at = parse_timestamp(&request.timestamp)?;
        let event_id = match request.event_id {
            Some(raw) => EventId::parse(raw)?,
            None => EventId::generate(),
        };

        Ok(Self {
            event_id,
            user_id,
            action,
            timestamp: request.timestamp,
            occurred_at,
        })
    }

    /// Encode for the stream log.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if encoding fails (not expected for valid envelopes).
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a stream log record, re-validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Malformed`] if the payload is not an envelope, or the
    /// field-level error if it is one but breaks an invariant.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ValidationError> {
        let wire: WireEnvelope = serde_json::from_slice(payload)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        Self::validate(IngestRequest {
            user_id: wire.user_id,
            action: wire.action,
            timestamp: wire.timestamp,
            event_id: Some(wire.event_id),
        })
    }

    /// Identifier used for deduplication.
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Acting user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Action name, as supplied.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Timestamp string, exactly as supplied.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parsed timestamp, normalised to UTC.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Stream log partition key (the decimal user id).
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.user_id.partition_key()
    }
}

/// One durable row per uniquely processed envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoricalRecord {
    /// Unique key of the row.
    pub event_id: EventId,
    /// Acting user.
    pub user_id: UserId,
    /// Action name.
    pub action: String,
    /// Parsed timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Timestamp string as originally supplied.
    pub raw_timestamp: String,
}

impl From<&Envelope> for HistoricalRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            event_id: envelope.event_id.clone(),
            user_id: envelope.user_id,
            action: envelope.action.clone(),
            occurred_at: envelope.occurred_at,
            raw_timestamp: envelope.timestamp.clone(),
        }
    }
}

fn validate_action(action: String) -> Result<String, ValidationError> {
    if action.trim().is_empty() {
        return Err(ValidationError::EmptyAction);
    }
    if action.chars().any(char::is_control) {
        return Err(ValidationError::ActionControlCharacter);
    }
    let len = action.chars().count();
    if len > MAX_ACTION_LEN {
        return Err(ValidationError::ActionTooLong {
            len,
            max: MAX_ACTION_LEN,
        });
    }
    Ok(action)
}

/// Accepts RFC 3339 (with offset) or a naive ISO 8601 date-time, read as UTC.
///
/// Years outside `1..=9999` are rejected so every accepted instant fits a
/// `TIMESTAMPTZ` column.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| ValidationError::InvalidTimestamp {
                value: raw.to_string(),
                reason: e.to_string(),
            })?,
    };

    if !(MIN_YEAR..=MAX_YEAR).contains(&parsed.year()) {
        return Err(ValidationError::InvalidTimestamp {
            value: raw.to_string(),
            reason: format!("year must be between {MIN_YEAR} and {MAX_YEAR}"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request() -> IngestRequest {
        IngestRequest::new(1, "click", "2024-01-01T00:00:00Z")
    }

    #[test]
    fn validate_assigns_event_id_when_missing() {
        let envelope = Envelope::validate(request()).unwrap();
        assert!(Uuid::parse_str(envelope.event_id().as_str()).is_ok());
    }

    #[test]
    fn validate_keeps_caller_event_id() {
        let envelope = Envelope::validate(request().with_event_id("evt-42")).unwrap();
        assert_eq!(envelope.event_id().as_str(), "evt-42");
    }

    #[test]
    fn negative_user_id_is_rejected() {
        let err = Envelope::validate(IngestRequest::new(-1, "click", "2024-01-01T00:00:00Z"))
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidUserId(-1));
    }

    #[test]
    fn empty_and_blank_actions_are_rejected() {
        for action in ["", "   ", "\t\n"] {
            let err =
                Envelope::validate(IngestRequest::new(5, action, "2024-01-01T00:00:00Z")).unwrap_err();
            assert_eq!(err, ValidationError::EmptyAction);
        }
    }

    #[test]
    fn overlong_action_is_rejected() {
        let action = "a".repeat(MAX_ACTION_LEN + 1);
        let err = Envelope::validate(IngestRequest::new(5, action, "2024-01-01T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::ActionTooLong { .. }));
    }

    #[test]
    fn control_characters_in_action_are_rejected() {
        for action in ["cl\u{0}ick", "click\u{7}", "a\tb"] {
            let err = Envelope::validate(IngestRequest::new(1, action, "2024-01-01T00:00:00Z"))
                .unwrap_err();
            assert_eq!(err, ValidationError::ActionControlCharacter);
            assert_eq!(err.field(), "action");
        }
    }

    #[test]
    fn control_characters_in_event_id_are_rejected() {
        let err = Envelope::validate(request().with_event_id("evt\u{0}1")).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidEventId {
                reason: "must not contain control characters",
                ..
            }
        ));
    }

    #[test]
    fn timestamps_outside_storable_years_are_rejected() {
        for raw in ["-5000-01-01T00:00:00", "+10000-01-01T00:00:00Z"] {
            assert!(
                Envelope::validate(IngestRequest::new(1, "click", raw)).is_err(),
                "{raw} should be rejected"
            );
        }
        assert!(Envelope::validate(IngestRequest::new(1, "click", "0001-01-01T00:00:00Z")).is_ok());
    }

    #[test]
    fn unparseable_timestamp_is_rejected() {
        let err = Envelope::validate(IngestRequest::new(5, "click", "yesterday")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimestamp { .. }));
    }

    #[test]
    fn naive_timestamp_is_read_as_utc() {
        let envelope =
            Envelope::validate(IngestRequest::new(5, "click", "2024-01-01T12:30:00")).unwrap();
        assert_eq!(envelope.occurred_at().to_rfc3339(), "2024-01-01T12:30:00+00:00");
        assert_eq!(envelope.timestamp(), "2024-01-01T12:30:00");
    }

    #[test]
    fn offset_timestamp_is_normalised_but_preserved() {
        let envelope =
            Envelope::validate(IngestRequest::new(5, "click", "2024-01-01T02:00:00+02:00")).unwrap();
        assert_eq!(envelope.occurred_at().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(envelope.timestamp(), "2024-01-01T02:00:00+02:00");
    }

    #[test]
    fn event_id_with_whitespace_is_rejected() {
        let err = Envelope::validate(request().with_event_id("a b")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEventId { .. }));
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let envelope = Envelope::validate(request().with_event_id("evt-1")).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "eventId": "evt-1",
                "userId": 1,
                "action": "click",
                "timestamp": "2024-01-01T00:00:00Z",
            })
        );
    }

    #[test]
    fn decoding_preserves_every_field() {
        let envelope = Envelope::validate(request()).unwrap();
        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decoding_garbage_is_malformed() {
        let err = Envelope::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn decoding_revalidates_fields() {
        let payload = br#"{"eventId":"e1","userId":0,"action":"click","timestamp":"2024-01-01T00:00:00Z"}"#;
        assert_eq!(
            Envelope::from_bytes(payload).unwrap_err(),
            ValidationError::InvalidUserId(0)
        );
    }

    #[test]
    fn historical_record_copies_envelope() {
        let envelope = Envelope::validate(request()).unwrap();
        let record = HistoricalRecord::from(&envelope);
        assert_eq!(&record.event_id, envelope.event_id());
        assert_eq!(record.user_id, envelope.user_id());
        assert_eq!(record.raw_timestamp, "2024-01-01T00:00:00Z");
    }

    proptest! {
        #[test]
        fn non_positive_user_ids_never_validate(user_id in i64::MIN..=0) {
            let result = Envelope::validate(IngestRequest::new(user_id, "click", "2024-01-01T00:00:00Z"));
            prop_assert_eq!(result.unwrap_err(), ValidationError::InvalidUserId(user_id));
        }

        #[test]
        fn positive_user_ids_with_real_actions_validate(
            user_id in 1..i64::MAX,
            action in "[a-z_]{1,32}",
        ) {
            let envelope = Envelope::validate(IngestRequest::new(user_id, action.clone(), "2024-01-01T00:00:00Z")).unwrap();
            prop_assert_eq!(envelope.user_id().get(), user_id);
            prop_assert_eq!(envelope.action(), action.as_str());
            prop_assert_eq!(envelope.partition_key(), user_id.to_string());
        }
    }
}
