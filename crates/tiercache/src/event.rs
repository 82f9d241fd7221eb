//! Invalidation events exchanged between instances.
//!
//! Wire format (JSON):
//!
//! ```text
//! { "cacheName": "character", "key": "user-1", "type": "EVICT",
//!   "sourceInstanceId": "api-7f3a9c01", "timestamp": 1718000000000 }
//! ```
//!
//! `key` is present iff `type` is `EVICT`; `CLEAR_ALL` carries `"key": null`.
//! Payloads violating that rule are rejected at deserialization.

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Kind of invalidation carried by an [`InvalidationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationType {
    /// Drop a single key from the named cache.
    Evict,
    /// Drop every key of the named cache.
    ClearAll,
}

impl InvalidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evict => "EVICT",
            Self::ClearAll => "CLEAR_ALL",
        }
    }
}

impl std::fmt::Display for InvalidationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable description of one invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawInvalidationEvent")]
pub struct InvalidationEvent {
    cache_name: String,
    key: Option<String>,
    #[serde(rename = "type")]
    kind: InvalidationType,
    source_instance_id: String,
    timestamp: i64,
}

impl InvalidationEvent {
    /// Event evicting `key` from `cache_name` on every other instance.
    pub fn evict(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        source_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: Some(key.into()),
            kind: InvalidationType::Evict,
            source_instance_id: source_instance_id.into(),
            timestamp: now_millis(),
        }
    }

    /// Event clearing all keys of `cache_name` on every other instance.
    pub fn clear_all(cache_name: impl Into<String>, source_instance_id: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: None,
            kind: InvalidationType::ClearAll,
            source_instance_id: source_instance_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// The evicted key; `None` for `CLEAR_ALL`.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn kind(&self) -> InvalidationType {
        self.kind
    }

    pub fn source_instance_id(&self) -> &str {
        &self.source_instance_id
    }

    /// Creation time in Unix epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Serialize to the JSON wire format.
    pub fn to_payload(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Parse and validate a JSON payload.
    pub fn from_payload(payload: &str) -> Result<Self, EventError> {
        let raw: RawInvalidationEvent =
            serde_json::from_str(payload).map_err(|e| EventError::Serialization(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// Unvalidated wire representation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInvalidationEvent {
    cache_name: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(rename = "type")]
    kind: InvalidationType,
    source_instance_id: String,
    timestamp: i64,
}

impl TryFrom<RawInvalidationEvent> for InvalidationEvent {
    type Error = EventError;

    fn try_from(raw: RawInvalidationEvent) -> Result<Self, Self::Error> {
        match (raw.kind, &raw.key) {
            (InvalidationType::Evict, None) => {
                return Err(EventError::MissingKey {
                    cache_name: raw.cache_name,
                });
            }
            (InvalidationType::ClearAll, Some(_)) => {
                return Err(EventError::UnexpectedKey {
                    cache_name: raw.cache_name,
                });
            }
            _ => {}
        }

        Ok(Self {
            cache_name: raw.cache_name,
            key: raw.key,
            kind: raw.kind,
            source_instance_id: raw.source_instance_id,
            timestamp: raw.timestamp,
        })
    }
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_wire_shape() {
        let event = InvalidationEvent::evict("character", "user-1", "inst-a");
        let json: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert_eq!(json["cacheName"], "character");
        assert_eq!(json["key"], "user-1");
        assert_eq!(json["type"], "EVICT");
        assert_eq!(json["sourceInstanceId"], "inst-a");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_clear_all_has_null_key() {
        let event = InvalidationEvent::clear_all("character", "inst-a");
        let json: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert!(json["key"].is_null());
        assert_eq!(json["type"], "CLEAR_ALL");
        assert_eq!(event.key(), None);
    }

    #[test]
    fn test_parse_payload_from_other_instance() {
        let payload = r#"{"cacheName":"equipment","key":"ocid-9","type":"EVICT","sourceInstanceId":"inst-b","timestamp":1718000000000}"#;
        let event = InvalidationEvent::from_payload(payload).unwrap();

        assert_eq!(event.cache_name(), "equipment");
        assert_eq!(event.key(), Some("ocid-9"));
        assert_eq!(event.kind(), InvalidationType::Evict);
        assert_eq!(event.source_instance_id(), "inst-b");
        assert_eq!(event.timestamp(), 1_718_000_000_000);
    }

    #[test]
    fn test_evict_without_key_is_rejected() {
        let payload = r#"{"cacheName":"equipment","key":null,"type":"EVICT","sourceInstanceId":"inst-b","timestamp":1}"#;
        let err = InvalidationEvent::from_payload(payload).unwrap_err();
        assert!(matches!(err, EventError::MissingKey { .. }));
    }

    #[test]
    fn test_clear_all_with_key_is_rejected() {
        let payload = r#"{"cacheName":"equipment","key":"k","type":"CLEAR_ALL","sourceInstanceId":"inst-b","timestamp":1}"#;
        let err = InvalidationEvent::from_payload(payload).unwrap_err();
        assert!(matches!(err, EventError::UnexpectedKey { .. }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let payload = r#"{"cacheName":"equipment","key":"k","type":"REFRESH","sourceInstanceId":"inst-b","timestamp":1}"#;
        assert!(matches!(
            InvalidationEvent::from_payload(payload),
            Err(EventError::Serialization(_))
        ));
    }

    #[test]
    fn test_serde_deserialize_validates() {
        let bad = serde_json::json!({
            "cacheName": "c",
            "type": "EVICT",
            "sourceInstanceId": "i",
            "timestamp": 1
        });
        assert!(serde_json::from_value::<InvalidationEvent>(bad).is_err());
    }
}
