//! Common types used throughout the cursor registry
//!
//! This module contains the persisted record shape, the TTL and timestamp
//! encodings, and a few JSON helpers shared by the store and the backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// Separator between the store prefix and the rest of a resource key
pub const KEY_SEPARATOR: &str = "::";

// ============================================================================
// TTL
// ============================================================================

/// Time-to-live of a resource, in nanoseconds.
///
/// A negative TTL means "unset": the resource is kept until told otherwise.
/// A TTL of zero marks the resource as removed; it stays observable in memory
/// until the garbage collector has tombstoned it in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ttl(i64);

impl Ttl {
    /// TTL of a freshly created resource
    pub const UNSET: Ttl = Ttl(-1);

    /// TTL of a removed resource
    pub const ZERO: Ttl = Ttl(0);

    /// Create a TTL from raw nanoseconds
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a TTL from whole seconds
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Raw nanoseconds
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// The TTL as a duration, if it is positive
    pub fn as_duration(self) -> Option<Duration> {
        u64::try_from(self.0)
            .ok()
            .filter(|n| *n > 0)
            .map(Duration::from_nanos)
    }

    /// Whether no TTL has been configured yet
    pub fn is_unset(self) -> bool {
        self.0 < 0
    }

    /// Whether the resource is marked as removed
    pub fn is_removed(self) -> bool {
        self.0 == 0
    }

    /// Whether the resource is live and subject to expiry
    pub fn is_active(self) -> bool {
        self.0 > 0
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::UNSET
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_duration() {
            Some(d) => write!(f, "{d:?}"),
            None if self.is_removed() => f.write_str("removed"),
            None => f.write_str("unset"),
        }
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Serde adapter encoding `Option<DateTime<Utc>>` as `[unix_seconds, nanos]`.
///
/// `None` is written as `[0, 0]` and read back as `None`.
pub mod ts_pair {
    use super::{DateTime, Deserialize, Deserializer, Serializer, Utc};
    use serde::ser::SerializeTuple;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let (secs, nanos) = value.map_or((0, 0), |ts| {
            (ts.timestamp(), i64::from(ts.timestamp_subsec_nanos()))
        });
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&secs)?;
        tup.serialize_element(&nanos)?;
        tup.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let pair: Option<(i64, i64)> = Option::deserialize(deserializer)?;
        match pair {
            None | Some((0, 0)) => Ok(None),
            Some((secs, nanos)) => {
                let nanos = u32::try_from(nanos).map_err(serde::de::Error::custom)?;
                DateTime::from_timestamp(secs, nanos)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
            }
        }
    }
}

// ============================================================================
// Persisted Record
// ============================================================================

/// The record persisted for every resource key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Time-to-live in nanoseconds
    #[serde(default)]
    pub ttl: Ttl,

    /// Last metadata/TTL mutation
    #[serde(default, with = "ts_pair")]
    pub updated: Option<DateTime<Utc>>,

    /// Cursor payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<JsonValue>,

    /// Input specific metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonValue>,
}

impl Record {
    /// Create an empty record with an unset TTL
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cursor
    #[must_use]
    pub fn with_cursor(mut self, cursor: JsonValue) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Set the metadata
    #[must_use]
    pub fn with_meta(mut self, meta: JsonValue) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    /// Set the update timestamp
    #[must_use]
    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }
}

// ============================================================================
// JSON helpers
// ============================================================================

/// Overlay `update` onto `target`.
///
/// Objects are merged key by key (recursively); any other value replaces the
/// target outright.
pub fn merge_json(target: &mut JsonValue, update: &JsonValue) {
    match (target, update) {
        (JsonValue::Object(dst), JsonValue::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        dst.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

/// Compose a full store key from a prefix and a name
pub fn store_key(prefix: &str, name: &str) -> String {
    format!("{prefix}{KEY_SEPARATOR}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_ttl_states() {
        assert!(Ttl::UNSET.is_unset());
        assert!(Ttl::ZERO.is_removed());
        assert!(Ttl::from_secs(60).is_active());
        assert_eq!(Ttl::from_secs(60).as_duration(), Some(Duration::from_secs(60)));
        assert_eq!(Ttl::ZERO.as_duration(), None);
        assert_eq!(Ttl::from(Duration::from_secs(1)).as_nanos(), 1_000_000_000);
    }

    #[test]
    fn test_ttl_display() {
        assert_eq!(Ttl::UNSET.to_string(), "unset");
        assert_eq!(Ttl::ZERO.to_string(), "removed");
        assert_eq!(Ttl::from_secs(2).to_string(), "2s");
    }

    #[test]
    fn test_record_wire_shape() {
        let updated = DateTime::from_timestamp(1_700_000_000, 42).unwrap();
        let record = Record::new()
            .with_ttl(Ttl::from_secs(1))
            .with_updated(updated)
            .with_cursor(json!({"offset": 10, "eof": false}));

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "ttl": 1_000_000_000_i64,
                "updated": [1_700_000_000_i64, 42],
                "cursor": {"offset": 10, "eof": false}
            })
        );

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_defaults_when_fields_missing() {
        let record: Record = serde_json::from_value(json!({"cursor": "1"})).unwrap();
        assert_eq!(record.ttl, Ttl::UNSET);
        assert_eq!(record.updated, None);
        assert_eq!(record.cursor, Some(json!("1")));
        assert_eq!(record.meta, None);
    }

    #[test]
    fn test_zero_timestamp_reads_as_none() {
        let record: Record = serde_json::from_value(json!({"ttl": 0, "updated": [0, 0]})).unwrap();
        assert_eq!(record.updated, None);
    }

    #[test]
    fn test_merge_json_objects() {
        let mut cursor = json!({"offset": 6, "eof": false});
        merge_json(&mut cursor, &json!({"offset": 42}));
        assert_eq!(cursor, json!({"offset": 42, "eof": false}));
    }

    #[test]
    fn test_merge_json_scalar_replaces() {
        let mut cursor = json!("old");
        merge_json(&mut cursor, &json!({"offset": 1}));
        assert_eq!(cursor, json!({"offset": 1}));

        let mut cursor = json!({"offset": 1});
        merge_json(&mut cursor, &json!("new"));
        assert_eq!(cursor, json!("new"));
    }

    #[test]
    fn test_store_key() {
        assert_eq!(store_key("test", "key0"), "test::key0");
    }
}
