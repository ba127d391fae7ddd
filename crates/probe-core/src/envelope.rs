// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Event envelopes, decoded keys, and broker credentials.

use crate::manifest::EventFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An event in flight: raw key/value bytes plus string headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Serialized key (typically a correlation record).
    pub key: Vec<u8>,
    /// Serialized value.
    pub value: Vec<u8>,
    /// Broker headers.
    pub headers: BTreeMap<String, String>,
}

impl Envelope {
    /// Build an envelope from key and value bytes with no headers.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Attach a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// The decoded shape of a record key: correlation id plus filter fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventKey {
    /// Correlation id; the registry key for consumed records.
    pub event_id: String,
    /// Event type (matched against [`EventFilter::key`]).
    pub event_type: String,
    /// Payload version (matched against [`EventFilter::value`]).
    pub payload_version: String,
}

impl EventKey {
    /// Whether this key matches the given filter.
    #[must_use]
    pub fn matches(&self, filter: &EventFilter) -> bool {
        self.event_type == filter.key && self.payload_version == filter.value
    }

    /// Whether this key matches any of the given filters.
    ///
    /// An empty filter list keeps everything.
    #[must_use]
    pub fn matches_any(&self, filters: &[EventFilter]) -> bool {
        filters.is_empty() || filters.iter().any(|f| self.matches(f))
    }
}

/// A record kept in a consumer stream's registry, keyed by `event_id`.
///
/// Re-inserting the same `event_id` replaces the previous record
/// (last-write-wins), it never duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    /// Correlation id extracted from the decoded key.
    pub event_id: String,
    /// Raw key bytes as consumed.
    pub key: Vec<u8>,
    /// Raw value bytes as consumed.
    pub value: Vec<u8>,
    /// Broker headers as consumed.
    pub headers: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Per-topic opaque credential map handed to broker clients.
///
/// The core never interprets the fields. `Debug` redacts every value so a
/// stray log line cannot leak secrets; only field names are shown.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Empty credential map.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// Look up a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Whether the field is present (with any value, including empty).
    #[must_use]
    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Field names missing from this map out of `required`.
    #[must_use]
    pub fn missing_fields<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|f| !self.0.contains_key(f.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(field, value)` pairs. Callers must not log values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for Credentials {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_map();
        for field in self.0.keys() {
            d.entry(field, &"<redacted>");
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_builder() {
        let env = Envelope::new(b"k".as_slice(), b"v".as_slice()).with_header("trace", "abc");
        assert_eq!(env.key, b"k");
        assert_eq!(env.value, b"v");
        assert_eq!(env.headers.get("trace").map(String::as_str), Some("abc"));
    }

    #[test]
    fn event_key_matches_filter() {
        let key = EventKey {
            event_id: "e-1".into(),
            event_type: "OrderCreated".into(),
            payload_version: "v1".into(),
        };
        let hit = EventFilter {
            key: "OrderCreated".into(),
            value: "v1".into(),
        };
        let wrong_version = EventFilter {
            key: "OrderCreated".into(),
            value: "v2".into(),
        };
        assert!(key.matches(&hit));
        assert!(!key.matches(&wrong_version));
    }

    #[test]
    fn empty_filter_list_keeps_everything() {
        let key = EventKey {
            event_id: "e-1".into(),
            event_type: "Anything".into(),
            payload_version: "v9".into(),
        };
        assert!(key.matches_any(&[]));
    }

    #[test]
    fn matches_any_is_a_disjunction() {
        let key = EventKey {
            event_id: "e-1".into(),
            event_type: "B".into(),
            payload_version: "v1".into(),
        };
        let filters = vec![
            EventFilter {
                key: "A".into(),
                value: "v1".into(),
            },
            EventFilter {
                key: "B".into(),
                value: "v1".into(),
            },
        ];
        assert!(key.matches_any(&filters));
    }

    #[test]
    fn event_key_serde_is_camel_case() {
        let key = EventKey {
            event_id: "e-1".into(),
            event_type: "OrderCreated".into(),
            payload_version: "v1".into(),
        };
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("eventId"));
        assert!(json.contains("eventType"));
        assert!(json.contains("payloadVersion"));
    }

    #[test]
    fn credentials_debug_redacts_values() {
        let mut creds = Credentials::new();
        creds.insert("sasl.password", "hunter2");
        creds.insert("sasl.username", "svc-probe");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("sasl.password"));
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("svc-probe"));
    }

    #[test]
    fn credentials_missing_fields() {
        let mut creds = Credentials::new();
        creds.insert("sasl.username", "u");
        let required = vec!["sasl.username".to_string(), "sasl.password".to_string()];
        assert_eq!(creds.missing_fields(&required), vec!["sasl.password"]);
    }

    #[test]
    fn credentials_present_when_all_required_exist() {
        let mut creds = Credentials::new();
        creds.insert("sasl.username", "u");
        creds.insert("sasl.password", "p");
        let required = vec!["sasl.username".to_string(), "sasl.password".to_string()];
        assert!(creds.missing_fields(&required).is_empty());
    }
}
