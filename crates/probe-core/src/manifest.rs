// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Topic directives and the bucket manifest.
//!
//! A bucket carries a YAML manifest (default `topic-directives.yaml`)
//! declaring which topics a test produces to and consumes from. The manifest
//! is the only part of the bucket the core interprets; everything else is
//! handed to the scenario runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Whether a directive's topic is produced to or consumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TopicRole {
    /// The test publishes events to this topic.
    Producer,
    /// The test consumes and indexes events from this topic.
    Consumer,
}

/// One `(eventType, payloadVersion)` pair a consumer keeps.
///
/// Wire naming follows the manifest: `key` is the event type, `value` is the
/// payload version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EventFilter {
    /// Event type to match (e.g. `OrderCreated`).
    pub key: String,
    /// Payload version to match (e.g. `v1`).
    pub value: String,
}

/// One entry of the bucket manifest describing a topic's role and filters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicDirective {
    /// Topic name.
    pub topic: String,

    /// Producer or consumer. Consumers are the common case in behavior
    /// tests, so an omitted role defaults to `Consumer`.
    #[serde(default = "default_role")]
    pub role: TopicRole,

    /// Per-directive bootstrap servers override. When absent the global
    /// default applies. An empty string fails validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_servers: Option<String>,

    /// Identity used by the vault to pick credentials for this topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    /// Consumer-only: which decoded keys to keep in the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_filters: Vec<EventFilter>,
}

fn default_role() -> TopicRole {
    TopicRole::Consumer
}

impl TopicDirective {
    /// Effective bootstrap servers: the directive's override, else `default`.
    #[must_use]
    pub fn effective_bootstrap_servers<'a>(&'a self, default: &'a str) -> &'a str {
        self.bootstrap_servers.as_deref().unwrap_or(default)
    }
}

/// The parsed bucket manifest: a non-empty list of topic directives.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TopicManifest {
    /// Topic directives, in manifest order.
    pub topics: Vec<TopicDirective>,
}

/// Errors raised while parsing or validating a bucket manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest is not valid YAML or has the wrong shape.
    #[error("manifest parse failed: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("manifest validation failed: {}", issues.join("; "))]
    Invalid {
        /// Individual validation failure messages.
        issues: Vec<String>,
    },
}

impl TopicManifest {
    /// Parse a manifest from YAML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] for malformed YAML and
    /// [`ManifestError::Invalid`] with every problem found when the shape is
    /// right but the content is not (errors are accumulated, not
    /// short-circuited).
    pub fn parse(yaml: &str) -> Result<Self, ManifestError> {
        let manifest: TopicManifest =
            serde_yaml::from_str(yaml).map_err(|e| ManifestError::Parse {
                reason: e.to_string(),
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest invariants: non-empty, unique topic names,
    /// non-empty topic strings, non-empty bootstrap-server overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Invalid`] listing every problem found.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut issues = Vec::new();

        if self.topics.is_empty() {
            issues.push("manifest declares no topics".to_string());
        }

        let mut seen = BTreeSet::new();
        for directive in &self.topics {
            if directive.topic.is_empty() {
                issues.push("topic name must not be empty".to_string());
            } else if !seen.insert(directive.topic.as_str()) {
                issues.push(format!("duplicate topic name: {}", directive.topic));
            }

            if let Some(servers) = &directive.bootstrap_servers {
                if servers.is_empty() {
                    issues.push(format!(
                        "topic {}: bootstrapServers must not be empty",
                        directive.topic
                    ));
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Invalid { issues })
        }
    }

    /// Directives with [`TopicRole::Producer`].
    pub fn producers(&self) -> impl Iterator<Item = &TopicDirective> {
        self.topics
            .iter()
            .filter(|d| d.role == TopicRole::Producer)
    }

    /// Directives with [`TopicRole::Consumer`].
    pub fn consumers(&self) -> impl Iterator<Item = &TopicDirective> {
        self.topics
            .iter()
            .filter(|d| d.role == TopicRole::Consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_MANIFEST: &str = r"
topics:
  - topic: orders
    role: Consumer
    eventFilters:
      - key: OrderCreated
        value: v1
  - topic: cmds
    role: Producer
";

    #[test]
    fn parses_well_formed_manifest() {
        let manifest = TopicManifest::parse(OK_MANIFEST).unwrap();
        assert_eq!(manifest.topics.len(), 2);
        assert_eq!(manifest.topics[0].topic, "orders");
        assert_eq!(manifest.topics[0].role, TopicRole::Consumer);
        assert_eq!(manifest.topics[0].event_filters.len(), 1);
        assert_eq!(manifest.topics[0].event_filters[0].key, "OrderCreated");
        assert_eq!(manifest.topics[1].role, TopicRole::Producer);
    }

    #[test]
    fn role_defaults_to_consumer() {
        let manifest = TopicManifest::parse("topics:\n  - topic: orders\n").unwrap();
        assert_eq!(manifest.topics[0].role, TopicRole::Consumer);
    }

    #[test]
    fn empty_topic_list_is_invalid() {
        let err = TopicManifest::parse("topics: []\n").unwrap_err();
        match err {
            ManifestError::Invalid { issues } => {
                assert!(issues.iter().any(|i| i.contains("no topics")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_topic_names_fail_validation() {
        let yaml = "topics:\n  - topic: orders\n  - topic: orders\n";
        let err = TopicManifest::parse(yaml).unwrap_err();
        match err {
            ManifestError::Invalid { issues } => {
                assert!(issues.iter().any(|i| i.contains("duplicate topic name")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn empty_bootstrap_servers_fail_validation() {
        let yaml = "topics:\n  - topic: orders\n    bootstrapServers: \"\"\n";
        let err = TopicManifest::parse(yaml).unwrap_err();
        match err {
            ManifestError::Invalid { issues } => {
                assert!(issues.iter().any(|i| i.contains("bootstrapServers")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = TopicManifest::parse(": not yaml").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn validation_accumulates_issues() {
        let yaml = "topics:\n  - topic: a\n  - topic: a\n  - topic: \"\"\n    bootstrapServers: \"\"\n";
        let err = TopicManifest::parse(yaml).unwrap_err();
        match err {
            ManifestError::Invalid { issues } => assert!(issues.len() >= 3, "{issues:?}"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn effective_bootstrap_servers_prefers_override() {
        let manifest = TopicManifest::parse(
            "topics:\n  - topic: orders\n    bootstrapServers: broker-a:9092\n  - topic: cmds\n",
        )
        .unwrap();
        assert_eq!(
            manifest.topics[0].effective_bootstrap_servers("default:9092"),
            "broker-a:9092"
        );
        assert_eq!(
            manifest.topics[1].effective_bootstrap_servers("default:9092"),
            "default:9092"
        );
    }

    #[test]
    fn role_partitions() {
        let manifest = TopicManifest::parse(OK_MANIFEST).unwrap();
        assert_eq!(manifest.producers().count(), 1);
        assert_eq!(manifest.consumers().count(), 1);
    }
}
