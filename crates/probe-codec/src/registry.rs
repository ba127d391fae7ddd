// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Schema lookup: subject naming, the HTTP registry client, and the seeded
//! in-memory registry used by local mode and tests.
//!
//! Subject naming is `<topic>-<RecordName>`. Key and value are independent
//! subjects; no `-key`/`-value` suffix is appended.

use crate::CodecError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Serialization format of a registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    /// JSON Schema document.
    Json,
    /// Avro schema (the registry default when `schemaType` is absent).
    Avro,
    /// Protobuf schema.
    Protobuf,
}

/// One registered schema version.
#[derive(Debug, Clone)]
pub struct RegisteredSchema {
    /// Registry-assigned id, embedded in every frame.
    pub id: u32,
    /// Serialization format.
    pub format: SchemaFormat,
    /// Schema definition text (JSON Schema, Avro JSON, or proto source).
    pub definition: String,
}

/// Compose the registry subject for a topic and record name.
///
/// # Examples
///
/// ```
/// assert_eq!(probe_codec::subject("orders", "OrderKey"), "orders-OrderKey");
/// ```
#[must_use]
pub fn subject(topic: &str, record_name: &str) -> String {
    format!("{topic}-{record_name}")
}

/// Source of registered schemas.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Latest schema registered under `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaNotFound`] for unknown subjects and
    /// [`CodecError::Registry`] for transport failures.
    async fn latest(&self, subject: &str) -> Result<Arc<RegisteredSchema>, CodecError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Response body of `GET /subjects/{subject}/versions/latest`.
#[derive(Debug, Deserialize)]
struct VersionResponse {
    id: u32,
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
}

/// HTTP schema-registry client with an in-process cache.
///
/// Schemas are immutable per version, so a subject's latest is cached
/// forever after first fetch; a probe run never outlives a schema rollout
/// it depends on.
pub struct HttpSchemaRegistry {
    base_url: String,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, Arc<RegisteredSchema>>>,
}

impl HttpSchemaRegistry {
    /// Create a client for the registry at `base_url`
    /// (e.g. `http://localhost:8081`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SchemaProvider for HttpSchemaRegistry {
    async fn latest(&self, subject: &str) -> Result<Arc<RegisteredSchema>, CodecError> {
        if let Some(found) = self.cache.read().await.get(subject) {
            return Ok(Arc::clone(found));
        }

        let url = format!("{}/subjects/{subject}/versions/latest", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CodecError::Registry {
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CodecError::SchemaNotFound {
                subject: subject.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(CodecError::Registry {
                reason: format!("registry returned {}", response.status()),
            });
        }

        let body: VersionResponse =
            response.json().await.map_err(|e| CodecError::Registry {
                reason: e.to_string(),
            })?;

        let format = match body.schema_type.as_deref() {
            None | Some("AVRO") => SchemaFormat::Avro,
            Some("JSON") => SchemaFormat::Json,
            Some("PROTOBUF") => SchemaFormat::Protobuf,
            Some(other) => {
                return Err(CodecError::Registry {
                    reason: format!("unknown schemaType '{other}'"),
                });
            }
        };

        let schema = Arc::new(RegisteredSchema {
            id: body.id,
            format,
            definition: body.schema,
        });
        debug!(target: "probe.codec", subject, id = schema.id, "schema fetched");

        self.cache
            .write()
            .await
            .insert(subject.to_string(), Arc::clone(&schema));
        Ok(schema)
    }
}

// ---------------------------------------------------------------------------
// Seeded in-memory registry
// ---------------------------------------------------------------------------

/// Fixed schema set for local mode and tests.
#[derive(Default)]
pub struct StaticSchemaRegistry {
    schemas: HashMap<String, Arc<RegisteredSchema>>,
}

impl StaticSchemaRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under `subject`, replacing any previous entry.
    pub fn register(
        &mut self,
        subject: impl Into<String>,
        id: u32,
        format: SchemaFormat,
        definition: impl Into<String>,
    ) {
        self.schemas.insert(
            subject.into(),
            Arc::new(RegisteredSchema {
                id,
                format,
                definition: definition.into(),
            }),
        );
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaRegistry {
    async fn latest(&self, subject: &str) -> Result<Arc<RegisteredSchema>, CodecError> {
        self.schemas
            .get(subject)
            .cloned()
            .ok_or_else(|| CodecError::SchemaNotFound {
                subject: subject.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_has_no_side_suffix() {
        assert_eq!(subject("orders", "OrderKey"), "orders-OrderKey");
        assert_eq!(subject("cmds", "Command"), "cmds-Command");
    }

    #[tokio::test]
    async fn static_registry_serves_registered_schema() {
        let mut registry = StaticSchemaRegistry::new();
        registry.register("orders-OrderKey", 3, SchemaFormat::Json, "{}");
        let schema = registry.latest("orders-OrderKey").await.unwrap();
        assert_eq!(schema.id, 3);
        assert_eq!(schema.format, SchemaFormat::Json);
    }

    #[tokio::test]
    async fn static_registry_misses_are_schema_not_found() {
        let registry = StaticSchemaRegistry::new();
        let err = registry.latest("nope-Record").await.unwrap_err();
        assert!(matches!(err, CodecError::SchemaNotFound { .. }));
    }
}
