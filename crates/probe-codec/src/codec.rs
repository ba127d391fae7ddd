// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The schema codec: dispatches encode/decode to the backend selected by the
//! registered schema's format, wrapping payloads in the wire framing.

use crate::registry::{SchemaFormat, SchemaProvider, subject};
use crate::{CodecError, wire};
use probe_core::EventKey;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Message content on its way through the codec.
///
/// JSON and Avro subjects carry structured values; Protobuf subjects carry
/// pre-encoded message bytes (the codec frames them, it does not interpret
/// proto payloads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A structured record (JSON and Avro backends).
    Structured(Value),
    /// Opaque pre-encoded bytes (Protobuf backend).
    Binary(Vec<u8>),
}

impl Payload {
    fn as_structured(&self) -> Result<&Value, CodecError> {
        match self {
            Self::Structured(v) => Ok(v),
            Self::Binary(_) => Err(CodecError::Unsupported {
                reason: "backend requires a structured payload, got binary".into(),
            }),
        }
    }

    fn as_binary(&self) -> Result<&[u8], CodecError> {
        match self {
            Self::Binary(b) => Ok(b),
            Self::Structured(_) => Err(CodecError::Unsupported {
                reason: "protobuf backend requires binary payload, got structured".into(),
            }),
        }
    }
}

/// Encode/decode keys and values through the schema registry.
///
/// One codec is shared by all streams of a test; it is cheap to clone.
#[derive(Clone)]
pub struct SchemaCodec {
    provider: Arc<dyn SchemaProvider>,
}

impl SchemaCodec {
    /// Build a codec over the given schema provider.
    #[must_use]
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self { provider }
    }

    /// Serialize `payload` for `topic` under the `<topic>-<record_name>`
    /// subject and wrap it in the wire framing.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaNotFound`] for unknown subjects,
    /// [`CodecError::Unsupported`] on payload/backend mismatch, and
    /// [`CodecError::Encode`] when the backend rejects the payload.
    pub async fn encode(
        &self,
        topic: &str,
        record_name: &str,
        payload: &Payload,
    ) -> Result<Vec<u8>, CodecError> {
        let subject = subject(topic, record_name);
        let schema = self.provider.latest(&subject).await?;

        match schema.format {
            SchemaFormat::Json => {
                let value = payload.as_structured()?;
                validate_json(&schema.definition, value)?;
                let bytes = serde_json::to_vec(value).map_err(|e| CodecError::Encode {
                    reason: e.to_string(),
                })?;
                Ok(wire::encode(schema.id, &bytes))
            }
            SchemaFormat::Avro => {
                let value = payload.as_structured()?;
                let bytes = encode_avro(&schema.definition, value)?;
                Ok(wire::encode(schema.id, &bytes))
            }
            SchemaFormat::Protobuf => {
                let bytes = payload.as_binary()?;
                Ok(wire::encode_with_indexes(schema.id, &[0], bytes))
            }
        }
    }

    /// Strip the wire framing from `bytes` and materialize the payload per
    /// the subject's registered schema.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidFrame`] for malformed frames and
    /// [`CodecError::Decode`] when the payload does not match the schema.
    pub async fn decode(
        &self,
        topic: &str,
        record_name: &str,
        bytes: &[u8],
    ) -> Result<Payload, CodecError> {
        let subject = subject(topic, record_name);
        let schema = self.provider.latest(&subject).await?;

        match schema.format {
            SchemaFormat::Json => {
                let frame = wire::decode(bytes)?;
                warn_on_id_mismatch(&subject, frame.schema_id, schema.id);
                let value: Value =
                    serde_json::from_slice(&frame.payload).map_err(|e| CodecError::Decode {
                        reason: e.to_string(),
                    })?;
                validate_json(&schema.definition, &value)?;
                Ok(Payload::Structured(value))
            }
            SchemaFormat::Avro => {
                let frame = wire::decode(bytes)?;
                warn_on_id_mismatch(&subject, frame.schema_id, schema.id);
                let value = decode_avro(&schema.definition, &frame.payload)?;
                Ok(Payload::Structured(value))
            }
            SchemaFormat::Protobuf => {
                let frame = wire::decode_with_indexes(bytes)?;
                warn_on_id_mismatch(&subject, frame.schema_id, schema.id);
                Ok(Payload::Binary(frame.payload))
            }
        }
    }

    /// Decode a record key and materialize it as an [`EventKey`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the decoded key does not carry
    /// the event-key fields (or the subject is Protobuf, whose payloads the
    /// codec does not interpret).
    pub async fn decode_event_key(
        &self,
        topic: &str,
        record_name: &str,
        bytes: &[u8],
    ) -> Result<EventKey, CodecError> {
        match self.decode(topic, record_name, bytes).await? {
            Payload::Structured(value) => {
                serde_json::from_value(value).map_err(|e| CodecError::Decode {
                    reason: format!("key does not materialize as an event key: {e}"),
                })
            }
            Payload::Binary(_) => Err(CodecError::Decode {
                reason: "protobuf keys cannot be materialized as event keys".into(),
            }),
        }
    }
}

fn warn_on_id_mismatch(subject: &str, framed: u32, registered: u32) {
    if framed != registered {
        // The registered schema still acts as the reader schema.
        debug!(
            target: "probe.codec",
            subject,
            framed_id = framed,
            registered_id = registered,
            "frame schema id differs from registered latest"
        );
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

fn validate_json(definition: &str, value: &Value) -> Result<(), CodecError> {
    let schema_doc: Value = serde_json::from_str(definition).map_err(|e| CodecError::Decode {
        reason: format!("registered JSON schema is not valid JSON: {e}"),
    })?;
    let validator = jsonschema::validator_for(&schema_doc).map_err(|e| CodecError::Decode {
        reason: format!("registered JSON schema does not compile: {e}"),
    })?;
    validator.validate(value).map_err(|e| CodecError::Decode {
        reason: format!("payload does not satisfy schema: {e}"),
    })
}

fn encode_avro(definition: &str, value: &Value) -> Result<Vec<u8>, CodecError> {
    let schema = apache_avro::Schema::parse_str(definition).map_err(|e| CodecError::Encode {
        reason: format!("registered Avro schema does not parse: {e}"),
    })?;
    let avro_value = apache_avro::to_value(value.clone())
        .map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })?
        .resolve(&schema)
        .map_err(|e| CodecError::Encode {
            reason: format!("payload does not resolve against writer schema: {e}"),
        })?;
    apache_avro::to_avro_datum(&schema, avro_value).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

fn decode_avro(definition: &str, payload: &[u8]) -> Result<Value, CodecError> {
    let schema = apache_avro::Schema::parse_str(definition).map_err(|e| CodecError::Decode {
        reason: format!("registered Avro schema does not parse: {e}"),
    })?;
    let mut reader = payload;
    let avro_value =
        apache_avro::from_avro_datum(&schema, &mut reader, None).map_err(|e| {
            CodecError::Decode {
                reason: e.to_string(),
            }
        })?;
    Value::try_from(avro_value).map_err(|e| CodecError::Decode {
        reason: format!("avro value does not map to JSON: {e}"),
    })
}
