// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-codec
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Backend dispatch and the codec entry point.
pub mod codec;
/// Schema lookup: subjects, HTTP client, seeded registry.
pub mod registry;
/// The explicit wire framing.
pub mod wire;

pub use codec::{Payload, SchemaCodec};
pub use registry::{
    HttpSchemaRegistry, RegisteredSchema, SchemaFormat, SchemaProvider, StaticSchemaRegistry,
    subject,
};
pub use wire::{MAGIC_BYTE, WireFrame};

use thiserror::Error;

/// Errors raised by framing, schema lookup, or a codec backend.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte frame is truncated, has a bad magic byte, or malformed
    /// varints.
    #[error("invalid wire frame: {reason}")]
    InvalidFrame {
        /// What was wrong with the frame.
        reason: String,
    },

    /// No schema is registered under the subject.
    #[error("no schema registered for subject '{subject}'")]
    SchemaNotFound {
        /// Subject that was looked up.
        subject: String,
    },

    /// The registry call failed (transport or protocol).
    #[error("schema registry error: {reason}")]
    Registry {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The backend rejected the payload during encoding.
    #[error("encode failed: {reason}")]
    Encode {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The backend rejected the payload during decoding.
    #[error("decode failed: {reason}")]
    Decode {
        /// Human-readable failure detail.
        reason: String,
    },

    /// Payload shape does not fit the backend (e.g. structured data on a
    /// Protobuf subject).
    #[error("unsupported payload: {reason}")]
    Unsupported {
        /// Human-readable failure detail.
        reason: String,
    },
}
