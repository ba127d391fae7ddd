//! Unified error taxonomy with stable error codes for Test-Probe.
//!
//! Every probe error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  Use the builder returned by
//! [`ProbeError::new`] to construct errors fluently.
//!
//! Credential material never belongs in a message or context value; vault
//! adapters are required to redact before constructing an error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Client request errors (bad input, unknown id).
    Request,
    /// Admission and supervision errors from the queue scheduler.
    Queue,
    /// Artifact bucket fetch / layout / manifest errors.
    Bucket,
    /// Credential vault errors.
    Vault,
    /// Producer / consumer stream errors.
    Stream,
    /// Schema-registry serialization errors.
    Codec,
    /// Scenario runtime errors.
    Scenario,
    /// Evidence upload errors.
    Evidence,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Queue => "queue",
            Self::Bucket => "bucket",
            Self::Vault => "vault",
            Self::Stream => "stream",
            Self::Codec => "codec",
            Self::Scenario => "scenario",
            Self::Evidence => "evidence",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Request --
    /// Request inputs failed validation (empty bucket, bad state, ...).
    RequestValidationFailed,
    /// Test id is not known to the scheduler.
    TestNotFound,

    // -- Queue --
    /// The scheduler cannot admit the test right now.
    AdmissionUnavailable,
    /// The test was cancelled by user request.
    TestCancelled,
    /// The guardian exhausted its restart budget for the scheduler.
    RestartBudgetExhausted,

    // -- Bucket --
    /// Fetching the artifact bucket failed.
    BucketFetchFailed,
    /// The fetched bucket is missing `features/` or has an empty feature set.
    BucketLayoutInvalid,
    /// The topic-directive manifest is missing, unparsable, or invalid.
    ManifestInvalid,

    // -- Vault --
    /// The vault call itself failed.
    CredentialsFetchFailed,
    /// Credentials came back without a required field.
    CredentialsIncomplete,

    // -- Stream --
    /// A producer or consumer stream did not start before its deadline.
    StreamStartupFailed,
    /// A produce request was not admitted within the ask timeout.
    ProduceTimeout,

    // -- Codec --
    /// Encoding through the schema codec failed.
    CodecEncodeFailed,
    /// Decoding through the schema codec failed.
    CodecDecodeFailed,
    /// The registry has no schema registered under the requested subject.
    SchemaNotFound,

    // -- Scenario --
    /// The scenario runtime threw before producing a result.
    ScenarioRuntimeFailed,
    /// The scenario set ran to completion with failures.
    ScenarioFailed,

    // -- Evidence --
    /// Evidence upload failed (non-fatal to the test result).
    EvidenceUploadFailed,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RequestValidationFailed | Self::TestNotFound => ErrorCategory::Request,

            Self::AdmissionUnavailable | Self::TestCancelled | Self::RestartBudgetExhausted => {
                ErrorCategory::Queue
            }

            Self::BucketFetchFailed | Self::BucketLayoutInvalid | Self::ManifestInvalid => {
                ErrorCategory::Bucket
            }

            Self::CredentialsFetchFailed | Self::CredentialsIncomplete => ErrorCategory::Vault,

            Self::StreamStartupFailed | Self::ProduceTimeout => ErrorCategory::Stream,

            Self::CodecEncodeFailed | Self::CodecDecodeFailed | Self::SchemaNotFound => {
                ErrorCategory::Codec
            }

            Self::ScenarioRuntimeFailed | Self::ScenarioFailed => ErrorCategory::Scenario,

            Self::EvidenceUploadFailed => ErrorCategory::Evidence,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"BUCKET_FETCH_FAILED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestValidationFailed => "REQUEST_VALIDATION_FAILED",
            Self::TestNotFound => "TEST_NOT_FOUND",
            Self::AdmissionUnavailable => "ADMISSION_UNAVAILABLE",
            Self::TestCancelled => "TEST_CANCELLED",
            Self::RestartBudgetExhausted => "RESTART_BUDGET_EXHAUSTED",
            Self::BucketFetchFailed => "BUCKET_FETCH_FAILED",
            Self::BucketLayoutInvalid => "BUCKET_LAYOUT_INVALID",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::CredentialsFetchFailed => "CREDENTIALS_FETCH_FAILED",
            Self::CredentialsIncomplete => "CREDENTIALS_INCOMPLETE",
            Self::StreamStartupFailed => "STREAM_STARTUP_FAILED",
            Self::ProduceTimeout => "PRODUCE_TIMEOUT",
            Self::CodecEncodeFailed => "CODEC_ENCODE_FAILED",
            Self::CodecDecodeFailed => "CODEC_DECODE_FAILED",
            Self::SchemaNotFound => "SCHEMA_NOT_FOUND",
            Self::ScenarioRuntimeFailed => "SCENARIO_RUNTIME_FAILED",
            Self::ScenarioFailed => "SCENARIO_FAILED",
            Self::EvidenceUploadFailed => "EVIDENCE_UPLOAD_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether this code marks a test's terminal `Exception` state when it
    /// reaches the scheduler from an execution.
    ///
    /// Upload failures are attached to the record but do not decide the
    /// terminal state; cancellation terminates as `Cancelled`, not
    /// `Exception`.
    pub fn is_terminal_exception(&self) -> bool {
        matches!(
            self,
            Self::BucketFetchFailed
                | Self::BucketLayoutInvalid
                | Self::ManifestInvalid
                | Self::CredentialsFetchFailed
                | Self::CredentialsIncomplete
                | Self::StreamStartupFailed
                | Self::ScenarioRuntimeFailed
                | Self::ScenarioFailed
                | Self::Internal
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProbeError
// ---------------------------------------------------------------------------

/// Unified probe error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use probe_error::{ErrorCode, ProbeError};
///
/// let err = ProbeError::new(ErrorCode::BucketFetchFailed, "bucket unreachable")
///     .with_context("bucket", "file:///tmp/missing")
///     .with_context("attempt", 1);
/// ```
pub struct ProbeError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ProbeError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ProbeError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`ProbeError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&ProbeError> for ProbeErrorDto {
    fn from(err: &ProbeError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ProbeErrorDto> for ProbeError {
    fn from(dto: ProbeErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
