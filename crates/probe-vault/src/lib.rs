// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential vault port: per-topic broker credentials for a test.
//!
//! Given the parsed topic directives, a vault returns one credentials map
//! per directive, in directive order. A missing required field is a hard
//! error. Error strings carry field *names* only, never values.
//!
//! Cloud vault adapters plug in behind [`CredentialVault`]; in-repo adapters
//! cover a TOML credential file and the process environment.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Process-environment adapter.
pub mod env;
/// TOML-file adapter.
pub mod file;
/// In-memory adapter for tests.
pub mod memory;

pub use env::EnvVault;
pub use file::FileVault;
pub use memory::MemoryVault;

use async_trait::async_trait;
use probe_core::{Credentials, TestId, TopicDirective};

/// Errors raised by vault adapters.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The vault itself could not be reached or read.
    #[error("credential fetch failed: {reason}")]
    Fetch {
        /// Human-readable failure detail (redacted).
        reason: String,
    },

    /// No credentials exist for a directive.
    #[error("no credentials for topic '{topic}'{}", principal.as_ref().map(|p| format!(" (principal '{p}')")).unwrap_or_default())]
    NoEntry {
        /// Topic the directive named.
        topic: String,
        /// Principal the directive named, if any.
        principal: Option<String>,
    },

    /// Credentials came back without one or more required fields.
    #[error("credentials for topic '{topic}' missing required fields: {}", missing.join(", "))]
    Incomplete {
        /// Topic the directive named.
        topic: String,
        /// Names of the missing fields.
        missing: Vec<String>,
    },
}

/// Returns per-topic credentials for a test's directives.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// One credentials map per directive, in the same order as `directives`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Incomplete`] when a required field is absent,
    /// [`VaultError::NoEntry`] when a directive has no credentials at all,
    /// and [`VaultError::Fetch`] for adapter-level failures.
    async fn fetch_credentials(
        &self,
        test_id: TestId,
        directives: &[TopicDirective],
    ) -> Result<Vec<Credentials>, VaultError>;
}

/// Enforce the configured required-field set on one credentials map.
///
/// # Errors
///
/// Returns [`VaultError::Incomplete`] naming the missing fields (names only).
pub fn ensure_required(
    topic: &str,
    credentials: &Credentials,
    required: &[String],
) -> Result<(), VaultError> {
    let missing = credentials.missing_fields(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(VaultError::Incomplete {
            topic: topic.to_string(),
            missing: missing.into_iter().map(String::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_required_passes_on_complete_map() {
        let mut creds = Credentials::new();
        creds.insert("sasl.username", "u");
        creds.insert("sasl.password", "p");
        ensure_required(
            "orders",
            &creds,
            &["sasl.username".into(), "sasl.password".into()],
        )
        .unwrap();
    }

    #[test]
    fn ensure_required_names_missing_fields_without_values() {
        let mut creds = Credentials::new();
        creds.insert("sasl.username", "super-secret-user");
        let err = ensure_required(
            "orders",
            &creds,
            &["sasl.username".into(), "sasl.password".into()],
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("sasl.password"));
        assert!(!text.contains("super-secret-user"));
    }

    #[test]
    fn no_entry_display_mentions_principal() {
        let err = VaultError::NoEntry {
            topic: "orders".into(),
            principal: Some("svc-orders".into()),
        };
        let text = err.to_string();
        assert!(text.contains("orders"));
        assert!(text.contains("svc-orders"));
    }
}
