// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! TOML-file vault adapter.
//!
//! Layout:
//!
//! ```toml
//! required_fields = ["sasl.username", "sasl.password"]
//!
//! [default]
//! "sasl.username" = "svc-probe"
//! "sasl.password" = "..."
//!
//! [principals.svc-orders]
//! "sasl.username" = "svc-orders"
//! "sasl.password" = "..."
//! ```
//!
//! A directive with a `principal` resolves through `[principals.<name>]`;
//! everything else falls back to `[default]`. The file's own
//! `required_fields` extend (not replace) the set the adapter was built
//! with.

use crate::{CredentialVault, VaultError, ensure_required};
use async_trait::async_trait;
use probe_core::{Credentials, TestId, TopicDirective};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct VaultFile {
    #[serde(default)]
    required_fields: Vec<String>,
    #[serde(default)]
    default: BTreeMap<String, String>,
    #[serde(default)]
    principals: BTreeMap<String, BTreeMap<String, String>>,
}

/// Credential file adapter.
#[derive(Debug, Clone)]
pub struct FileVault {
    path: PathBuf,
    required_fields: Vec<String>,
}

impl FileVault {
    /// Adapter reading `path`, enforcing `required_fields` on every map.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, required_fields: Vec<String>) -> Self {
        Self {
            path: path.into(),
            required_fields,
        }
    }

    fn load(path: &Path) -> Result<VaultFile, VaultError> {
        let text = std::fs::read_to_string(path).map_err(|e| VaultError::Fetch {
            reason: format!("cannot read credential file {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| VaultError::Fetch {
            reason: format!("credential file does not parse: {e}"),
        })
    }
}

#[async_trait]
impl CredentialVault for FileVault {
    async fn fetch_credentials(
        &self,
        test_id: TestId,
        directives: &[TopicDirective],
    ) -> Result<Vec<Credentials>, VaultError> {
        // Re-read per fetch so rotated credentials take effect without a
        // process restart.
        let file = Self::load(&self.path)?;

        let mut required = self.required_fields.clone();
        for field in &file.required_fields {
            if !required.contains(field) {
                required.push(field.clone());
            }
        }

        let mut out = Vec::with_capacity(directives.len());
        for directive in directives {
            let entry = match &directive.principal {
                Some(principal) => {
                    file.principals
                        .get(principal)
                        .ok_or_else(|| VaultError::NoEntry {
                            topic: directive.topic.clone(),
                            principal: Some(principal.clone()),
                        })?
                }
                None => {
                    if file.default.is_empty() {
                        return Err(VaultError::NoEntry {
                            topic: directive.topic.clone(),
                            principal: None,
                        });
                    }
                    &file.default
                }
            };

            let credentials = Credentials::from(entry.clone());
            ensure_required(&directive.topic, &credentials, &required)?;
            out.push(credentials);
        }

        debug!(
            target: "probe.vault",
            test_id = %test_id,
            directives = directives.len(),
            "credentials resolved from file"
        );
        Ok(out)
    }
}
