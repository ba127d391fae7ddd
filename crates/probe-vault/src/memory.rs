// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! In-memory vault adapter for tests and wiring checks.

use crate::{CredentialVault, VaultError, ensure_required};
use async_trait::async_trait;
use probe_core::{Credentials, TestId, TopicDirective};
use std::collections::HashMap;

/// Seeded vault; clones are cheap and share nothing (seed once, then read).
#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    default: Option<Credentials>,
    principals: HashMap<String, Credentials>,
    required_fields: Vec<String>,
}

impl MemoryVault {
    /// Empty vault (every fetch fails with `NoEntry`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vault whose every directive resolves to the same credential map.
    #[must_use]
    pub fn with_default(credentials: Credentials) -> Self {
        Self {
            default: Some(credentials),
            principals: HashMap::new(),
            required_fields: Vec::new(),
        }
    }

    /// Seed credentials for a principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>, credentials: Credentials) -> Self {
        self.principals.insert(principal.into(), credentials);
        self
    }

    /// Enforce these fields on every returned map.
    #[must_use]
    pub fn with_required_fields(mut self, fields: Vec<String>) -> Self {
        self.required_fields = fields;
        self
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn fetch_credentials(
        &self,
        _test_id: TestId,
        directives: &[TopicDirective],
    ) -> Result<Vec<Credentials>, VaultError> {
        let mut out = Vec::with_capacity(directives.len());
        for directive in directives {
            let credentials = match &directive.principal {
                Some(principal) => {
                    self.principals
                        .get(principal)
                        .or(self.default.as_ref())
                        .ok_or_else(|| VaultError::NoEntry {
                            topic: directive.topic.clone(),
                            principal: Some(principal.clone()),
                        })?
                }
                None => self.default.as_ref().ok_or_else(|| VaultError::NoEntry {
                    topic: directive.topic.clone(),
                    principal: None,
                })?,
            };
            ensure_required(&directive.topic, credentials, &self.required_fields)?;
            out.push(credentials.clone());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::TopicRole;

    fn directive(topic: &str, principal: Option<&str>) -> TopicDirective {
        TopicDirective {
            topic: topic.into(),
            role: TopicRole::Consumer,
            bootstrap_servers: None,
            principal: principal.map(String::from),
            event_filters: vec![],
        }
    }

    fn creds(fields: &[(&str, &str)]) -> Credentials {
        let mut c = Credentials::new();
        for (k, v) in fields {
            c.insert(*k, *v);
        }
        c
    }

    #[tokio::test]
    async fn default_credentials_resolve_in_order() {
        let vault = MemoryVault::with_default(creds(&[("sasl.username", "u")]));
        let out = vault
            .fetch_credentials(
                TestId::new_v4(),
                &[directive("a", None), directive("b", None)],
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn principal_overrides_default() {
        let vault = MemoryVault::with_default(creds(&[("sasl.username", "default")]))
            .with_principal("svc", creds(&[("sasl.username", "svc")]));
        let out = vault
            .fetch_credentials(TestId::new_v4(), &[directive("a", Some("svc"))])
            .await
            .unwrap();
        assert_eq!(out[0].get("sasl.username"), Some("svc"));
    }

    #[tokio::test]
    async fn required_fields_are_enforced() {
        let vault = MemoryVault::with_default(creds(&[("sasl.username", "u")]))
            .with_required_fields(vec!["sasl.password".into()]);
        let err = vault
            .fetch_credentials(TestId::new_v4(), &[directive("a", None)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VaultError::Incomplete { .. }));
    }

    #[tokio::test]
    async fn empty_vault_is_no_entry() {
        let vault = MemoryVault::new();
        let err = vault
            .fetch_credentials(TestId::new_v4(), &[directive("a", None)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VaultError::NoEntry { .. }));
    }
}
