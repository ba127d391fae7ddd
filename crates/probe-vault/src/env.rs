// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Process-environment vault adapter.
//!
//! Variables follow `<PREFIX>_<PRINCIPAL>_<FIELD>` with `DEFAULT` standing
//! in for directives without a principal. Field names are lowercased and
//! underscores become dots, so `PROBE_VAULT_DEFAULT_SASL_USERNAME` yields
//! the field `sasl.username`.

use crate::{CredentialVault, VaultError, ensure_required};
use async_trait::async_trait;
use probe_core::{Credentials, TestId, TopicDirective};
use tracing::debug;

/// Default variable prefix.
pub const DEFAULT_PREFIX: &str = "PROBE_VAULT";

/// Environment-variable vault adapter.
#[derive(Debug, Clone)]
pub struct EnvVault {
    prefix: String,
    required_fields: Vec<String>,
}

impl EnvVault {
    /// Adapter with the standard prefix.
    #[must_use]
    pub fn new(required_fields: Vec<String>) -> Self {
        Self::with_prefix(DEFAULT_PREFIX, required_fields)
    }

    /// Adapter with a custom prefix (tests isolate themselves this way).
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>, required_fields: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            required_fields,
        }
    }

    fn principal_key(principal: Option<&str>) -> String {
        let raw = principal.unwrap_or("default");
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn collect(&self, principal: Option<&str>) -> Credentials {
        let needle = format!("{}_{}_", self.prefix, Self::principal_key(principal));
        let mut credentials = Credentials::new();
        for (name, value) in std::env::vars() {
            if let Some(field_part) = name.strip_prefix(&needle) {
                if field_part.is_empty() {
                    continue;
                }
                let field = field_part.to_ascii_lowercase().replace('_', ".");
                credentials.insert(field, value);
            }
        }
        credentials
    }
}

#[async_trait]
impl CredentialVault for EnvVault {
    async fn fetch_credentials(
        &self,
        test_id: TestId,
        directives: &[TopicDirective],
    ) -> Result<Vec<Credentials>, VaultError> {
        let mut out = Vec::with_capacity(directives.len());
        for directive in directives {
            let credentials = self.collect(directive.principal.as_deref());
            if credentials.is_empty() {
                return Err(VaultError::NoEntry {
                    topic: directive.topic.clone(),
                    principal: directive.principal.clone(),
                });
            }
            ensure_required(&directive.topic, &credentials, &self.required_fields)?;
            out.push(credentials);
        }
        debug!(
            target: "probe.vault",
            test_id = %test_id,
            directives = directives.len(),
            "credentials resolved from environment"
        );
        Ok(out)
    }
}

#[cfg(test)]
// `std::env::set_var` is unsafe on edition 2024; tests serialise access by
// using distinct prefixes.
#[allow(unsafe_code)]
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

    #[test]
    fn principal_key_normalisation() {
        assert_eq!(EnvVault::principal_key(None), "DEFAULT");
        assert_eq!(EnvVault::principal_key(Some("svc-orders")), "SVC_ORDERS");
        assert_eq!(EnvVault::principal_key(Some("a.b c")), "A_B_C");
    }

    // Env-var tests use per-test unique prefixes; processes share their
    // environment and cargo runs tests concurrently.

    #[tokio::test]
    async fn resolves_default_credentials() {
        let prefix = "PV_T1";
        unsafe {
            std::env::set_var("PV_T1_DEFAULT_SASL_USERNAME", "svc-probe");
            std::env::set_var("PV_T1_DEFAULT_SASL_PASSWORD", "secret");
        }
        let vault = EnvVault::with_prefix(prefix, vec!["sasl.username".into()]);
        let creds = vault
            .fetch_credentials(TestId::new_v4(), &[directive("orders", None)])
            .await
            .unwrap();
        assert_eq!(creds[0].get("sasl.username"), Some("svc-probe"));
        assert_eq!(creds[0].get("sasl.password"), Some("secret"));
    }

    #[tokio::test]
    async fn principal_scopes_the_lookup() {
        unsafe {
            std::env::set_var("PV_T2_SVC_ORDERS_SASL_USERNAME", "svc-orders");
        }
        let vault = EnvVault::with_prefix("PV_T2", vec![]);
        let creds = vault
            .fetch_credentials(
                TestId::new_v4(),
                &[directive("orders", Some("svc-orders"))],
            )
            .await
            .unwrap();
        assert_eq!(creds[0].get("sasl.username"), Some("svc-orders"));
    }

    #[tokio::test]
    async fn empty_environment_is_no_entry() {
        let vault = EnvVault::with_prefix("PV_EMPTY", vec![]);
        let err = vault
            .fetch_credentials(TestId::new_v4(), &[directive("orders", None)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VaultError::NoEntry { .. }));
    }

    #[tokio::test]
    async fn missing_required_field_is_incomplete() {
        unsafe {
            std::env::set_var("PV_T3_DEFAULT_SASL_USERNAME", "u");
        }
        let vault = EnvVault::with_prefix("PV_T3", vec!["sasl.password".into()]);
        let err = vault
            .fetch_credentials(TestId::new_v4(), &[directive("orders", None)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VaultError::Incomplete { .. }));
    }
}
