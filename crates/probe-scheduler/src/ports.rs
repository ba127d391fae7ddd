// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The ports bundle and runtime settings threaded through the hierarchy.
//!
//! Every component receives exactly the ports it needs; nothing reaches
//! for globals.

use probe_broker::BrokerFactory;
use probe_codec::SchemaCodec;
use probe_runner::ScenarioRuntime;
use probe_storage::ArtifactStore;
use probe_vault::CredentialVault;
use probe_workspace::WorkspaceLayout;
use std::sync::Arc;
use std::time::Duration;

/// Concrete port implementations for one scheduler instance.
pub struct Ports {
    /// Bucket fetch and evidence upload.
    pub storage: Arc<dyn ArtifactStore>,
    /// Per-topic credential resolution.
    pub vault: Arc<dyn CredentialVault>,
    /// Broker client creation.
    pub broker: Arc<dyn BrokerFactory>,
    /// Schema-registry serialization.
    pub codec: SchemaCodec,
    /// The blocking scenario runtime.
    pub runner: Arc<dyn ScenarioRuntime>,
}

impl Ports {
    /// Start assembling a ports bundle.
    #[must_use]
    pub fn builder() -> PortsBuilder {
        PortsBuilder::default()
    }
}

impl std::fmt::Debug for Ports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ports").finish_non_exhaustive()
    }
}

/// Step-by-step assembly of a [`Ports`] bundle.
///
/// [`build`](Self::build) resolves everything at once and names every
/// missing piece, so wiring mistakes surface as one precise error instead
/// of a cascade.
#[derive(Default)]
pub struct PortsBuilder {
    storage: Option<Arc<dyn ArtifactStore>>,
    vault: Option<Arc<dyn CredentialVault>>,
    broker: Option<Arc<dyn BrokerFactory>>,
    codec: Option<SchemaCodec>,
    runner: Option<Arc<dyn ScenarioRuntime>>,
}

impl PortsBuilder {
    /// Set the artifact store.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn ArtifactStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the credential vault.
    #[must_use]
    pub fn vault(mut self, vault: Arc<dyn CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Set the broker factory.
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn BrokerFactory>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set the schema codec.
    #[must_use]
    pub fn codec(mut self, codec: SchemaCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the scenario runtime.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn ScenarioRuntime>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Resolve the bundle.
    ///
    /// # Errors
    ///
    /// Returns one message naming every port that was never set.
    pub fn build(self) -> Result<Ports, String> {
        let mut missing = Vec::new();
        if self.storage.is_none() {
            missing.push("storage");
        }
        if self.vault.is_none() {
            missing.push("vault");
        }
        if self.broker.is_none() {
            missing.push("broker");
        }
        if self.codec.is_none() {
            missing.push("codec");
        }
        if self.runner.is_none() {
            missing.push("runner");
        }
        let (Some(storage), Some(vault), Some(broker), Some(codec), Some(runner)) =
            (self.storage, self.vault, self.broker, self.codec, self.runner)
        else {
            return Err(format!("ports not configured: {}", missing.join(", ")));
        };

        Ok(Ports {
            storage,
            vault,
            broker,
            codec,
            runner,
        })
    }
}

/// Tunables the scheduler and its executions run under.
///
/// The daemon maps the configuration surface onto this; defaults mirror
/// the configuration defaults so tests can construct settings directly.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Admission semaphore capacity.
    pub max_concurrent: usize,
    /// Reply deadline for handle asks and stream asks.
    pub ask_timeout: Duration,
    /// How long terminal records stay queryable; `None` retains until
    /// process exit.
    pub retention: Option<Duration>,
    /// Upper bound on one stream's initialization.
    pub startup_deadline: Duration,
    /// Consumer offset-commit batch size.
    pub commit_batch_size: usize,
    /// Consumer offset-commit interval.
    pub commit_interval: Duration,
    /// Bound on producer flush when stopping.
    pub stop_flush_timeout: Duration,
    /// Bootstrap servers used when a directive has no override.
    pub default_bootstrap_servers: String,
    /// Record name of the event-key schema.
    pub key_record: String,
    /// Bucket layout inside the scratch workspace.
    pub layout: WorkspaceLayout,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            ask_timeout: Duration::from_secs(3),
            retention: None,
            startup_deadline: Duration::from_secs(10),
            commit_batch_size: 20,
            commit_interval: Duration::from_secs(5),
            stop_flush_timeout: Duration::from_secs(5),
            default_bootstrap_servers: "localhost:9092".into(),
            key_record: "EventKey".into(),
            layout: WorkspaceLayout::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_broker::InMemoryBroker;
    use probe_codec::StaticSchemaRegistry;
    use probe_runner::NoopRunner;
    use probe_storage::MemoryStore;
    use probe_vault::MemoryVault;

    #[test]
    fn empty_builder_names_every_missing_port() {
        let err = Ports::builder().build().unwrap_err();
        for port in ["storage", "vault", "broker", "codec", "runner"] {
            assert!(err.contains(port), "missing '{port}' in: {err}");
        }
    }

    #[test]
    fn partial_builder_names_only_the_gaps() {
        let err = Ports::builder()
            .storage(Arc::new(MemoryStore::new()))
            .codec(SchemaCodec::new(Arc::new(StaticSchemaRegistry::new())))
            .build()
            .unwrap_err();
        assert!(!err.contains("storage"));
        assert!(!err.contains("codec"));
        assert!(err.contains("vault"));
        assert!(err.contains("broker"));
        assert!(err.contains("runner"));
    }

    #[test]
    fn complete_builder_resolves() {
        let ports = Ports::builder()
            .storage(Arc::new(MemoryStore::new()))
            .vault(Arc::new(MemoryVault::new()))
            .broker(Arc::new(InMemoryBroker::new()))
            .codec(SchemaCodec::new(Arc::new(StaticSchemaRegistry::new())))
            .runner(Arc::new(NoopRunner))
            .build();
        assert!(ports.is_ok());
    }
}
