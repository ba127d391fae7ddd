// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for scheduler integration tests: in-memory ports, a
//! seeded schema registry, and state-polling helpers.
#![allow(dead_code)]

use probe_broker::InMemoryBroker;
use probe_codec::{SchemaCodec, SchemaFormat, StaticSchemaRegistry};
use probe_core::{Credentials, TestId, TestState, TestStatus};
use probe_runner::ScenarioRuntime;
use probe_scheduler::{
    Guardian, GuardianConfig, GuardianError, Ports, SchedulerHandle, SchedulerSettings,
};
use probe_storage::MemoryStore;
use probe_vault::MemoryVault;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manifest used by the happy-path scenarios: one consumer with a filter,
/// one producer.
pub const STANDARD_MANIFEST: &str = r"
topics:
  - topic: orders
    role: Consumer
    eventFilters:
      - key: OrderCreated
        value: v1
  - topic: cmds
    role: Producer
";

pub struct Harness {
    pub broker: InMemoryBroker,
    pub storage: MemoryStore,
    pub handle: SchedulerHandle,
    pub guardian: JoinHandle<Result<(), GuardianError>>,
}

pub fn codec() -> SchemaCodec {
    let mut registry = StaticSchemaRegistry::new();
    for topic in ["orders", "cmds"] {
        registry.register(
            format!("{topic}-EventKey"),
            1,
            SchemaFormat::Json,
            r#"{"type":"object","required":["eventId","eventType","payloadVersion"]}"#,
        );
    }
    registry.register("orders-OrderCreated", 2, SchemaFormat::Json, r#"{"type":"object"}"#);
    registry.register("cmds-Command", 3, SchemaFormat::Json, r#"{"type":"object"}"#);
    SchemaCodec::new(Arc::new(registry))
}

pub fn default_credentials() -> Credentials {
    let mut creds = Credentials::new();
    creds.insert("sasl.username", "svc-probe");
    creds.insert("sasl.password", "secret");
    creds
}

/// Spawn a guardian-supervised scheduler over in-memory ports.
pub fn harness_with(
    runner: Arc<dyn ScenarioRuntime>,
    vault: MemoryVault,
    settings: SchedulerSettings,
) -> Harness {
    let broker = InMemoryBroker::new();
    let storage = MemoryStore::new();
    let ports = Ports {
        storage: Arc::new(storage.clone()),
        vault: Arc::new(vault),
        broker: Arc::new(broker.clone()),
        codec: codec(),
        runner,
    };
    let guardian = Guardian::new(ports, settings, GuardianConfig::default());
    let (handle, guardian_task) = guardian.initialize();
    Harness {
        broker,
        storage,
        handle,
        guardian: guardian_task,
    }
}

pub fn harness(runner: Arc<dyn ScenarioRuntime>) -> Harness {
    harness_with(
        runner,
        MemoryVault::with_default(default_credentials()),
        SchedulerSettings::default(),
    )
}

/// Poll `status` until the record reaches `wanted` or the deadline passes.
pub async fn wait_for_state(
    handle: &SchedulerHandle,
    test_id: TestId,
    wanted: TestState,
) -> TestStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(status) = handle.status(test_id).await {
            if status.state == wanted {
                return status;
            }
            assert!(
                !(status.state.is_terminal() && status.state != wanted),
                "test reached terminal state {:?} while waiting for {wanted:?} (error: {:?})",
                status.state,
                status.error
            );
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for state {wanted:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `status` until the record is terminal.
pub async fn wait_for_terminal(handle: &SchedulerHandle, test_id: TestId) -> TestStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(status) = handle.status(test_id).await {
            if status.state.is_terminal() {
                return status;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
