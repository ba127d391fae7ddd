// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Producer stream actor.
//!
//! One task per producer topic. Requests are handled strictly in arrival
//! order, so broker-accepted order for a single client equals its send
//! order. Per-request failures are replied as nacks and never take the
//! actor down.

use crate::{INBOX_CAPACITY, StreamError};
use probe_broker::{BrokerFactory, ProducerClient, ProducerSpec};
use probe_codec::{Payload, SchemaCodec};
use probe_core::Envelope;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One produce request: key and value with their record names (the codec
/// resolves `<topic>-<RecordName>` subjects from them), plus headers.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    /// Record name of the key schema.
    pub key_record: String,
    /// Key payload.
    pub key: Payload,
    /// Record name of the value schema.
    pub value_record: String,
    /// Value payload.
    pub value: Payload,
    /// Broker headers.
    pub headers: BTreeMap<String, String>,
}

/// Reply to a produce request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceReply {
    /// The broker acknowledged the record.
    Ack,
    /// The record was not published.
    Nack {
        /// Why (serialization failure, broker refusal, timeout).
        cause: String,
    },
}

enum ProducerCmd {
    Produce {
        request: ProduceRequest,
        reply: oneshot::Sender<ProduceReply>,
    },
    Stop,
}

/// Settings for one producer stream.
#[derive(Debug, Clone)]
pub struct ProducerStreamConfig {
    /// Topic the stream publishes to.
    pub topic: String,
    /// Effective bootstrap servers.
    pub bootstrap_servers: String,
    /// Reply deadline for produce asks.
    pub ask_timeout: Duration,
    /// Bound on the final flush when stopping.
    pub stop_flush_timeout: Duration,
}

/// Cloneable handle to a producer stream.
#[derive(Clone)]
pub struct ProducerHandle {
    topic: String,
    tx: mpsc::Sender<ProducerCmd>,
    ask_timeout: Duration,
}

impl ProducerHandle {
    /// Topic this stream publishes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish through the stream, waiting for the broker ack.
    ///
    /// Never fails at the call site: admission or reply timeouts, a stopped
    /// stream, and broker refusals all come back as [`ProduceReply::Nack`].
    pub async fn produce(&self, request: ProduceRequest) -> ProduceReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = ProducerCmd::Produce {
            request,
            reply: reply_tx,
        };

        let asked = tokio::time::timeout(self.ask_timeout, async {
            if self.tx.send(cmd).await.is_err() {
                return ProduceReply::Nack {
                    cause: "producer stream is stopped".into(),
                };
            }
            match reply_rx.await {
                Ok(reply) => reply,
                Err(_) => ProduceReply::Nack {
                    cause: "producer stream dropped the request".into(),
                },
            }
        })
        .await;

        asked.unwrap_or(ProduceReply::Nack {
            cause: "produce timed out".into(),
        })
    }

    /// Ask the stream to flush and stop. Idempotent; racing a stopped
    /// stream is fine.
    pub async fn stop(&self) {
        let _ = self.tx.send(ProducerCmd::Stop).await;
    }

    /// Whether the actor has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the broker client and spawn the producer stream actor.
///
/// # Errors
///
/// Returns [`StreamError::Startup`] when the broker client cannot be
/// created.
pub async fn spawn_producer_stream(
    factory: &dyn BrokerFactory,
    spec: ProducerSpec,
    codec: SchemaCodec,
    config: ProducerStreamConfig,
) -> Result<(ProducerHandle, JoinHandle<()>), StreamError> {
    let client = factory
        .producer(&spec)
        .await
        .map_err(|e| StreamError::Startup {
            topic: config.topic.clone(),
            reason: e.to_string(),
        })?;

    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let handle = ProducerHandle {
        topic: config.topic.clone(),
        tx,
        ask_timeout: config.ask_timeout,
    };

    let task = tokio::spawn(run_producer(client, codec, config, rx));
    Ok((handle, task))
}

async fn run_producer(
    client: Box<dyn ProducerClient>,
    codec: SchemaCodec,
    config: ProducerStreamConfig,
    mut rx: mpsc::Receiver<ProducerCmd>,
) {
    info!(target: "probe.streams", topic = %config.topic, "producer stream up");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            ProducerCmd::Produce { request, reply } => {
                let outcome = handle_produce(client.as_ref(), &codec, &config.topic, request).await;
                let _ = reply.send(outcome);
            }
            ProducerCmd::Stop => break,
        }
    }

    // Stop (or all handles dropped): flush what the broker client still has
    // in flight, bounded, then close.
    if let Err(e) = client.flush(config.stop_flush_timeout).await {
        warn!(target: "probe.streams", topic = %config.topic, error = %e, "flush on stop failed");
    }
    client.close().await;
    info!(target: "probe.streams", topic = %config.topic, "producer stream stopped");
}

async fn handle_produce(
    client: &dyn ProducerClient,
    codec: &SchemaCodec,
    topic: &str,
    request: ProduceRequest,
) -> ProduceReply {
    let key = match codec.encode(topic, &request.key_record, &request.key).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(target: "probe.streams", topic, error = %e, "key serialization failed");
            return ProduceReply::Nack {
                cause: format!("key serialization failed: {e}"),
            };
        }
    };
    let value = match codec
        .encode(topic, &request.value_record, &request.value)
        .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(target: "probe.streams", topic, error = %e, "value serialization failed");
            return ProduceReply::Nack {
                cause: format!("value serialization failed: {e}"),
            };
        }
    };

    let mut envelope = Envelope::new(key, value);
    envelope.headers = request.headers;

    match client.publish(envelope).await {
        Ok(()) => ProduceReply::Ack,
        Err(e) => ProduceReply::Nack {
            cause: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_broker::InMemoryBroker;
    use probe_codec::{SchemaCodec, SchemaFormat, StaticSchemaRegistry};
    use probe_core::Credentials;
    use serde_json::json;
    use std::sync::Arc;

    fn codec() -> SchemaCodec {
        let mut registry = StaticSchemaRegistry::new();
        registry.register("cmds-EventKey", 1, SchemaFormat::Json, r#"{"type":"object"}"#);
        registry.register("cmds-Command", 2, SchemaFormat::Json, r#"{"type":"object"}"#);
        SchemaCodec::new(Arc::new(registry))
    }

    fn config() -> ProducerStreamConfig {
        ProducerStreamConfig {
            topic: "cmds".into(),
            bootstrap_servers: "memory:0".into(),
            ask_timeout: Duration::from_secs(1),
            stop_flush_timeout: Duration::from_secs(1),
        }
    }

    fn spec() -> ProducerSpec {
        ProducerSpec {
            topic: "cmds".into(),
            bootstrap_servers: "memory:0".into(),
            credentials: Credentials::new(),
        }
    }

    fn request(n: u32) -> ProduceRequest {
        ProduceRequest {
            key_record: "EventKey".into(),
            key: Payload::Structured(json!({"eventId": format!("e-{n}")})),
            value_record: "Command".into(),
            value: Payload::Structured(json!({"n": n})),
            headers: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn produce_acks_and_publishes() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_producer_stream(&broker, spec(), codec(), config())
            .await
            .unwrap();

        assert_eq!(handle.produce(request(1)).await, ProduceReply::Ack);
        let records = broker.records("cmds").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key[0], probe_codec::MAGIC_BYTE);

        handle.stop().await;
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn broker_accepted_order_equals_send_order() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_producer_stream(&broker, spec(), codec(), config())
            .await
            .unwrap();

        for n in 0..20 {
            assert_eq!(handle.produce(request(n)).await, ProduceReply::Ack);
        }

        let records = broker.records("cmds").await;
        assert_eq!(records.len(), 20);
        for (n, record) in records.iter().enumerate() {
            let frame = probe_codec::wire::decode(&record.value).unwrap();
            let value: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
            assert_eq!(value["n"], n as u64, "order must be preserved");
        }

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn serialization_failure_is_a_nack_and_stream_survives() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_producer_stream(&broker, spec(), codec(), config())
            .await
            .unwrap();

        let bad = ProduceRequest {
            key_record: "Unregistered".into(),
            ..request(0)
        };
        match handle.produce(bad).await {
            ProduceReply::Nack { cause } => assert!(cause.contains("serialization")),
            ProduceReply::Ack => panic!("expected a nack"),
        }

        // The actor is still alive and serving.
        assert_eq!(handle.produce(request(1)).await, ProduceReply::Ack);

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn produce_after_stop_is_a_nack() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_producer_stream(&broker, spec(), codec(), config())
            .await
            .unwrap();
        handle.stop().await;
        task.await.unwrap();

        match handle.produce(request(0)).await {
            ProduceReply::Nack { cause } => assert!(cause.contains("stopped")),
            ProduceReply::Ack => panic!("expected a nack after stop"),
        }
    }

    #[tokio::test]
    async fn startup_failure_surfaces_as_stream_error() {
        let broker = InMemoryBroker::new();
        broker.break_topic("cmds").await;
        let err = spawn_producer_stream(&broker, spec(), codec(), config())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Startup { .. }));
    }
}
