// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Consumer stream actor.
//!
//! One task per consumer topic. The background loop polls the broker,
//! decodes through the schema codec, filters on `(eventType,
//! payloadVersion)`, and indexes matching events by `eventId`. Last write
//! wins, never duplicated. Offsets commit when the pending batch reaches
//! `commit_batch_size` or the commit interval fires, whichever first.
//!
//! Decode failures are counted and skipped; they never crash the actor and
//! never touch the reply path. `Stop` is immediate: no drain, no final
//! commit. Uncommitted records (at most one batch) may be redelivered on
//! the next run.

use crate::{INBOX_CAPACITY, StreamError};
use probe_broker::{BrokerFactory, ConsumerClient, ConsumerSpec, RawRecord, TopicOffset};
use probe_codec::SchemaCodec;
use probe_core::{ConsumedRecord, EventFilter};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long one background poll waits before giving the loop back.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Backoff after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Reply to a fetch ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    /// The event is in the registry.
    Ack(ConsumedRecord),
    /// The event is not (yet) in the registry.
    Nack {
        /// Status code; always `0` ("not found").
        status: u8,
    },
}

enum ConsumerCmd {
    Fetch {
        event_id: String,
        reply: oneshot::Sender<FetchReply>,
    },
    Stop,
}

/// Settings for one consumer stream.
#[derive(Debug, Clone)]
pub struct ConsumerStreamConfig {
    /// Topic the stream consumes.
    pub topic: String,
    /// Filters from the topic directive; empty keeps everything.
    pub filters: Vec<EventFilter>,
    /// Record name of the key schema (subject `<topic>-<key_record>`).
    pub key_record: String,
    /// Reply deadline for fetch asks.
    pub ask_timeout: Duration,
    /// Commit after this many polled records.
    pub commit_batch_size: usize,
    /// Commit at least this often while records are pending.
    pub commit_interval: Duration,
}

/// Cloneable handle to a consumer stream.
#[derive(Clone)]
pub struct ConsumerHandle {
    topic: String,
    tx: mpsc::Sender<ConsumerCmd>,
    ask_timeout: Duration,
    decode_errors: Arc<AtomicU64>,
}

impl ConsumerHandle {
    /// Topic this stream consumes.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Look up an event by id. Absent events, a stopped stream, and ask
    /// timeouts all come back as [`FetchReply::Nack`] with status `0`.
    pub async fn fetch(&self, event_id: impl Into<String>) -> FetchReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = ConsumerCmd::Fetch {
            event_id: event_id.into(),
            reply: reply_tx,
        };

        let asked = tokio::time::timeout(self.ask_timeout, async {
            if self.tx.send(cmd).await.is_err() {
                return FetchReply::Nack { status: 0 };
            }
            reply_rx.await.unwrap_or(FetchReply::Nack { status: 0 })
        })
        .await;

        asked.unwrap_or(FetchReply::Nack { status: 0 })
    }

    /// Ask the stream to stop immediately. Idempotent.
    pub async fn stop(&self) {
        let _ = self.tx.send(ConsumerCmd::Stop).await;
    }

    /// Whether the actor has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of records skipped because key or value did not decode.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

/// Create the broker client and spawn the consumer stream actor.
///
/// # Errors
///
/// Returns [`StreamError::Startup`] when the broker client cannot be
/// created.
pub async fn spawn_consumer_stream(
    factory: &dyn BrokerFactory,
    spec: ConsumerSpec,
    codec: SchemaCodec,
    config: ConsumerStreamConfig,
) -> Result<(ConsumerHandle, JoinHandle<()>), StreamError> {
    let client = factory
        .consumer(&spec)
        .await
        .map_err(|e| StreamError::Startup {
            topic: config.topic.clone(),
            reason: e.to_string(),
        })?;

    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let decode_errors = Arc::new(AtomicU64::new(0));
    let handle = ConsumerHandle {
        topic: config.topic.clone(),
        tx,
        ask_timeout: config.ask_timeout,
        decode_errors: Arc::clone(&decode_errors),
    };

    let task = tokio::spawn(run_consumer(client, codec, config, rx, decode_errors));
    Ok((handle, task))
}

async fn run_consumer(
    mut client: Box<dyn ConsumerClient>,
    codec: SchemaCodec,
    config: ConsumerStreamConfig,
    mut rx: mpsc::Receiver<ConsumerCmd>,
    decode_errors: Arc<AtomicU64>,
) {
    info!(target: "probe.streams", topic = %config.topic, "consumer stream up");

    let mut registry: HashMap<String, ConsumedRecord> = HashMap::new();
    // Next-offset-to-read per partition, not yet committed.
    let mut pending: HashMap<i32, i64> = HashMap::new();
    let mut pending_count = 0usize;

    let mut commit_tick = tokio::time::interval(config.commit_interval);
    commit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    commit_tick.reset();

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(ConsumerCmd::Fetch { event_id, reply }) => {
                    let outcome = registry
                        .get(&event_id)
                        .cloned()
                        .map_or(FetchReply::Nack { status: 0 }, FetchReply::Ack);
                    let _ = reply.send(outcome);
                }
                // Stop (or all handles dropped): immediate, no drain, no
                // final commit.
                Some(ConsumerCmd::Stop) | None => break,
            },

            polled = client.poll(POLL_SLICE) => match polled {
                Ok(batch) => {
                    for record in batch {
                        pending.insert(record.partition, record.offset + 1);
                        pending_count += 1;
                        index_record(&codec, &config, &mut registry, &decode_errors, record).await;
                    }
                    if pending_count >= config.commit_batch_size {
                        commit_pending(client.as_mut(), &config.topic, &mut pending, &mut pending_count).await;
                    }
                }
                Err(e) => {
                    warn!(target: "probe.streams", topic = %config.topic, error = %e, "poll failed");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            },

            _ = commit_tick.tick() => {
                if pending_count > 0 {
                    commit_pending(client.as_mut(), &config.topic, &mut pending, &mut pending_count).await;
                }
            }
        }
    }

    client.close().await;
    info!(
        target: "probe.streams",
        topic = %config.topic,
        indexed = registry.len(),
        uncommitted = pending_count,
        "consumer stream stopped"
    );
}

async fn index_record(
    codec: &SchemaCodec,
    config: &ConsumerStreamConfig,
    registry: &mut HashMap<String, ConsumedRecord>,
    decode_errors: &AtomicU64,
    record: RawRecord,
) {
    let key = match codec
        .decode_event_key(&config.topic, &config.key_record, &record.key)
        .await
    {
        Ok(key) => key,
        Err(e) => {
            decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(target: "probe.streams", topic = %config.topic, offset = record.offset, error = %e, "key decode failed, skipping record");
            return;
        }
    };

    // The value subject is the decoded event type (one subject per record
    // name on the topic).
    if let Err(e) = codec.decode(&config.topic, &key.event_type, &record.value).await {
        decode_errors.fetch_add(1, Ordering::Relaxed);
        warn!(target: "probe.streams", topic = %config.topic, offset = record.offset, error = %e, "value decode failed, skipping record");
        return;
    }

    if !key.matches_any(&config.filters) {
        debug!(target: "probe.streams", topic = %config.topic, event_type = %key.event_type, "record filtered out");
        return;
    }

    // Idempotent insert: same eventId replaces, never duplicates.
    registry.insert(
        key.event_id.clone(),
        ConsumedRecord {
            event_id: key.event_id,
            key: record.key,
            value: record.value,
            headers: record.headers,
        },
    );
}

async fn commit_pending(
    client: &mut dyn ConsumerClient,
    topic: &str,
    pending: &mut HashMap<i32, i64>,
    pending_count: &mut usize,
) {
    let offsets: Vec<TopicOffset> = pending
        .iter()
        .map(|(&partition, &offset)| TopicOffset { partition, offset })
        .collect();
    match client.commit(&offsets).await {
        Ok(()) => {
            debug!(target: "probe.streams", topic, batch = *pending_count, "offsets committed");
            pending.clear();
            *pending_count = 0;
        }
        Err(e) => {
            // At-least-once: keep the batch pending and retry on the next
            // trigger.
            warn!(target: "probe.streams", topic, error = %e, "offset commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_broker::{InMemoryBroker, ProducerSpec};
    use probe_codec::{Payload, SchemaFormat, StaticSchemaRegistry};
    use probe_core::{Credentials, Envelope};
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(3600);

    fn codec() -> SchemaCodec {
        let mut registry = StaticSchemaRegistry::new();
        registry.register("orders-EventKey", 1, SchemaFormat::Json, r#"{"type":"object","required":["eventId","eventType","payloadVersion"]}"#);
        registry.register("orders-OrderCreated", 2, SchemaFormat::Json, r#"{"type":"object"}"#);
        registry.register("orders-OrderShipped", 3, SchemaFormat::Json, r#"{"type":"object"}"#);
        SchemaCodec::new(Arc::new(registry))
    }

    fn config(filters: Vec<EventFilter>) -> ConsumerStreamConfig {
        ConsumerStreamConfig {
            topic: "orders".into(),
            filters,
            key_record: "EventKey".into(),
            ask_timeout: Duration::from_secs(1),
            commit_batch_size: 1_000,
            commit_interval: LONG,
        }
    }

    fn spec() -> ConsumerSpec {
        ConsumerSpec {
            topic: "orders".into(),
            bootstrap_servers: "memory:0".into(),
            credentials: Credentials::new(),
            group_id: "test-group".into(),
        }
    }

    async fn publish(broker: &InMemoryBroker, event_id: &str, event_type: &str, body: serde_json::Value) {
        let codec = codec();
        let key = codec
            .encode(
                "orders",
                "EventKey",
                &Payload::Structured(json!({
                    "eventId": event_id,
                    "eventType": event_type,
                    "payloadVersion": "v1",
                })),
            )
            .await
            .unwrap();
        let value = codec
            .encode("orders", event_type, &Payload::Structured(body))
            .await
            .unwrap();
        let producer = broker
            .producer(&ProducerSpec {
                topic: "orders".into(),
                bootstrap_servers: "memory:0".into(),
                credentials: Credentials::new(),
            })
            .await
            .unwrap();
        producer.publish(Envelope::new(key, value)).await.unwrap();
    }

    async fn fetch_eventually(handle: &ConsumerHandle, event_id: &str) -> FetchReply {
        for _ in 0..50 {
            match handle.fetch(event_id).await {
                FetchReply::Nack { .. } => tokio::time::sleep(Duration::from_millis(20)).await,
                ack => return ack,
            }
        }
        handle.fetch(event_id).await
    }

    #[tokio::test]
    async fn consumed_events_are_fetchable() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(vec![]))
            .await
            .unwrap();

        publish(&broker, "e-1", "OrderCreated", json!({"total": 10})).await;

        match fetch_eventually(&handle, "e-1").await {
            FetchReply::Ack(record) => {
                assert_eq!(record.event_id, "e-1");
                assert_eq!(record.key[0], probe_codec::MAGIC_BYTE);
            }
            FetchReply::Nack { .. } => panic!("expected the event to be indexed"),
        }

        handle.stop().await;
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn registry_is_last_write_wins() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(vec![]))
            .await
            .unwrap();

        publish(&broker, "e-1", "OrderCreated", json!({"version": 1})).await;
        publish(&broker, "e-1", "OrderCreated", json!({"version": 2})).await;
        // A third event proves both earlier ones were seen.
        publish(&broker, "e-2", "OrderCreated", json!({})).await;
        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-2").await else {
            panic!("sentinel event missing")
        };

        match handle.fetch("e-1").await {
            FetchReply::Ack(record) => {
                let frame = probe_codec::wire::decode(&record.value).unwrap();
                let value: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
                assert_eq!(value["version"], 2, "second write must win");
            }
            FetchReply::Nack { .. } => panic!("expected the event"),
        }

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn filters_drop_non_matching_events() {
        let broker = InMemoryBroker::new();
        let filters = vec![EventFilter {
            key: "OrderCreated".into(),
            value: "v1".into(),
        }];
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(filters))
            .await
            .unwrap();

        publish(&broker, "e-keep", "OrderCreated", json!({})).await;
        publish(&broker, "e-drop", "OrderShipped", json!({})).await;

        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-keep").await else {
            panic!("matching event missing")
        };
        assert_eq!(handle.fetch("e-drop").await, FetchReply::Nack { status: 0 });

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(vec![]))
            .await
            .unwrap();

        broker.inject_raw("orders", b"garbage".to_vec(), b"garbage".to_vec()).await;
        publish(&broker, "e-after", "OrderCreated", json!({})).await;

        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-after").await else {
            panic!("valid record after a malformed one must still arrive")
        };
        assert_eq!(handle.decode_errors(), 1);

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn offsets_commit_on_batch_boundary() {
        let broker = InMemoryBroker::new();
        let mut cfg = config(vec![]);
        cfg.commit_batch_size = 2;
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), cfg)
            .await
            .unwrap();

        publish(&broker, "e-1", "OrderCreated", json!({})).await;
        publish(&broker, "e-2", "OrderCreated", json!({})).await;
        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-2").await else {
            panic!("events missing")
        };

        // Batch of 2 reached: the group offset must land at 2.
        for _ in 0..50 {
            if broker.committed_offset("orders", "test-group").await == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(broker.committed_offset("orders", "test-group").await, Some(2));

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn offsets_commit_on_interval() {
        let broker = InMemoryBroker::new();
        let mut cfg = config(vec![]);
        cfg.commit_interval = Duration::from_millis(50);
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), cfg)
            .await
            .unwrap();

        publish(&broker, "e-1", "OrderCreated", json!({})).await;
        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-1").await else {
            panic!("event missing")
        };

        for _ in 0..50 {
            if broker.committed_offset("orders", "test-group").await == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(broker.committed_offset("orders", "test-group").await, Some(1));

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_skips_final_commit() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(vec![]))
            .await
            .unwrap();

        publish(&broker, "e-1", "OrderCreated", json!({})).await;
        let FetchReply::Ack(_) = fetch_eventually(&handle, "e-1").await else {
            panic!("event missing")
        };

        handle.stop().await;
        task.await.unwrap();

        // Deliberately uncommitted: the record may be redelivered next run.
        assert_eq!(broker.committed_offset("orders", "test-group").await, None);
    }

    #[tokio::test]
    async fn fetch_unknown_event_is_nack_zero() {
        let broker = InMemoryBroker::new();
        let (handle, task) = spawn_consumer_stream(&broker, spec(), codec(), config(vec![]))
            .await
            .unwrap();
        assert_eq!(handle.fetch("ghost").await, FetchReply::Nack { status: 0 });
        handle.stop().await;
        task.await.unwrap();
    }
}
