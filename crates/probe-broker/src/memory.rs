// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! In-memory broker adapter.
//!
//! Single-partition topic logs with per-group committed offsets. Enough
//! broker semantics for local mode and the test suite: publish appends,
//! consumers start from their group's committed offset, commits are
//! at-least-once, and uncommitted records are redelivered to a new client
//! of the same group.

use crate::{
    BrokerError, BrokerFactory, ConsumerClient, ConsumerSpec, ProducerClient, ProducerSpec,
    RawRecord, TopicOffset,
};
use async_trait::async_trait;
use probe_core::Envelope;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Default)]
struct TopicLog {
    records: Vec<RawRecord>,
    /// Next-offset-to-read per consumer group.
    committed: HashMap<String, i64>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    /// Topics whose clients fail to create (fault injection).
    broken_topics: HashSet<String>,
}

/// A shared in-memory broker; clones refer to the same cluster.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    arrivals: Arc<Notify>,
}

impl InMemoryBroker {
    /// Fresh empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every client creation for `topic` fail with
    /// [`BrokerError::Connect`].
    pub async fn break_topic(&self, topic: &str) {
        self.state
            .lock()
            .await
            .broken_topics
            .insert(topic.to_string());
    }

    /// Append a raw record directly to a topic log, bypassing any codec.
    /// Tests use this to inject malformed payloads.
    pub async fn inject_raw(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) {
        let mut state = self.state.lock().await;
        let log = state.topics.entry(topic.to_string()).or_default();
        let offset = log.records.len() as i64;
        log.records.push(RawRecord {
            key,
            value,
            headers: BTreeMap::new(),
            partition: 0,
            offset,
        });
        drop(state);
        self.arrivals.notify_waiters();
    }

    /// All records currently in a topic log (test observability).
    pub async fn records(&self, topic: &str) -> Vec<RawRecord> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// The committed next-offset for a group on a topic, if any.
    pub async fn committed_offset(&self, topic: &str, group_id: &str) -> Option<i64> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .and_then(|log| log.committed.get(group_id).copied())
    }
}

#[async_trait]
impl BrokerFactory for InMemoryBroker {
    async fn producer(&self, spec: &ProducerSpec) -> Result<Box<dyn ProducerClient>, BrokerError> {
        let state = self.state.lock().await;
        if state.broken_topics.contains(&spec.topic) {
            return Err(BrokerError::Connect {
                reason: format!("topic '{}' is unreachable", spec.topic),
            });
        }
        drop(state);
        debug!(target: "probe.broker", topic = %spec.topic, "in-memory producer created");
        Ok(Box::new(MemoryProducer {
            broker: self.clone(),
            topic: spec.topic.clone(),
            closed: Mutex::new(false),
        }))
    }

    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn ConsumerClient>, BrokerError> {
        let mut state = self.state.lock().await;
        if state.broken_topics.contains(&spec.topic) {
            return Err(BrokerError::Connect {
                reason: format!("topic '{}' is unreachable", spec.topic),
            });
        }
        // Resume from the group's committed offset; fresh groups start at 0.
        let position = state
            .topics
            .entry(spec.topic.clone())
            .or_default()
            .committed
            .get(&spec.group_id)
            .copied()
            .unwrap_or(0);
        drop(state);
        debug!(
            target: "probe.broker",
            topic = %spec.topic,
            group = %spec.group_id,
            position,
            "in-memory consumer created"
        );
        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            topic: spec.topic.clone(),
            group_id: spec.group_id.clone(),
            position,
            closed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

struct MemoryProducer {
    broker: InMemoryBroker,
    topic: String,
    closed: Mutex<bool>,
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if *self.closed.lock().await {
            return Err(BrokerError::Publish {
                reason: "client is closed".into(),
            });
        }
        let mut state = self.broker.state.lock().await;
        let log = state.topics.entry(self.topic.clone()).or_default();
        let offset = log.records.len() as i64;
        log.records.push(RawRecord {
            key: envelope.key,
            value: envelope.value,
            headers: envelope.headers,
            partition: 0,
            offset,
        });
        drop(state);
        self.broker.arrivals.notify_waiters();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        // Publishes are applied synchronously; nothing is ever in flight.
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock().await = true;
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

struct MemoryConsumer {
    broker: InMemoryBroker,
    topic: String,
    group_id: String,
    position: i64,
    closed: bool,
}

impl MemoryConsumer {
    async fn take_available(&mut self) -> Vec<RawRecord> {
        let state = self.broker.state.lock().await;
        let Some(log) = state.topics.get(&self.topic) else {
            return Vec::new();
        };
        let from = usize::try_from(self.position).unwrap_or(usize::MAX);
        if from >= log.records.len() {
            return Vec::new();
        }
        let batch: Vec<RawRecord> = log.records[from..].to_vec();
        self.position = log.records.len() as i64;
        batch
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Consume {
                reason: "client is closed".into(),
            });
        }

        // Register interest before checking so an arrival between the check
        // and the wait cannot be missed.
        let arrivals = self.broker.arrivals.clone();
        let notified = arrivals.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = self.take_available().await;
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Nothing buffered; wait for an arrival or the deadline.
        tokio::select! {
            () = &mut notified => Ok(self.take_available().await),
            () = tokio::time::sleep(timeout) => Ok(Vec::new()),
        }
    }

    async fn commit(&mut self, offsets: &[TopicOffset]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Commit {
                reason: "client is closed".into(),
            });
        }
        let mut state = self.broker.state.lock().await;
        let log = state.topics.entry(self.topic.clone()).or_default();
        for tp in offsets {
            let entry = log.committed.entry(self.group_id.clone()).or_insert(0);
            if tp.offset > *entry {
                *entry = tp.offset;
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
