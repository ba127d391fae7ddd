// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-broker
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-memory broker adapter.
pub mod memory;

/// rdkafka adapter (enable the `kafka` feature).
#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use probe_core::{Credentials, Envelope};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by broker clients.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The client could not be created or could not reach the cluster.
    #[error("broker connect failed: {reason}")]
    Connect {
        /// Human-readable failure detail.
        reason: String,
    },

    /// A publish was not acknowledged.
    #[error("publish failed: {reason}")]
    Publish {
        /// Human-readable failure detail.
        reason: String,
    },

    /// A poll failed.
    #[error("consume failed: {reason}")]
    Consume {
        /// Human-readable failure detail.
        reason: String,
    },

    /// An offset commit failed.
    #[error("offset commit failed: {reason}")]
    Commit {
        /// Human-readable failure detail.
        reason: String,
    },

    /// The client was already closed.
    #[error("client is closed")]
    Closed,
}

/// A record as it comes off the broker, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Raw key bytes.
    pub key: Vec<u8>,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Broker headers.
    pub headers: BTreeMap<String, String>,
    /// Partition the record came from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// One partition/offset pair to commit (the offset of the *next* record to
/// read, per broker convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicOffset {
    /// Partition.
    pub partition: i32,
    /// Next offset to read.
    pub offset: i64,
}

/// What a producer client is created from.
#[derive(Debug, Clone)]
pub struct ProducerSpec {
    /// Topic the client publishes to.
    pub topic: String,
    /// Effective bootstrap servers.
    pub bootstrap_servers: String,
    /// Per-topic credentials, passed through uninterpreted.
    pub credentials: Credentials,
}

/// What a consumer client is created from.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Topic the client consumes from.
    pub topic: String,
    /// Effective bootstrap servers.
    pub bootstrap_servers: String,
    /// Per-topic credentials, passed through uninterpreted.
    pub credentials: Credentials,
    /// Consumer group id (derived from `(testId, topic)` by the caller).
    pub group_id: String,
}

/// Publishes envelopes to one topic.
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Publish an envelope; resolves once the broker acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] when the broker refuses or the
    /// client is closed.
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError>;

    /// Flush outstanding in-flight records, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] when the flush cannot complete.
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Close the client. Idempotent.
    async fn close(&self);
}

/// Consumes raw records from one topic on behalf of one group.
#[async_trait]
pub trait ConsumerClient: Send {
    /// Poll for the next batch of records, waiting at most `timeout`.
    /// An empty batch means the deadline passed quietly.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Consume`] on transport failure.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, BrokerError>;

    /// Commit the given offsets for this client's group. At-least-once:
    /// records below a committed offset are never redelivered, records at
    /// or above it may be.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Commit`] on transport failure.
    async fn commit(&mut self, offsets: &[TopicOffset]) -> Result<(), BrokerError>;

    /// Stop the broker control immediately. No drain, no final commit.
    async fn close(&mut self);
}

/// Creates per-topic broker clients.
#[async_trait]
pub trait BrokerFactory: Send + Sync {
    /// Create a producer client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connect`] when the client cannot be created.
    async fn producer(&self, spec: &ProducerSpec) -> Result<Box<dyn ProducerClient>, BrokerError>;

    /// Create a consumer client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connect`] when the client cannot be created.
    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn ConsumerClient>, BrokerError>;
}
