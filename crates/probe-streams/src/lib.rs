// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! probe-streams
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Consumer stream actor.
pub mod consumer;
/// Producer stream actor.
pub mod producer;

pub use consumer::{ConsumerHandle, ConsumerStreamConfig, FetchReply, spawn_consumer_stream};
pub use producer::{
    ProduceReply, ProduceRequest, ProducerHandle, ProducerStreamConfig, spawn_producer_stream,
};

use std::collections::BTreeMap;
use thiserror::Error;

/// Inbox capacity for stream actors.
pub(crate) const INBOX_CAPACITY: usize = 64;

/// Errors raised while standing up a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The broker client could not be created.
    #[error("stream startup failed for topic '{topic}': {reason}")]
    Startup {
        /// Topic the stream was bound to.
        topic: String,
        /// Human-readable failure detail.
        reason: String,
    },
}

/// The stream handles of one running test, keyed by topic.
///
/// Handed to the scenario runtime so scenario steps can produce commands
/// and fetch consumed events.
#[derive(Clone, Default)]
pub struct StreamSet {
    producers: BTreeMap<String, ProducerHandle>,
    consumers: BTreeMap<String, ConsumerHandle>,
}

impl StreamSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer handle under its topic.
    pub fn insert_producer(&mut self, handle: ProducerHandle) {
        self.producers.insert(handle.topic().to_string(), handle);
    }

    /// Register a consumer handle under its topic.
    pub fn insert_consumer(&mut self, handle: ConsumerHandle) {
        self.consumers.insert(handle.topic().to_string(), handle);
    }

    /// Producer handle for `topic`, if one was spawned.
    #[must_use]
    pub fn producer(&self, topic: &str) -> Option<&ProducerHandle> {
        self.producers.get(topic)
    }

    /// Consumer handle for `topic`, if one was spawned.
    #[must_use]
    pub fn consumer(&self, topic: &str) -> Option<&ConsumerHandle> {
        self.consumers.get(topic)
    }

    /// All producer topics.
    pub fn producer_topics(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// All consumer topics.
    pub fn consumer_topics(&self) -> impl Iterator<Item = &str> {
        self.consumers.keys().map(String::as_str)
    }

    /// Send `Stop` to every stream. Producer stops flush bounded; consumer
    /// stops are immediate.
    pub async fn stop_all(&self) {
        for handle in self.producers.values() {
            handle.stop().await;
        }
        for handle in self.consumers.values() {
            handle.stop().await;
        }
    }

    /// Whether every stream actor has terminated (all inboxes closed).
    #[must_use]
    pub fn all_stopped(&self) -> bool {
        self.producers.values().all(ProducerHandle::is_closed)
            && self.consumers.values().all(ConsumerHandle::is_closed)
    }
}
