// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! rdkafka adapter.
//!
//! Credentials are threaded into the client config uninterpreted: every
//! `(field, value)` pair becomes an rdkafka config entry, so SASL/SSL setups
//! are entirely a vault concern.

use crate::{
    BrokerError, BrokerFactory, ConsumerClient, ConsumerSpec, ProducerClient, ProducerSpec,
    RawRecord, TopicOffset,
};
use async_trait::async_trait;
use probe_core::{Credentials, Envelope};
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Factory for real Kafka clients.
#[derive(Debug, Clone, Default)]
pub struct KafkaBroker;

impl KafkaBroker {
    /// Create the factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn base_config(bootstrap_servers: &str, credentials: &Credentials) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", bootstrap_servers);
    for (field, value) in credentials.iter() {
        config.set(field, value);
    }
    config
}

#[async_trait]
impl BrokerFactory for KafkaBroker {
    async fn producer(&self, spec: &ProducerSpec) -> Result<Box<dyn ProducerClient>, BrokerError> {
        let producer: FutureProducer = base_config(&spec.bootstrap_servers, &spec.credentials)
            .create()
            .map_err(|e| BrokerError::Connect {
                reason: e.to_string(),
            })?;
        debug!(target: "probe.broker", topic = %spec.topic, "kafka producer created");
        Ok(Box::new(KafkaProducer {
            producer,
            topic: spec.topic.clone(),
        }))
    }

    async fn consumer(&self, spec: &ConsumerSpec) -> Result<Box<dyn ConsumerClient>, BrokerError> {
        let mut config = base_config(&spec.bootstrap_servers, &spec.credentials);
        config.set("group.id", &spec.group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = config.create().map_err(|e| BrokerError::Connect {
            reason: e.to_string(),
        })?;
        consumer
            .subscribe(&[spec.topic.as_str()])
            .map_err(|e| BrokerError::Connect {
                reason: e.to_string(),
            })?;
        debug!(
            target: "probe.broker",
            topic = %spec.topic,
            group = %spec.group_id,
            "kafka consumer created"
        );
        Ok(Box::new(KafkaConsumer {
            consumer: Some(consumer),
            topic: spec.topic.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

#[async_trait]
impl ProducerClient for KafkaProducer {
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &envelope.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(&self.topic)
            .key(&envelope.key)
            .payload(&envelope.value)
            .headers(headers);

        self.producer
            .send(record, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Publish {
                reason: e.to_string(),
            })
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| BrokerError::Publish {
                reason: e.to_string(),
            })
    }

    async fn close(&self) {
        // Dropping the FutureProducer closes the underlying client; a bounded
        // flush is the producer stream's responsibility before it stops.
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

struct KafkaConsumer {
    consumer: Option<StreamConsumer>,
    topic: String,
}

#[async_trait]
impl ConsumerClient for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, BrokerError> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Err(BrokerError::Consume {
                reason: "client is closed".into(),
            });
        };

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(Vec::new()),
            Ok(Err(e)) => Err(BrokerError::Consume {
                reason: e.to_string(),
            }),
            Ok(Ok(message)) => {
                let mut headers = BTreeMap::new();
                if let Some(borrowed) = message.headers() {
                    for header in borrowed.iter() {
                        if let Some(value) = header.value {
                            headers.insert(
                                header.key.to_string(),
                                String::from_utf8_lossy(value).to_string(),
                            );
                        }
                    }
                }
                Ok(vec![RawRecord {
                    key: message.key().unwrap_or_default().to_vec(),
                    value: message.payload().unwrap_or_default().to_vec(),
                    headers,
                    partition: message.partition(),
                    offset: message.offset(),
                }])
            }
        }
    }

    async fn commit(&mut self, offsets: &[TopicOffset]) -> Result<(), BrokerError> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Err(BrokerError::Commit {
                reason: "client is closed".into(),
            });
        };

        let mut list = rdkafka::TopicPartitionList::new();
        for tp in offsets {
            list.add_partition_offset(
                &self.topic,
                tp.partition,
                rdkafka::Offset::Offset(tp.offset),
            )
            .map_err(|e| BrokerError::Commit {
                reason: e.to_string(),
            })?;
        }
        consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| BrokerError::Commit {
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        // Dropping the StreamConsumer stops the broker control immediately;
        // deliberately no final commit here.
        self.consumer.take();
    }
}
