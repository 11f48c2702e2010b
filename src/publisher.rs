//! Event publication to Kafka
//!
//! One record per event: key is the `0x` transaction hash, value is the
//! JSON-encoded [`TransactionEvent`]. Sends wait for acknowledgement from
//! all in-sync replicas.

use crate::records::TransactionEvent;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kafka::producer::{Producer, Record, RequiredAcks};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// How long the broker may take to acknowledge a send.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Sink for matched-transaction events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event synchronously, keyed by its transaction hash.
    async fn publish(&self, event: &TransactionEvent) -> Result<Delivery>;
}

/// Synchronous Kafka producer driven from a blocking task.
pub struct KafkaPublisher {
    producer: Arc<Mutex<Producer>>,
    topic: String,
}

impl KafkaPublisher {
    /// Connect to `brokers` and bind to `topic`.
    pub fn connect(brokers: Vec<String>, topic: String, client_id: String) -> Result<Self> {
        let producer = Producer::from_hosts(brokers.clone())
            .with_ack_timeout(ACK_TIMEOUT)
            .with_required_acks(RequiredAcks::All)
            .with_client_id(client_id)
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka producer for {:?}: {}", brokers, e))?;

        info!(?brokers, topic = %topic, "Kafka producer ready");
        Ok(Self {
            producer: Arc::new(Mutex::new(producer)),
            topic,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, event: &TransactionEvent) -> Result<Delivery> {
        let key = event.transaction_hash.clone();
        let value = event.to_json().context("Failed to marshal event")?;
        let producer = Arc::clone(&self.producer);
        let topic = self.topic.clone();

        tokio::task::spawn_blocking(move || send_one(&producer, &topic, &key, &value))
            .await
            .context("Kafka send task panicked")?
    }
}

fn send_one(
    producer: &Mutex<Producer>,
    topic: &str,
    key: &str,
    value: &[u8],
) -> Result<Delivery> {
    let mut producer = producer.lock().unwrap_or_else(|e| e.into_inner());
    let confirms = producer
        .send_all(&[Record::from_key_value(topic, key.as_bytes(), value)])
        .map_err(|e| anyhow!("Failed to send message to Kafka: {}", e))?;

    let confirm = confirms
        .iter()
        .flat_map(|c| c.partition_confirms.iter())
        .next()
        .context("Kafka returned no delivery confirmation")?;

    let offset = confirm
        .offset
        .as_ref()
        .copied()
        .map_err(|code| anyhow!("Kafka rejected message: {:?}", code))?;

    Ok(Delivery {
        partition: confirm.partition,
        offset,
    })
}
