use crate::cdc::{PrimaryKey, Row};
use crate::config::KafkaConfig;
use crate::sink::{Envelope, EventSink, JsonSerializer};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, instrument};

/// Publishes events to Kafka, one topic per expanded tag.
///
/// Messages are keyed by the primary-key value so every change to a row
/// lands on the same partition.
pub struct KafkaSink {
    producer: FutureProducer,
    serializer: JsonSerializer,
    key_column: String,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig, serializer: JsonSerializer, key_column: &str) -> Result<Self> {
        let producer: FutureProducer = client_config(config).create()?;

        Ok(Self {
            producer,
            serializer,
            key_column: key_column.to_string(),
        })
    }
}

/// Kafka message key: the record's primary-key value, if present.
pub(crate) fn message_key(record: &Row, key_column: &str) -> Option<String> {
    record
        .get(key_column)
        .and_then(PrimaryKey::from_value)
        .map(|key| key.to_string())
}

pub(crate) fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.brokers.join(","))
        .set("compression.type", &config.compression)
        .set("acks", &config.acks)
        .set("linger.ms", config.linger_ms.to_string())
        .set("batch.size", config.batch_size.to_string())
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client
}

#[async_trait]
impl EventSink for KafkaSink {
    #[instrument(skip(self, record), fields(topic = %tag))]
    async fn emit(&self, tag: &str, time: DateTime<Utc>, record: &Row) -> Result<()> {
        let payload = self.serializer.serialize(&Envelope { tag, time, record })?;
        let key = message_key(record, &self.key_column);

        let mut message = FutureRecord::to(tag)
            .payload(&payload)
            .timestamp(time.timestamp_millis());
        if let Some(key) = key.as_deref() {
            message = message.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(message, Timeout::Never)
            .await
            .map_err(|(e, _)| Error::Kafka(e))?;

        debug!(partition, offset, "Event delivered");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        // rd_kafka_flush blocks the calling thread until the queue drains
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(Duration::from_secs(30)))
        })
        .await??;
        Ok(())
    }
}
