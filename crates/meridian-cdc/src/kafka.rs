//! `rdkafka`-backed [`LogSource`] for production deployments.
//!
//! Ack semantics: `enable.auto.offset.store` is disabled, so offsets are
//! only staged for commit when the materializer calls
//! [`KafkaLogSource::ack`] after a record's downstream effect is durable.
//! `enable.auto.commit` stays on to flush those staged offsets on the
//! periodic interval. A crash between `recv()` and `ack()` leaves the
//! offset unstaged, so the broker redelivers the record — exactly what
//! the materializer's idempotent apply step is built to tolerate.

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};

use crate::error::CdcError;
use crate::source::{LogRecord, LogSource};

/// Configuration for connecting to the upstream broker.
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    /// `bootstrap.servers` value.
    pub brokers: String,
    /// Consumer group id.
    pub group_id: String,
    /// Topic carrying the CDC envelopes.
    pub topic: String,
}

/// [`LogSource`] backed by a `rdkafka` `StreamConsumer`.
pub struct KafkaLogSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaLogSource {
    /// Build and subscribe a consumer per `config`.
    pub fn connect(config: &KafkaSourceConfig) -> Result<Self, CdcError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(connect_err)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(connect_err)?;

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn connect_err(err: KafkaError) -> CdcError {
    CdcError::SourceConnectionFailed {
        reason: err.to_string(),
    }
}

#[async_trait]
impl LogSource for KafkaLogSource {
    async fn next_batch(&self, max: usize) -> crate::error::CdcResult<Vec<LogRecord>> {
        let mut records = Vec::with_capacity(max);

        for _ in 0..max {
            let message = match tokio::time::timeout(
                std::time::Duration::from_millis(500),
                self.consumer.recv(),
            )
            .await
            {
                Ok(Ok(message)) => message,
                Ok(Err(err)) => return Err(connect_err(err)),
                Err(_elapsed) => break, // no more records within the poll window
            };

            let key = message
                .key()
                .and_then(|bytes| serde_json::from_slice(bytes).ok());
            let value = message
                .payload()
                .and_then(|bytes| serde_json::from_slice(bytes).ok());

            records.push(LogRecord {
                partition: message.partition(),
                offset: message.offset(),
                key,
                value,
            });
        }

        Ok(records)
    }

    async fn ack(&self, partition: i32, offset: i64) -> crate::error::CdcResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
            .map_err(connect_err)?;
        self.consumer.store_offsets(&tpl).map_err(connect_err)?;
        Ok(())
    }
}
