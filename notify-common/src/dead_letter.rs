use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;
use chrono::{DateTime, Utc};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::message::ReceivedMessage;

/// Why a message ended up on the dead-letter topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The payload could not be decoded; never attempted.
    Decode,
    /// The first failure was permanent.
    NonRetryable,
    /// Every allowed attempt failed with a transient error.
    RetriesExhausted,
}

/// A permanently-failed message plus the context needed to diagnose it.
/// The original payload travels along base64-encoded so nothing is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub payload_base64: String,
    pub failure_kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
    pub routed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        message: &ReceivedMessage,
        failure_kind: FailureKind,
        reason: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            message_id: message.ledger_id(),
            source_topic: message.topic.clone(),
            source_partition: message.partition,
            source_offset: message.offset,
            key: message.key.clone(),
            payload_base64: BASE64.encode(&message.payload),
            failure_kind,
            reason: reason.into(),
            attempts,
            routed_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize dead letter record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to publish dead letter record: {0}")]
    Kafka(#[from] KafkaError),
}

/// The last line of defense before data loss. Implementations must only
/// return `Ok` once the record is durably accepted by the channel; callers
/// escalate on error instead of dropping the message.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), PublishError>;
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&record)?;
        let key = record.key.as_deref().unwrap_or(&record.message_id);

        self.producer
            .send(
                FutureRecord::to(&self.topic).key(key).payload(&payload),
                Duration::from_secs(0),
            )
            .await
            .map_err(|(err, _)| PublishError::Kafka(err))?;

        info!(
            topic = self.topic,
            message_id = record.message_id,
            attempts = record.attempts,
            reason = record.reason,
            "Routed message to dead letter topic"
        );

        Ok(())
    }
}
