use notify_common::dead_letter::PublishError;
use thiserror::Error;

use crate::ledger::LedgerError;

/// Failures an `EventHandler` can surface while processing one message.
/// The pipeline only ever inspects the variant, never the message content,
/// when deciding whether to retry.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("downstream call timed out")]
    Timeout,
    #[error("failed to reach downstream service: {0}")]
    Connection(String),
    #[error("downstream service unavailable (status {status})")]
    Unavailable { status: u16 },
    #[error("downstream service rejected the request (status {status})")]
    Rejected { status: u16 },
    #[error("downstream service rejected the payload: {0}")]
    Payload(String),
    #[error("integrity violation while persisting results: {0}")]
    Integrity(String),
    #[error("unexpected processing failure: {0}")]
    Other(String),
}

/// Reasons a message reached no terminal state. The offset for such a
/// message is never stored, so the transport redelivers it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("dead letter publish failed: {0}")]
    DeadLetter(#[from] PublishError),
    #[error("shutdown requested before the message reached a terminal state")]
    Interrupted,
}

/// Errors related to initialization and running of the consumer loop.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("partition worker for {topic}:{partition} stopped")]
    WorkerStopped { topic: String, partition: i32 },
}
