use std::sync::Arc;

use notify_common::message::ReceivedMessage;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::MessagePipeline;

#[derive(Debug, Error)]
pub enum OffsetStoreError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer gone")]
    Gone,
}

/// Marks a message's offset as safe to commit. Only called after the
/// message reached a terminal state.
pub trait OffsetStore: Send + Sync {
    fn store(&self, topic: &str, partition: i32, offset: i64) -> Result<(), OffsetStoreError>;
}

/// A dedicated worker for one partition. Messages flow through a bounded
/// channel and are processed strictly in delivery order, so a retry delay
/// stalls this partition alone while the others keep draining.
pub struct PartitionWorker {
    sender: mpsc::Sender<ReceivedMessage>,
    handle: Option<JoinHandle<()>>,
}

impl PartitionWorker {
    pub fn spawn<P, S>(
        topic: String,
        partition: i32,
        pipeline: Arc<P>,
        offsets: Arc<S>,
        channel_depth: usize,
    ) -> Self
    where
        P: MessagePipeline + 'static,
        S: OffsetStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(channel_depth);

        let handle = tokio::spawn(async move {
            run_worker(topic, partition, receiver, pipeline, offsets).await;
        });

        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// Hand a message to this worker, waiting when the partition is backed
    /// up. Fails only if the worker has stopped.
    pub async fn send(
        &self,
        message: ReceivedMessage,
    ) -> Result<(), mpsc::error::SendError<ReceivedMessage>> {
        self.sender.send(message).await
    }

    /// Stop feeding the worker and wait for it to drain its queue.
    pub async fn shutdown(mut self) {
        drop(self.sender);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Partition worker panicked during shutdown: {}", e);
            }
        }
    }
}

async fn run_worker<P, S>(
    topic: String,
    partition: i32,
    mut receiver: mpsc::Receiver<ReceivedMessage>,
    pipeline: Arc<P>,
    offsets: Arc<S>,
) where
    P: MessagePipeline + 'static,
    S: OffsetStore + 'static,
{
    info!(topic, partition, "Starting partition worker");

    while let Some(message) = receiver.recv().await {
        let offset = message.offset;

        match pipeline.handle(message).await {
            Ok(disposition) => {
                debug!(topic, partition, offset, ?disposition, "Message reached terminal state");

                if let Err(e) = offsets.store(&topic, partition, offset) {
                    error!(
                        topic,
                        partition,
                        offset,
                        error = %e,
                        "Failed to store offset, stopping partition worker"
                    );
                    break;
                }
            }
            Err(PipelineError::Interrupted) => {
                info!(
                    topic,
                    partition, offset, "Shutdown during processing, offset not stored"
                );
                break;
            }
            Err(e) => {
                // No terminal state: leave the offset unstored so the
                // message is redelivered, and escalate by stopping.
                error!(
                    topic,
                    partition,
                    offset,
                    error = %e,
                    "Message reached no terminal state, stopping partition worker"
                );
                break;
            }
        }
    }

    info!(topic, partition, "Partition worker shutting down");
}
