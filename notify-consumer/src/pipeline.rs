use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use notify_common::dead_letter::{DeadLetterRecord, DeadLetterSink, FailureKind};
use notify_common::event::{decode_envelope, EventPayload};
use notify_common::message::ReceivedMessage;
use notify_common::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::attempt::{AttemptOutcome, RetryController};
use crate::classify::{classify, FailureClass};
use crate::error::PipelineError;
use crate::handler::EventHandler;
use crate::ledger::{LedgerError, ProcessedEventLedger};

/// Terminal state of one message. Whatever the variant, the caller may
/// store the offset; an `Err` from [`MessagePipeline::handle`] means no
/// terminal state was reached and the offset must be left alone.
#[derive(Debug)]
pub enum Disposition {
    Processed { attempts: u32 },
    SkippedDuplicate,
    DeadLettered { kind: FailureKind, attempts: u32 },
}

#[async_trait]
pub trait MessagePipeline: Send + Sync {
    async fn handle(&self, message: ReceivedMessage) -> Result<Disposition, PipelineError>;
}

/// The per-message orchestration: decode, ledger short-circuit, retries,
/// record, dead-letter.
pub struct EventPipeline {
    handler: Arc<dyn EventHandler>,
    ledger: Arc<dyn ProcessedEventLedger>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    trusted_types: HashSet<String>,
    shutdown: watch::Receiver<bool>,
}

impl EventPipeline {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        ledger: Arc<dyn ProcessedEventLedger>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        trusted_types: HashSet<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler,
            ledger,
            dead_letters,
            policy,
            trusted_types,
            shutdown,
        }
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        kind: FailureKind,
        reason: String,
        attempts: u32,
    ) -> Result<Disposition, PipelineError> {
        let record = DeadLetterRecord::new(message, kind, reason, attempts);
        self.dead_letters.route(record).await?;

        metrics::counter!("notify_messages_dead_lettered").increment(1);

        Ok(Disposition::DeadLettered { kind, attempts })
    }
}

#[async_trait]
impl MessagePipeline for EventPipeline {
    async fn handle(&self, message: ReceivedMessage) -> Result<Disposition, PipelineError> {
        let event = match decode_envelope(&message.payload, &self.trusted_types) {
            Ok(EventPayload::ProductCreated(event)) => event,
            Err(decode_error) => {
                // Retrying cannot fix malformed bytes; route straight out.
                warn!(
                    topic = message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %decode_error,
                    "Failed to decode payload, routing to dead letter topic"
                );
                metrics::counter!("notify_decode_failures").increment(1);
                return self
                    .dead_letter(&message, FailureKind::Decode, decode_error.to_string(), 0)
                    .await;
            }
        };

        info!(
            title = event.title,
            product_id = %event.product_id,
            message_key = message.key.as_deref().unwrap_or(""),
            message_id = message.ledger_id(),
            topic = message.topic,
            partition = message.partition,
            offset = message.offset,
            timestamp = message.timestamp,
            "Received product event"
        );

        let message_id = message.ledger_id();
        if self.ledger.exists(&message_id).await? {
            info!(message_id, "Found a duplicate message id, skipping");
            metrics::counter!("notify_duplicates_skipped").increment(1);
            return Ok(Disposition::SkippedDuplicate);
        }

        let mut controller = RetryController::new(self.policy, self.shutdown.clone());
        let started = tokio::time::Instant::now();
        let outcome = controller
            .run(self.handler.as_ref(), &event, &message)
            .await
            .map_err(|_| PipelineError::Interrupted)?;

        match outcome {
            AttemptOutcome::Succeeded { attempts } => {
                match self.ledger.record(&message_id, event.product_id).await {
                    Ok(()) => {}
                    // Lost a recording race: someone else already processed
                    // this id, which is exactly the outcome we wanted.
                    Err(LedgerError::Duplicate) => {
                        info!(message_id, "Processed record already present, continuing");
                        metrics::counter!("notify_duplicates_skipped").increment(1);
                    }
                    Err(error) => return Err(PipelineError::Ledger(error)),
                }

                metrics::counter!("notify_messages_processed").increment(1);
                metrics::histogram!("notify_handler_duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                Ok(Disposition::Processed { attempts })
            }
            AttemptOutcome::DeadLettered { error, attempts } => {
                let kind = match classify(&error) {
                    FailureClass::NonRetryable => FailureKind::NonRetryable,
                    FailureClass::Retryable => FailureKind::RetriesExhausted,
                };
                self.dead_letter(&message, kind, error.to_string(), attempts)
                    .await
            }
        }
    }
}
