use std::time::Duration;

use notify_common::event::ProductCreated;
use notify_common::message::ReceivedMessage;
use notify_common::retry::RetryPolicy;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use crate::classify::{classify, FailureClass};
use crate::error::ProcessingError;
use crate::handler::EventHandler;

/// Where one attempt sequence currently stands. Both remaining variants are
/// in-flight; terminal outcomes leave the loop through [`AttemptOutcome`].
enum AttemptState {
    Attempting,
    Waiting(Duration),
}

/// Terminal result of an attempt sequence. Every handler failure resolves
/// to one of these; nothing propagates past the controller.
#[derive(Debug)]
pub enum AttemptOutcome {
    Succeeded {
        attempts: u32,
    },
    DeadLettered {
        error: ProcessingError,
        attempts: u32,
    },
}

/// Shutdown arrived while the sequence was in flight. The message has no
/// terminal state and its offset must not be stored.
#[derive(Error, Debug)]
#[error("shutdown requested during an attempt sequence")]
pub struct Interrupted;

/// Drives a message through `Attempting`/`Waiting` until it succeeds, runs
/// out of attempts, or hits a non-retryable failure. The wait only ever
/// suspends the calling task, so other partitions keep moving.
pub struct RetryController {
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, shutdown: watch::Receiver<bool>) -> Self {
        Self { policy, shutdown }
    }

    pub async fn run(
        &mut self,
        handler: &dyn EventHandler,
        event: &ProductCreated,
        message: &ReceivedMessage,
    ) -> Result<AttemptOutcome, Interrupted> {
        let mut attempt: u32 = 0;
        let mut state = AttemptState::Attempting;

        loop {
            match state {
                AttemptState::Attempting => {
                    attempt += 1;

                    let error = match handler.process(event, message).await {
                        Ok(()) => return Ok(AttemptOutcome::Succeeded { attempts: attempt }),
                        Err(error) => error,
                    };

                    match classify(&error) {
                        FailureClass::NonRetryable => {
                            return Ok(AttemptOutcome::DeadLettered {
                                error,
                                attempts: attempt,
                            });
                        }
                        FailureClass::Retryable if !self.policy.can_retry(attempt) => {
                            return Ok(AttemptOutcome::DeadLettered {
                                error,
                                attempts: attempt,
                            });
                        }
                        FailureClass::Retryable => {
                            let delay = self.policy.time_until_next_retry(attempt);
                            warn!(
                                message_id = message.ledger_id(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Attempt failed with a transient error, will retry"
                            );
                            metrics::counter!("notify_retries").increment(1);
                            state = AttemptState::Waiting(delay);
                        }
                    }
                }
                AttemptState::Waiting(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            state = AttemptState::Attempting;
                        }
                        _ = self.shutdown.wait_for(|stop| *stop) => {
                            return Err(Interrupted);
                        }
                    }
                }
            }
        }
    }
}
