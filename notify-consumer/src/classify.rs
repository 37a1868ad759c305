use crate::error::ProcessingError;

/// Whether a failed attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    NonRetryable,
}

/// Map a processing failure to its class. Total over the error taxonomy and
/// free of side effects; unknown conditions fail closed as non-retryable so
/// they surface on the dead-letter topic instead of retrying forever.
pub fn classify(error: &ProcessingError) -> FailureClass {
    match error {
        ProcessingError::Timeout => FailureClass::Retryable,
        ProcessingError::Connection(_) => FailureClass::Retryable,
        ProcessingError::Unavailable { .. } => FailureClass::Retryable,
        ProcessingError::Rejected { .. } => FailureClass::NonRetryable,
        ProcessingError::Payload(_) => FailureClass::NonRetryable,
        ProcessingError::Integrity(_) => FailureClass::NonRetryable,
        ProcessingError::Other(_) => FailureClass::NonRetryable,
    }
}
