//! End-to-end pipeline behavior against in-memory collaborators: one
//! handler invocation per distinct message id, bounded retries, accurate
//! dead-letter metadata, and no offset-worthy outcome without a terminal
//! state.
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify_common::dead_letter::{DeadLetterRecord, DeadLetterSink, FailureKind, PublishError};
use notify_common::event::{EventPayload, ProductCreated};
use notify_common::message::ReceivedMessage;
use notify_common::retry::RetryPolicy;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tokio::sync::watch;
use uuid::Uuid;

use notify_consumer::error::{PipelineError, ProcessingError};
use notify_consumer::handler::EventHandler;
use notify_consumer::ledger::{LedgerError, ProcessedEventLedger};
use notify_consumer::pipeline::{Disposition, EventPipeline, MessagePipeline};

struct ScriptedHandler {
    calls: AtomicUsize,
    failures: Vec<fn() -> ProcessingError>,
}

impl ScriptedHandler {
    fn new(failures: Vec<fn() -> ProcessingError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn process(
        &self,
        _event: &ProductCreated,
        _message: &ReceivedMessage,
    ) -> Result<(), ProcessingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.get(call) {
            Some(make_error) => Err(make_error()),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct InMemoryLedger {
    records: Mutex<HashSet<String>>,
}

impl InMemoryLedger {
    fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessedEventLedger for InMemoryLedger {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError> {
        Ok(self.records.lock().unwrap().contains(message_id))
    }

    async fn record(&self, message_id: &str, _product_id: Uuid) -> Result<(), LedgerError> {
        if !self.records.lock().unwrap().insert(message_id.to_string()) {
            return Err(LedgerError::Duplicate);
        }
        Ok(())
    }
}

/// A ledger where another consumer always wins the recording race:
/// `exists` says the message is fresh but every insert reports a duplicate.
struct RacingLedger;

#[async_trait]
impl ProcessedEventLedger for RacingLedger {
    async fn exists(&self, _message_id: &str) -> Result<bool, LedgerError> {
        Ok(false)
    }

    async fn record(&self, _message_id: &str, _product_id: Uuid) -> Result<(), LedgerError> {
        Err(LedgerError::Duplicate)
    }
}

#[derive(Default)]
struct CollectingSink {
    routed: Mutex<Vec<DeadLetterRecord>>,
}

impl CollectingSink {
    fn routed(&self) -> Vec<DeadLetterRecord> {
        self.routed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for CollectingSink {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), PublishError> {
        self.routed.lock().unwrap().push(record);
        Ok(())
    }
}

/// The dead-letter channel is down.
struct UnavailableSink;

#[async_trait]
impl DeadLetterSink for UnavailableSink {
    async fn route(&self, _record: DeadLetterRecord) -> Result<(), PublishError> {
        Err(PublishError::Kafka(KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageTimedOut,
        )))
    }
}

fn trusted_types() -> HashSet<String> {
    HashSet::from(["product-created".to_string()])
}

fn test_policy() -> RetryPolicy {
    RetryPolicy::new(3, 1, Duration::from_millis(5), None)
}

fn product_message(message_id: &str, offset: i64) -> ReceivedMessage {
    let payload = serde_json::to_vec(&EventPayload::ProductCreated(ProductCreated {
        product_id: Uuid::now_v7(),
        title: "Wireless Keyboard".to_string(),
        price: 4999,
        quantity: 12,
    }))
    .unwrap();

    ReceivedMessage {
        message_id: Some(message_id.to_string()),
        key: Some("product-1".to_string()),
        topic: "product-created-events".to_string(),
        partition: 0,
        offset,
        timestamp: 1700000000000,
        payload,
    }
}

struct Harness {
    handler: Arc<ScriptedHandler>,
    ledger: Arc<InMemoryLedger>,
    sink: Arc<CollectingSink>,
    pipeline: EventPipeline,
    _shutdown: watch::Sender<bool>,
}

fn harness(failures: Vec<fn() -> ProcessingError>) -> Harness {
    let handler = Arc::new(ScriptedHandler::new(failures));
    let ledger = Arc::new(InMemoryLedger::default());
    let sink = Arc::new(CollectingSink::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = EventPipeline::new(
        handler.clone(),
        ledger.clone(),
        sink.clone(),
        test_policy(),
        trusted_types(),
        shutdown_rx,
    );

    Harness {
        handler,
        ledger,
        sink,
        pipeline,
        _shutdown: shutdown_tx,
    }
}

#[tokio::test]
async fn test_success_on_first_attempt() {
    let h = harness(vec![]);

    let disposition = h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();

    assert!(matches!(disposition, Disposition::Processed { attempts: 1 }));
    assert_eq!(h.handler.calls(), 1);
    assert_eq!(h.ledger.record_count(), 1);
    assert!(h.sink.routed().is_empty());
}

#[tokio::test]
async fn test_transient_failures_recover_within_max_attempts() {
    let h = harness(vec![
        || ProcessingError::Connection("connection reset".to_string()),
        || ProcessingError::Connection("connection reset".to_string()),
    ]);

    let disposition = h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();

    assert!(matches!(disposition, Disposition::Processed { attempts: 3 }));
    assert_eq!(h.handler.calls(), 3);
    assert_eq!(h.ledger.record_count(), 1);
    assert!(h.sink.routed().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_on_first_attempt() {
    let h = harness(vec![|| ProcessingError::Rejected { status: 500 }]);

    let disposition = h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();

    assert!(matches!(
        disposition,
        Disposition::DeadLettered {
            kind: FailureKind::NonRetryable,
            attempts: 1,
        }
    ));
    assert_eq!(h.handler.calls(), 1);
    assert_eq!(h.ledger.record_count(), 0);

    let routed = h.sink.routed();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].attempts, 1);
    assert_eq!(routed[0].message_id, "msg-1");
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter_with_attempt_count() {
    let h = harness(vec![
        || ProcessingError::Timeout,
        || ProcessingError::Timeout,
        || ProcessingError::Timeout,
    ]);

    let disposition = h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();

    assert!(matches!(
        disposition,
        Disposition::DeadLettered {
            kind: FailureKind::RetriesExhausted,
            attempts: 3,
        }
    ));
    assert_eq!(h.handler.calls(), 3);

    let routed = h.sink.routed();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].attempts, 3);
    assert_eq!(routed[0].failure_kind, FailureKind::RetriesExhausted);
}

#[tokio::test]
async fn test_redelivery_after_success_skips_handler() {
    let h = harness(vec![]);

    let first = h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();
    assert!(matches!(first, Disposition::Processed { .. }));

    let second = h.pipeline.handle(product_message("msg-1", 1)).await.unwrap();

    assert!(matches!(second, Disposition::SkippedDuplicate));
    assert_eq!(h.handler.calls(), 1);
    assert_eq!(h.ledger.record_count(), 1);
    assert!(h.sink.routed().is_empty());
}

#[tokio::test]
async fn test_distinct_ids_are_each_processed_once() {
    let h = harness(vec![]);

    h.pipeline.handle(product_message("msg-1", 0)).await.unwrap();
    h.pipeline.handle(product_message("msg-2", 1)).await.unwrap();

    assert_eq!(h.handler.calls(), 2);
    assert_eq!(h.ledger.record_count(), 2);
}

#[tokio::test]
async fn test_lost_recording_race_is_treated_as_success() {
    let handler = Arc::new(ScriptedHandler::new(vec![]));
    let sink = Arc::new(CollectingSink::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = EventPipeline::new(
        handler.clone(),
        Arc::new(RacingLedger),
        sink.clone(),
        test_policy(),
        trusted_types(),
        shutdown_rx,
    );

    let disposition = pipeline.handle(product_message("msg-1", 0)).await.unwrap();

    assert!(matches!(disposition, Disposition::Processed { attempts: 1 }));
    assert_eq!(handler.calls(), 1);
    assert!(sink.routed().is_empty());
    drop(shutdown_tx);
}

#[tokio::test]
async fn test_undecodable_payload_dead_letters_without_attempt() {
    let h = harness(vec![]);

    let mut message = product_message("msg-1", 0);
    message.payload = b"definitely not json".to_vec();

    let disposition = h.pipeline.handle(message).await.unwrap();

    assert!(matches!(
        disposition,
        Disposition::DeadLettered {
            kind: FailureKind::Decode,
            attempts: 0,
        }
    ));
    assert_eq!(h.handler.calls(), 0);
    assert_eq!(h.ledger.record_count(), 0);

    let routed = h.sink.routed();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].attempts, 0);
}

#[tokio::test]
async fn test_untrusted_payload_type_dead_letters_without_attempt() {
    let h = harness(vec![]);

    let mut message = product_message("msg-1", 0);
    message.payload = br#"{"type": "account-deleted", "accountId": 7}"#.to_vec();

    let disposition = h.pipeline.handle(message).await.unwrap();

    assert!(matches!(
        disposition,
        Disposition::DeadLettered {
            kind: FailureKind::Decode,
            ..
        }
    ));
    assert_eq!(h.handler.calls(), 0);
}

#[tokio::test]
async fn test_missing_message_id_dedupes_on_record_coordinates() {
    let h = harness(vec![]);

    let mut first = product_message("unused", 5);
    first.message_id = None;
    let mut redelivery = product_message("unused", 5);
    redelivery.message_id = None;

    h.pipeline.handle(first).await.unwrap();
    let second = h.pipeline.handle(redelivery).await.unwrap();

    assert!(matches!(second, Disposition::SkippedDuplicate));
    assert_eq!(h.handler.calls(), 1);
}

#[tokio::test]
async fn test_dead_letter_publish_failure_reaches_no_terminal_state() {
    let handler = Arc::new(ScriptedHandler::new(vec![|| ProcessingError::Rejected {
        status: 500,
    }]));
    let ledger = Arc::new(InMemoryLedger::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = EventPipeline::new(
        handler.clone(),
        ledger.clone(),
        Arc::new(UnavailableSink),
        test_policy(),
        trusted_types(),
        shutdown_rx,
    );

    let result = pipeline.handle(product_message("msg-1", 0)).await;

    assert!(matches!(result, Err(PipelineError::DeadLetter(_))));
    assert_eq!(ledger.record_count(), 0);
    drop(shutdown_tx);
}
