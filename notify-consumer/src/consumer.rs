use std::collections::HashMap;
use std::sync::{Arc, Weak};

use notify_common::message::ReceivedMessage;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ConsumerError;
use crate::partition::{OffsetStore, OffsetStoreError, PartitionWorker};
use crate::pipeline::MessagePipeline;

/// Producers stamp the logical message identity in this header.
const MESSAGE_ID_HEADER: &str = "messageId";

/// Stores offsets on the consumer behind a weak handle, so workers draining
/// after shutdown cannot keep the consumer alive.
struct KafkaOffsetStore {
    consumer: Weak<StreamConsumer>,
}

impl OffsetStore for KafkaOffsetStore {
    fn store(&self, topic: &str, partition: i32, offset: i64) -> Result<(), OffsetStoreError> {
        let consumer = self.consumer.upgrade().ok_or(OffsetStoreError::Gone)?;
        consumer.store_offset(topic, partition, offset)?;
        Ok(())
    }
}

/// Pulls messages from the source topic and fans them out to one worker
/// per partition. Offsets are stored by the workers after a terminal state
/// and committed in the background, so a crash can only ever replay
/// messages that were mid-flight.
pub struct ConsumerLoop<P> {
    consumer: Arc<StreamConsumer>,
    pipeline: Arc<P>,
    topic: String,
    channel_depth: usize,
}

impl<P: MessagePipeline + 'static> ConsumerLoop<P> {
    pub fn new(config: &Config, pipeline: Arc<P>) -> Result<Self, ConsumerError> {
        let mut client_config = config.kafka.client_config();
        client_config
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[&config.topic])?;

        info!(
            topic = config.topic,
            group_id = config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            pipeline,
            topic: config.topic.clone(),
            channel_depth: config.partition_channel_depth,
        })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        info!("Starting consumer loop");

        let offsets = Arc::new(KafkaOffsetStore {
            consumer: Arc::downgrade(&self.consumer),
        });
        let mut workers: HashMap<i32, PartitionWorker> = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown signal received, stopping consumer loop");
                    break;
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(borrowed) => to_received_message(&borrowed),
                        Err(e) => {
                            error!(error = %e, "kafka recv error");
                            metrics::counter!("notify_recv_errors").increment(1);
                            continue;
                        }
                    };

                    metrics::counter!("notify_messages_received").increment(1);

                    let partition = message.partition;
                    let worker = workers.entry(partition).or_insert_with(|| {
                        PartitionWorker::spawn(
                            self.topic.clone(),
                            partition,
                            self.pipeline.clone(),
                            offsets.clone(),
                            self.channel_depth,
                        )
                    });

                    if worker.send(message).await.is_err() {
                        // The worker hit something fatal (a failed dead letter
                        // publish, a ledger outage). Escalate rather than keep
                        // consuming past an unresolved message.
                        return Err(ConsumerError::WorkerStopped {
                            topic: self.topic.clone(),
                            partition,
                        });
                    }
                }
            }
        }

        for (_, worker) in workers.drain() {
            worker.shutdown().await;
        }

        // One synchronous commit so offsets stored during the drain survive.
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            warn!(error = %e, "failed to commit offsets during shutdown");
        }

        Ok(())
    }
}

fn to_received_message(msg: &rdkafka::message::BorrowedMessage<'_>) -> ReceivedMessage {
    let message_id = msg.headers().and_then(|headers| {
        headers.iter().find_map(|header| {
            if header.key == MESSAGE_ID_HEADER {
                header
                    .value
                    .map(|v| String::from_utf8_lossy(v).into_owned())
            } else {
                None
            }
        })
    });

    ReceivedMessage {
        message_id,
        key: msg
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        topic: msg.topic().to_owned(),
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp: msg.timestamp().to_millis().unwrap_or(0),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}
