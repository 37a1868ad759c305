//! Consume product-created events, notify the downstream service, and keep
//! the processed-event ledger and dead-letter topic honest while doing it.
use std::sync::Arc;

use envconfig::Envconfig;
use notify_common::dead_letter::KafkaDeadLetterSink;
use notify_common::kafka::create_kafka_producer;
use notify_common::metrics::{serve, setup_metrics_router};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use notify_consumer::config::Config;
use notify_consumer::consumer::ConsumerLoop;
use notify_consumer::handler::HttpNotificationHandler;
use notify_consumer::ledger::PostgresLedger;
use notify_consumer::pipeline::EventPipeline;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("static directive parses")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("Starting notify consumer...");

    let config = Config::init_from_env()?;

    info!(
        topic = config.topic,
        group_id = config.group_id,
        dead_letter_topic = config.dead_letter_topic,
        max_attempts = config.max_attempts,
        backoff_ms = config.backoff_ms,
        "Configuration loaded"
    );

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router();
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let ledger = Arc::new(PostgresLedger::new(&config.database_url, config.max_pg_connections).await?);
    let producer = create_kafka_producer(&config.kafka).await?;
    let dead_letters = Arc::new(KafkaDeadLetterSink::new(
        producer,
        config.dead_letter_topic.clone(),
    ));
    let handler = Arc::new(HttpNotificationHandler::new(
        config.notification_url.clone(),
        config.handler_timeout(),
    )?);

    let pipeline = Arc::new(EventPipeline::new(
        handler,
        ledger,
        dead_letters,
        config.retry_policy(),
        config.trusted_types(),
        shutdown_rx.clone(),
    ));

    let consumer_loop = ConsumerLoop::new(&config, pipeline)?;
    consumer_loop.run(shutdown_rx).await?;

    info!("Notify consumer shut down");
    Ok(())
}
