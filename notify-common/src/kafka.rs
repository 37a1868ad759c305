use envconfig::Envconfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
}

impl KafkaConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.kafka_hosts);

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}

/// Build a `FutureProducer` and ping the brokers once so a misconfigured
/// cluster fails at startup rather than on the first publish.
pub async fn create_kafka_producer(config: &KafkaConfig) -> Result<FutureProducer, KafkaError> {
    let mut client_config = config.client_config();
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let producer: FutureProducer = client_config.create()?;

    match producer
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(err) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", err);
            return Err(err);
        }
    }

    Ok(producer)
}
