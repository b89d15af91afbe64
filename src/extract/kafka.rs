// src/extract/kafka.rs
//! Kafka broker (feature `kafka`). SASL credentials come from [`BrokerConfig`].

use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::config::BrokerConfig;
use crate::error::PublishError;
use crate::extract::publisher::{Broker, BrokerMessage};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaBroker {
    client_config: ClientConfig,
    producer: RwLock<FutureProducer>,
}

impl KafkaBroker {
    pub fn new(cfg: &BrokerConfig) -> anyhow::Result<Self> {
        let client_config = client_config(cfg);
        let producer: FutureProducer = client_config
            .create()
            .context("Failed to create Kafka producer")?;
        Ok(Self {
            client_config,
            producer: RwLock::new(producer),
        })
    }
}

fn client_config(cfg: &BrokerConfig) -> ClientConfig {
    let mut c = ClientConfig::new();
    c.set("bootstrap.servers", cfg.hostname.clone().unwrap_or_default())
        .set("security.protocol", cfg.security_protocol.clone())
        .set("sasl.mechanisms", cfg.sasl_mechanism.clone())
        .set("sasl.username", cfg.username.clone().unwrap_or_default())
        .set("sasl.password", cfg.password.clone().unwrap_or_default())
        .set("message.timeout.ms", "5000")
        .set("acks", "all");
    c
}

fn classify(e: KafkaError) -> PublishError {
    match e {
        KafkaError::MessageProduction(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::MessageTimedOut,
        ) => PublishError::Connection(e.to_string()),
        other => PublishError::Rejected(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Broker for KafkaBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<(), PublishError> {
        let producer = self.producer.read().clone();
        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload);
        producer
            .send(record, SEND_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| classify(e))
    }

    async fn reconnect(&self) -> Result<(), PublishError> {
        let fresh: FutureProducer = self
            .client_config
            .create()
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        *self.producer.write() = fresh;
        tracing::info!("kafka producer re-created");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}
