use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};
use turnstile_core::{CoreError, CoreResult, IssuanceNotifier};
use turnstile_shared::models::events::{IssuanceWebhook, TicketValidatedEvent};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic_prefix: String,
}

impl EventProducer {
    pub fn new(brokers: &str, topic_prefix: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    fn topic(&self, name: &str) -> String {
        if self.topic_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.topic_prefix, name)
        }
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl IssuanceNotifier for EventProducer {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn batch_issued(&self, document: &IssuanceWebhook) -> CoreResult<()> {
        let event = document.issued_event();
        let payload = serde_json::to_string(&event).map_err(|e| CoreError::Delivery(e.to_string()))?;
        self.publish(&self.topic("batch.issued"), &event.batch_id.to_string(), &payload)
            .await
            .map_err(|e| CoreError::Delivery(e.to_string()))
    }

    async fn ticket_validated(&self, event: &TicketValidatedEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event).map_err(|e| CoreError::Delivery(e.to_string()))?;
        self.publish(&self.topic("ticket.validated"), &event.ticket_id.to_string(), &payload)
            .await
            .map_err(|e| CoreError::Delivery(e.to_string()))
    }
}
