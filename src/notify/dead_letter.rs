use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::{BrokerError, Headers, Message, Producer};
use crate::observability::MetricsRegistry;

/// Forwards undeliverable messages to a dead-letter topic, byte for byte.
pub struct DeadLetterRouter {
    producer: Arc<dyn Producer>,
    dlq_topic: String,
    metrics: Arc<MetricsRegistry>,
}

impl DeadLetterRouter {
    pub fn new(
        producer: Arc<dyn Producer>,
        dlq_topic: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        DeadLetterRouter {
            producer,
            dlq_topic: dlq_topic.into(),
            metrics,
        }
    }

    /// Publish key, payload and headers unchanged to `dlq_topic`.
    pub async fn reroute(
        &self,
        dlq_topic: &str,
        key: Bytes,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        let result = self.producer.publish(dlq_topic, key, payload, headers).await;
        self.metrics.record_dead_letter(result.is_ok());
        result
    }

    /// Reroute a fetched message to the configured topic. Failures are
    /// logged and returned.
    pub async fn reroute_message(&self, message: &Message) -> Result<(), BrokerError> {
        let result = self
            .reroute(
                &self.dlq_topic,
                message.key.clone(),
                message.payload.clone(),
                message.headers.clone(),
            )
            .await;

        match &result {
            Ok(()) => info!(
                source_topic = %message.topic,
                offset = message.offset,
                dlq_topic = %self.dlq_topic,
                "Message dead-lettered"
            ),
            Err(e) => error!(
                source_topic = %message.topic,
                offset = message.offset,
                dlq_topic = %self.dlq_topic,
                error = %e,
                "Failed to dead-letter message"
            ),
        }

        result
    }
}
