use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::broker::{BrokerError, Headers, Producer};
use crate::observability::MetricsRegistry;

/// Default number of send attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default acknowledgment timeout per attempt.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous publisher: every call waits for a full acknowledgment or a
/// terminal failure.
pub struct EventPublisher {
    producer: Arc<dyn Producer>,
    metrics: Arc<MetricsRegistry>,
    max_attempts: u32,
    ack_timeout: Duration,
    retry_backoff: Duration,
}

impl EventPublisher {
    pub fn new(producer: Arc<dyn Producer>, metrics: Arc<MetricsRegistry>) -> Self {
        EventPublisher {
            producer,
            metrics,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            retry_backoff: Duration::from_millis(100),
        }
    }

    /// Total attempts, including the first. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Send one message. Transient failures and timeouts are retried up to
    /// the attempt bound; any other failure returns immediately.
    pub async fn publish(
        &self,
        topic: &str,
        key: Bytes,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        let mut attempt = 1;

        loop {
            let sent = tokio::time::timeout(
                self.ack_timeout,
                self.producer
                    .publish(topic, key.clone(), payload.clone(), headers.clone()),
            )
            .await
            .unwrap_or(Err(BrokerError::Timeout));

            self.metrics.record_publish_attempt(sent.is_ok());

            match sent {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        topic = topic,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn publisher(broker: Arc<MemoryBroker>, attempts: u32) -> EventPublisher {
        EventPublisher::new(broker, Arc::new(MetricsRegistry::new()))
            .with_max_attempts(attempts)
            .with_retry_backoff(Duration::from_millis(1))
    }

    async fn send(publisher: &EventPublisher) -> Result<(), BrokerError> {
        publisher
            .publish("t", Bytes::from_static(b"k"), Bytes::from_static(b"v"), Vec::new())
            .await
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_next_publishes(
            "t",
            [
                BrokerError::Transient("leader moved".to_string()),
                BrokerError::Timeout,
            ],
        );

        send(&publisher(broker.clone(), 3)).await.unwrap();

        assert_eq!(broker.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_next_publishes(
            "t",
            (0..3).map(|_| BrokerError::Transient("down".to_string())),
        );

        let err = send(&publisher(broker.clone(), 3)).await.unwrap_err();

        assert!(err.is_transient());
        assert!(broker.messages("t").is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let broker = Arc::new(MemoryBroker::new());
        broker.fail_next_publishes(
            "t",
            [
                BrokerError::Rejected("too large".to_string()),
                BrokerError::Rejected("too large".to_string()),
            ],
        );

        let err = send(&publisher(broker.clone(), 5)).await.unwrap_err();

        assert_eq!(err, BrokerError::Rejected("too large".to_string()));
        // The second scripted failure is still queued.
        assert!(send(&publisher(broker.clone(), 1)).await.is_err());
    }

    /// Producer that never acknowledges.
    struct Hanging(AtomicU32);

    #[async_trait]
    impl Producer for Hanging {
        async fn publish(
            &self,
            _topic: &str,
            _key: Bytes,
            _payload: Bytes,
            _headers: Headers,
        ) -> Result<(), BrokerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_ack_timeout() {
        let producer = Arc::new(Hanging(AtomicU32::new(0)));
        let publisher = EventPublisher::new(producer.clone(), Arc::new(MetricsRegistry::new()))
            .with_max_attempts(2)
            .with_ack_timeout(Duration::from_millis(10))
            .with_retry_backoff(Duration::from_millis(1));

        let err = send(&publisher).await.unwrap_err();

        assert_eq!(err, BrokerError::Timeout);
        assert_eq!(producer.0.load(Ordering::SeqCst), 2);
    }
}
