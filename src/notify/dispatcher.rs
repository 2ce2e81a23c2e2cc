use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{Message, MessageHandler};
use crate::domain::HEADER_CORRELATION_ID;
use crate::observability::MetricsRegistry;

use super::dead_letter::DeadLetterRouter;
use super::dedup::{Claim, DedupError, DedupGate};
use super::sink::NotificationSink;

/// Dispatch failures. Both notify classes are dead-lettered before they
/// are returned.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// 5xx response or transport failure.
    #[error("transient notify error: {detail}")]
    Transient { status: Option<u16>, detail: String },

    /// 4xx response.
    #[error("permanent notify error: status {status}")]
    Permanent { status: u16 },

    #[error("dedup gate failed: {0}")]
    Gate(#[from] DedupError),
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Transient { .. })
    }
}

/// Classify a sink response status.
pub fn classify_status(status: u16) -> Result<(), NotifyError> {
    match status {
        500..=u16::MAX => Err(NotifyError::Transient {
            status: Some(status),
            detail: format!("sink responded {}", status),
        }),
        400..=499 => Err(NotifyError::Permanent { status }),
        _ => Ok(()),
    }
}

/// What happened to a consumed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Already delivered, or being delivered by a concurrent handler.
    Duplicate,
    /// Payload is not a JSON object; nothing was sent.
    Malformed,
}

/// Delivers published events to the notification sink at most once per
/// message key, dead-lettering anything the sink refuses.
pub struct NotificationDispatcher {
    gate: Arc<dyn DedupGate>,
    sink: Arc<dyn NotificationSink>,
    dead_letters: DeadLetterRouter,
    metrics: Arc<MetricsRegistry>,
}

impl NotificationDispatcher {
    pub fn new(
        gate: Arc<dyn DedupGate>,
        sink: Arc<dyn NotificationSink>,
        dead_letters: DeadLetterRouter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        NotificationDispatcher {
            gate,
            sink,
            dead_letters,
            metrics,
        }
    }

    pub async fn dispatch(&self, message: &Message) -> Result<DispatchOutcome, NotifyError> {
        if let Err(e) =
            serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&message.payload)
        {
            self.metrics.record_notification_malformed();
            warn!(
                topic = %message.topic,
                offset = message.offset,
                error = %e,
                "Skipping malformed outbox payload"
            );
            return Ok(DispatchOutcome::Malformed);
        }

        let id = message.key_str();
        let correlation_id = message.header_str(HEADER_CORRELATION_ID).unwrap_or_default();

        match self.gate.try_claim(&id).await? {
            Claim::Acquired => {}
            claim @ (Claim::Seen | Claim::InFlight) => {
                self.metrics.record_notification_duplicate();
                info!(
                    id = %id,
                    correlation_id = %correlation_id,
                    in_flight = claim == Claim::InFlight,
                    "Duplicate event ignored"
                );
                return Ok(DispatchOutcome::Duplicate);
            }
        }

        let delivered = match self.sink.send(message.payload.clone()).await {
            Ok(status) => classify_status(status),
            Err(e) => Err(NotifyError::Transient {
                status: None,
                detail: e.to_string(),
            }),
        };

        match delivered {
            Ok(()) => {
                if let Err(e) = self.gate.mark(&id).await {
                    warn!(id = %id, error = %e, "Failed to mark event seen");
                }
                self.metrics.record_notification_delivered();
                info!(id = %id, correlation_id = %correlation_id, "Notification delivered");
                Ok(DispatchOutcome::Delivered)
            }
            Err(e) => {
                if let Err(release_err) = self.gate.release(&id).await {
                    warn!(id = %id, error = %release_err, "Failed to release dedup claim");
                }
                self.metrics.record_notify_failure(e.is_transient());
                warn!(
                    id = %id,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Notify failed"
                );

                // Logged inside; the notify error is what the caller sees.
                let _ = self.dead_letters.reroute_message(message).await;

                Err(e)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for NotificationDispatcher {
    type Error = NotifyError;

    async fn handle(&self, message: &Message) -> Result<(), NotifyError> {
        self.dispatch(message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Header, MemoryBroker};
    use crate::notify::dedup::InMemoryDedupGate;
    use crate::notify::sink::SinkError;
    use bytes::Bytes;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Sink that answers with scripted statuses, then 200.
    #[derive(Default)]
    struct ScriptedSink {
        statuses: Mutex<VecDeque<u16>>,
        calls: Mutex<Vec<Bytes>>,
    }

    impl ScriptedSink {
        fn answering(statuses: impl IntoIterator<Item = u16>) -> Self {
            ScriptedSink {
                statuses: Mutex::new(statuses.into_iter().collect()),
                calls: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for ScriptedSink {
        async fn send(&self, payload: Bytes) -> Result<u16, SinkError> {
            self.calls.lock().push(payload);
            Ok(self.statuses.lock().pop_front().unwrap_or(200))
        }
    }

    struct Fixture {
        broker: Arc<MemoryBroker>,
        gate: Arc<InMemoryDedupGate>,
        sink: Arc<ScriptedSink>,
        dispatcher: NotificationDispatcher,
    }

    fn fixture(sink: ScriptedSink) -> Fixture {
        let broker = Arc::new(MemoryBroker::new());
        let gate = Arc::new(InMemoryDedupGate::new());
        let sink = Arc::new(sink);
        let metrics = Arc::new(MetricsRegistry::new());

        let dispatcher = NotificationDispatcher::new(
            gate.clone(),
            sink.clone(),
            DeadLetterRouter::new(broker.clone(), "dlq", metrics.clone()),
            metrics,
        );

        Fixture {
            broker,
            gate,
            sink,
            dispatcher,
        }
    }

    fn event_message(key: &'static str) -> Message {
        Message {
            topic: "payments.outbox".to_string(),
            offset: 0,
            key: Bytes::from_static(key.as_bytes()),
            payload: Bytes::from_static(br#"{"type":"PaymentDecisionFinalized","payment_id":"p1"}"#),
            headers: vec![
                Header::new("correlation_id", "c1"),
                Header::new("event_type", "PaymentDecisionFinalized"),
            ],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(200).is_ok());
        assert!(classify_status(204).is_ok());
        assert!(matches!(
            classify_status(400),
            Err(NotifyError::Permanent { status: 400 })
        ));
        assert!(matches!(
            classify_status(499),
            Err(NotifyError::Permanent { status: 499 })
        ));
        assert!(classify_status(500).unwrap_err().is_transient());
        assert!(classify_status(503).unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_delivery_marks_seen() {
        let fx = fixture(ScriptedSink::default());

        let outcome = fx.dispatcher.dispatch(&event_message("p1")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert!(fx.gate.seen("p1").await.unwrap());
        assert_eq!(fx.sink.calls.lock().len(), 1);
        assert!(fx.broker.messages("dlq").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_is_not_dispatched_again() {
        let fx = fixture(ScriptedSink::default());

        fx.dispatcher.dispatch(&event_message("p1")).await.unwrap();
        let outcome = fx.dispatcher.dispatch(&event_message("p1")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Duplicate);
        assert_eq!(fx.sink.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_dead_letters_verbatim() {
        let fx = fixture(ScriptedSink::answering([503]));
        let original = event_message("p1");

        let err = fx.dispatcher.dispatch(&original).await.unwrap_err();

        assert!(err.is_transient());
        assert!(!fx.gate.seen("p1").await.unwrap());

        let dead = fx.broker.messages("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key, original.key);
        assert_eq!(dead[0].payload, original.payload);
        assert_eq!(dead[0].headers, original.headers);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters() {
        let fx = fixture(ScriptedSink::answering([404]));

        let err = fx.dispatcher.dispatch(&event_message("p1")).await.unwrap_err();

        assert!(matches!(err, NotifyError::Permanent { status: 404 }));
        assert_eq!(fx.broker.messages("dlq").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_can_be_retried() {
        let fx = fixture(ScriptedSink::answering([500]));

        assert!(fx.dispatcher.dispatch(&event_message("p1")).await.is_err());
        let outcome = fx.dispatcher.dispatch(&event_message("p1")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(fx.sink.calls.lock().len(), 2);
        assert!(fx.gate.seen("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_letter_failure_still_returns_notify_error() {
        let fx = fixture(ScriptedSink::answering([502]));
        fx.broker
            .fail_next_publishes("dlq", [crate::broker::BrokerError::Closed]);

        let err = fx.dispatcher.dispatch(&event_message("p1")).await.unwrap_err();

        assert!(err.is_transient());
        assert!(fx.broker.messages("dlq").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let fx = fixture(ScriptedSink::default());
        let mut message = event_message("p1");
        message.payload = Bytes::from_static(b"garbage");

        let outcome = fx.dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert!(fx.sink.calls.lock().is_empty());
        assert!(fx.broker.messages("dlq").is_empty());
        assert!(fx.gate.is_empty());
    }
}
