use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{headers_from_map, BrokerError, Message, MessageHandler};
use crate::domain::{finalize_idempotency_id, OutboxEvent, RiskDecision};
use crate::observability::MetricsRegistry;
use crate::storage::StoreError;

use super::applier::DecisionApplier;
use super::outbox::{OutboxWriter, PublishAcknowledger};
use super::publisher::EventPublisher;

/// Failures that leave the triggering decision uncommitted.
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("failed to encode finalize event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to record outbox event {id}: {source}")]
    Record {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish outbox event {id}: {source}")]
    Publish {
        id: String,
        #[source]
        source: BrokerError,
    },
}

/// How a finalize completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    /// The event went to the broker. `replayed` is set when the record
    /// already existed unpublished and its stored bytes were sent.
    Published { acknowledged: bool, replayed: bool },
    /// The record already existed and was marked published.
    AlreadyPublished,
}

/// Consumes inbound risk decisions and emits finalize events through the
/// outbox: apply, record, publish, acknowledge. The record always completes
/// before a publish is attempted.
pub struct DecisionFinalizer {
    applier: DecisionApplier,
    writer: OutboxWriter,
    publisher: EventPublisher,
    acknowledger: PublishAcknowledger,
    outbox_topic: String,
    metrics: Arc<MetricsRegistry>,
}

impl DecisionFinalizer {
    pub fn new(
        applier: DecisionApplier,
        writer: OutboxWriter,
        publisher: EventPublisher,
        acknowledger: PublishAcknowledger,
        outbox_topic: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        DecisionFinalizer {
            applier,
            writer,
            publisher,
            acknowledger,
            outbox_topic: outbox_topic.into(),
            metrics,
        }
    }

    pub async fn finalize(&self, decision: &RiskDecision) -> Result<Finalized, FinalizeError> {
        let start = Instant::now();

        let applied = self
            .applier
            .apply(
                &decision.payment_id,
                decision.verdict(),
                decision.score,
                &decision.reason,
            )
            .await;

        let mut event = OutboxEvent::finalized(decision, applied.status, Utc::now())?;
        let mut replayed = false;

        match self.writer.record(&event).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate() => {
                let existing = self.writer.load(&event.id).await.map_err(|source| {
                    FinalizeError::Record {
                        id: event.id.clone(),
                        source,
                    }
                })?;

                match existing {
                    Some(stored) if stored.published => {
                        info!(
                            payment_id = %decision.payment_id,
                            outbox_id = %stored.id,
                            "Duplicate finalize ignored, event already published"
                        );
                        self.metrics.record_latency(start);
                        return Ok(Finalized::AlreadyPublished);
                    }
                    Some(stored) => {
                        info!(
                            payment_id = %decision.payment_id,
                            outbox_id = %stored.id,
                            "Duplicate finalize, publishing stored event"
                        );
                        event = stored;
                        replayed = true;
                    }
                    None => {
                        return Err(FinalizeError::Record {
                            id: event.id.clone(),
                            source: e,
                        })
                    }
                }
            }
            Err(source) => {
                warn!(
                    payment_id = %decision.payment_id,
                    outbox_id = %event.id,
                    error = %source,
                    "Failed to insert outbox event"
                );
                return Err(FinalizeError::Record {
                    id: event.id,
                    source,
                });
            }
        }

        if let Err(source) = self
            .publisher
            .publish(
                &self.outbox_topic,
                Bytes::copy_from_slice(event.aggregate_id.as_bytes()),
                event.payload.clone(),
                headers_from_map(&event.headers),
            )
            .await
        {
            warn!(
                payment_id = %decision.payment_id,
                outbox_id = %event.id,
                error = %source,
                "Failed to publish outbox event"
            );
            return Err(FinalizeError::Publish {
                id: event.id,
                source,
            });
        }

        let acknowledged = self.acknowledger.mark_published(&event.id).await;
        self.metrics.record_latency(start);

        info!(
            payment_id = %decision.payment_id,
            correlation_id = %decision.correlation_id,
            status = %applied.status,
            compensated = applied.compensated(),
            "Decision finalized"
        );

        Ok(Finalized::Published {
            acknowledged,
            replayed,
        })
    }
}

#[async_trait]
impl MessageHandler for DecisionFinalizer {
    type Error = FinalizeError;

    async fn handle(&self, message: &Message) -> Result<(), FinalizeError> {
        let decision = match RiskDecision::from_slice(&message.payload) {
            Ok(decision) => decision,
            Err(e) => {
                self.metrics.record_decision_received(true);
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Skipping malformed risk decision"
                );
                return Ok(());
            }
        };
        self.metrics.record_decision_received(false);

        self.finalize(&decision).await.map(|_| ())
    }
}

/// Idempotency id a decision will be recorded under.
pub fn outbox_id_for(decision: &RiskDecision) -> String {
    finalize_idempotency_id(&decision.payment_id, &decision.correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, Producer};
    use crate::domain::{
        FinalizedEvent, Payment, PaymentStatus, Verdict, HEADER_CORRELATION_ID, HEADER_EVENT_TYPE,
    };
    use crate::pipeline::applier::COMPENSATION_REASON;
    use crate::storage::{MemoryStore, OutboxStore, PaymentStore};
    use std::time::Duration;

    const OUTBOX_TOPIC: &str = "payments.outbox";

    struct Fixture {
        store: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        metrics: Arc<MetricsRegistry>,
        finalizer: DecisionFinalizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let metrics = Arc::new(MetricsRegistry::new());

        let finalizer = DecisionFinalizer::new(
            DecisionApplier::new(store.clone(), metrics.clone()),
            OutboxWriter::new(store.clone(), metrics.clone()),
            EventPublisher::new(broker.clone(), metrics.clone())
                .with_max_attempts(2)
                .with_retry_backoff(Duration::from_millis(1)),
            PublishAcknowledger::new(store.clone(), metrics.clone()),
            OUTBOX_TOPIC,
            metrics.clone(),
        );

        Fixture {
            store,
            broker,
            metrics,
            finalizer,
        }
    }

    fn approved_p1() -> RiskDecision {
        RiskDecision::new("p1", Verdict::Approved, 0.2, "low risk", "c1")
    }

    #[tokio::test]
    async fn test_finalize_happy_path() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));

        let outcome = fx.finalizer.finalize(&approved_p1()).await.unwrap();
        assert_eq!(
            outcome,
            Finalized::Published {
                acknowledged: true,
                replayed: false
            }
        );

        let payment = fx.store.get_payment("p1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Approved);

        let stored = fx.store.get_event("p1:final:c1").await.unwrap().unwrap();
        assert!(stored.published);

        let published = fx.broker.messages(OUTBOX_TOPIC);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key_str(), "p1");
        assert_eq!(published[0].payload, stored.payload);
        assert_eq!(
            published[0].header_str(HEADER_CORRELATION_ID).as_deref(),
            Some("c1")
        );
        assert_eq!(
            published[0].header_str(HEADER_EVENT_TYPE).as_deref(),
            Some("PaymentDecisionFinalized")
        );
    }

    #[tokio::test]
    async fn test_compensated_apply_still_emits_original_verdict() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));
        fx.store.fail_next_updates(1);

        fx.finalizer.finalize(&approved_p1()).await.unwrap();

        let payment = fx.store.get_payment("p1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.risk_reason.as_deref(), Some(COMPENSATION_REASON));

        let published = fx.broker.messages(OUTBOX_TOPIC);
        let body: FinalizedEvent = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body.status, PaymentStatus::Approved);
        assert_eq!(body.reason, "low risk");
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_event_unpublished() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));
        fx.broker.fail_next_publishes(
            OUTBOX_TOPIC,
            (0..2).map(|_| BrokerError::Transient("no leader".to_string())),
        );

        let err = fx.finalizer.finalize(&approved_p1()).await.unwrap_err();
        assert!(matches!(err, FinalizeError::Publish { .. }));

        let stored = fx.store.get_event("p1:final:c1").await.unwrap().unwrap();
        assert!(!stored.published);
        assert!(stored.published_at.is_none());
        assert!(fx.broker.messages(OUTBOX_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_prevents_publish() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));
        fx.store.fail_next_inserts(1);

        let err = fx.finalizer.finalize(&approved_p1()).await.unwrap_err();

        assert!(matches!(err, FinalizeError::Record { .. }));
        assert!(fx.broker.messages(OUTBOX_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_mark_failure_does_not_fail_finalize() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));
        fx.store.fail_next_mark_published(1);

        let outcome = fx.finalizer.finalize(&approved_p1()).await.unwrap();

        assert_eq!(
            outcome,
            Finalized::Published {
                acknowledged: false,
                replayed: false
            }
        );
        assert_eq!(fx.broker.messages(OUTBOX_TOPIC).len(), 1);
        let stored = fx.store.get_event("p1:final:c1").await.unwrap().unwrap();
        assert!(!stored.published);
    }

    #[tokio::test]
    async fn test_redelivery_after_publish_is_benign() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));

        fx.finalizer.finalize(&approved_p1()).await.unwrap();
        let outcome = fx.finalizer.finalize(&approved_p1()).await.unwrap();

        assert_eq!(outcome, Finalized::AlreadyPublished);
        assert_eq!(fx.store.outbox_events().len(), 1);
        assert_eq!(fx.broker.messages(OUTBOX_TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_after_failed_publish_sends_stored_bytes() {
        let fx = fixture();
        fx.store.add_payment(Payment::pending("p1", "c1"));
        fx.broker.fail_next_publishes(
            OUTBOX_TOPIC,
            (0..2).map(|_| BrokerError::Transient("no leader".to_string())),
        );

        assert!(fx.finalizer.finalize(&approved_p1()).await.is_err());
        let recorded = fx.store.get_event("p1:final:c1").await.unwrap().unwrap();

        let outcome = fx.finalizer.finalize(&approved_p1()).await.unwrap();

        assert_eq!(
            outcome,
            Finalized::Published {
                acknowledged: true,
                replayed: true
            }
        );
        let published = fx.broker.messages(OUTBOX_TOPIC);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, recorded.payload);
        assert_eq!(fx.store.outbox_events().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let fx = fixture();
        fx.broker
            .publish(
                "risk.decisions",
                Bytes::from_static(b"p1"),
                Bytes::from_static(b"{not json"),
                Vec::new(),
            )
            .await
            .unwrap();
        let message = fx.broker.messages("risk.decisions").remove(0);

        assert!(fx.finalizer.handle(&message).await.is_ok());
        assert!(fx.store.outbox_events().is_empty());
        assert_eq!(
            fx.metrics
                .decisions_malformed
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_outbox_id_for() {
        assert_eq!(outbox_id_for(&approved_p1()), "p1:final:c1");
    }
}
