use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::decision::RiskDecision;
use super::payment::PaymentStatus;

/// Event type emitted once a decision has been applied.
pub const EVENT_TYPE_FINALIZED: &str = "PaymentDecisionFinalized";

/// Broker header carrying the originating correlation id.
pub const HEADER_CORRELATION_ID: &str = "correlation_id";

/// Broker header carrying the event type.
pub const HEADER_EVENT_TYPE: &str = "event_type";

/// Event kind segment of a finalize idempotency id.
const FINAL_KIND: &str = "final";

/// Deterministic idempotency id for the finalize of one decision.
///
/// Format: `<payment_id>:final:<correlation_id>`.
pub fn finalize_idempotency_id(payment_id: &str, correlation_id: &str) -> String {
    format!("{}:{}:{}", payment_id, FINAL_KIND, correlation_id)
}

/// Outbound finalize event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payment_id: String,
    pub status: PaymentStatus,
    pub score: f64,
    pub reason: String,
    pub correlation: String,
    pub ts: DateTime<Utc>,
}

impl FinalizedEvent {
    /// Build the event for a decision. `status` is the intended status,
    /// which may differ from what was persisted after compensation.
    pub fn new(decision: &RiskDecision, status: PaymentStatus, ts: DateTime<Utc>) -> Self {
        FinalizedEvent {
            event_type: EVENT_TYPE_FINALIZED.to_string(),
            payment_id: decision.payment_id.clone(),
            status,
            score: decision.score,
            reason: decision.reason.clone(),
            correlation: decision.correlation_id.clone(),
            ts,
        }
    }
}

/// Outbox record: an event durably recorded before it is published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    /// Idempotency id, unique in the outbox
    pub id: String,
    pub aggregate_id: String,
    pub event_type: String,
    /// Serialized event body, published verbatim
    pub payload: Bytes,
    pub headers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

impl OutboxEvent {
    /// Create the unpublished outbox record for a finalize.
    pub fn finalized(
        decision: &RiskDecision,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let body = FinalizedEvent::new(decision, status, now);
        let payload = Bytes::from(serde_json::to_vec(&body)?);

        let mut headers = BTreeMap::new();
        headers.insert(
            HEADER_CORRELATION_ID.to_string(),
            decision.correlation_id.clone(),
        );
        headers.insert(HEADER_EVENT_TYPE.to_string(), EVENT_TYPE_FINALIZED.to_string());

        Ok(OutboxEvent {
            id: finalize_idempotency_id(&decision.payment_id, &decision.correlation_id),
            aggregate_id: decision.payment_id.clone(),
            event_type: EVENT_TYPE_FINALIZED.to_string(),
            payload,
            headers,
            created_at: now,
            published: false,
            published_at: None,
            correlation_id: decision.correlation_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Verdict;

    fn test_decision() -> RiskDecision {
        RiskDecision::new("p1", Verdict::Approved, 0.2, "low risk", "c1")
    }

    #[test]
    fn test_idempotency_id_format() {
        assert_eq!(finalize_idempotency_id("p1", "c1"), "p1:final:c1");
        assert_eq!(finalize_idempotency_id("p1", ""), "p1:final:");
    }

    #[test]
    fn test_finalized_outbox_event() {
        let now = Utc::now();
        let event = OutboxEvent::finalized(&test_decision(), PaymentStatus::Approved, now).unwrap();

        assert_eq!(event.id, "p1:final:c1");
        assert_eq!(event.aggregate_id, "p1");
        assert_eq!(event.event_type, EVENT_TYPE_FINALIZED);
        assert!(!event.published);
        assert!(event.published_at.is_none());
        assert_eq!(event.headers.get(HEADER_CORRELATION_ID).unwrap(), "c1");
        assert_eq!(
            event.headers.get(HEADER_EVENT_TYPE).unwrap(),
            EVENT_TYPE_FINALIZED
        );
    }

    #[test]
    fn test_payload_shape() {
        let event =
            OutboxEvent::finalized(&test_decision(), PaymentStatus::Approved, Utc::now()).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&event.payload).unwrap();

        assert_eq!(body["type"], "PaymentDecisionFinalized");
        assert_eq!(body["payment_id"], "p1");
        assert_eq!(body["status"], "APPROVED");
        assert_eq!(body["score"], 0.2);
        assert_eq!(body["reason"], "low risk");
        assert_eq!(body["correlation"], "c1");
        assert!(body["ts"].is_string());
    }
}
