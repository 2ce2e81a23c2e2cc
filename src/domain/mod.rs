pub mod decision;
pub mod event;
pub mod payment;

pub use decision::{DecisionParseError, RiskDecision};
pub use event::{
    finalize_idempotency_id, FinalizedEvent, OutboxEvent, EVENT_TYPE_FINALIZED,
    HEADER_CORRELATION_ID, HEADER_EVENT_TYPE,
};
pub use payment::{Payment, PaymentStatus, Verdict};
