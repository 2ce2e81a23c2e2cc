pub mod applier;
pub mod finalizer;
pub mod outbox;
pub mod publisher;

pub use applier::{Applied, ApplyPath, DecisionApplier, COMPENSATION_REASON};
pub use finalizer::{outbox_id_for, DecisionFinalizer, FinalizeError, Finalized};
pub use outbox::{OutboxWriter, PublishAcknowledger};
pub use publisher::EventPublisher;
