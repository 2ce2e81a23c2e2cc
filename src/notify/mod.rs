pub mod dead_letter;
pub mod dedup;
pub mod dispatcher;
pub mod sink;

pub use dead_letter::DeadLetterRouter;
pub use dedup::{Claim, DedupError, DedupGate, InMemoryDedupGate};
pub use dispatcher::{classify_status, DispatchOutcome, NotificationDispatcher, NotifyError};
pub use sink::{NotificationSink, SinkError, WebhookSink};
