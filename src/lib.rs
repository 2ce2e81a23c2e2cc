pub mod api;
pub mod app;
pub mod broker;
pub mod config;
pub mod domain;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod storage;

pub use config::Config;
pub use domain::{OutboxEvent, Payment, PaymentStatus, RiskDecision, Verdict};
pub use notify::NotificationDispatcher;
pub use pipeline::DecisionFinalizer;
