use std::time::Duration;

use clap::Parser;

/// Finalizer service configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "riskfin")]
#[command(about = "Payment risk decision finalizer and notifier")]
pub struct Config {
    /// HTTP server listen address
    #[arg(long, default_value = "0.0.0.0:8082", env = "RISKFIN_LISTEN_ADDR")]
    pub listen_addr: String,

    /// PostgreSQL URL (optional, uses the in-memory store if not set)
    #[arg(long, env = "RISKFIN_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Minimum pooled database connections
    #[arg(long, default_value = "1", env = "RISKFIN_DB_MIN_CONNECTIONS")]
    pub db_min_connections: u32,

    /// Maximum pooled database connections
    #[arg(long, default_value = "10", env = "RISKFIN_DB_MAX_CONNECTIONS")]
    pub db_max_connections: u32,

    /// Topic carrying inbound risk decisions
    #[arg(long, default_value = "risk.decisions", env = "RISKFIN_DECISIONS_TOPIC")]
    pub decisions_topic: String,

    /// Topic receiving finalize events
    #[arg(long, default_value = "payments.outbox", env = "RISKFIN_OUTBOX_TOPIC")]
    pub outbox_topic: String,

    /// Dead-letter topic for undeliverable notifications
    #[arg(long, default_value = "payments.outbox.dlq", env = "RISKFIN_DLQ_TOPIC")]
    pub dlq_topic: String,

    /// Consumer group of the decision orchestrator
    #[arg(long, default_value = "decision-orchestrator", env = "RISKFIN_ORCHESTRATOR_GROUP")]
    pub orchestrator_group: String,

    /// Consumer group of the notifier
    #[arg(long, default_value = "notification", env = "RISKFIN_NOTIFIER_GROUP")]
    pub notifier_group: String,

    /// Publish attempts before giving up
    #[arg(long, default_value = "5", env = "RISKFIN_PRODUCER_RETRIES")]
    pub producer_retries: u32,

    /// Broker acknowledgment timeout per attempt in milliseconds
    #[arg(long, default_value = "5000", env = "RISKFIN_PRODUCER_TIMEOUT_MS")]
    pub producer_timeout_ms: u64,

    /// Delay between publish attempts in milliseconds
    #[arg(long, default_value = "100", env = "RISKFIN_PRODUCER_RETRY_BACKOFF_MS")]
    pub producer_retry_backoff_ms: u64,

    /// Notification webhook URL
    #[arg(
        long,
        default_value = "http://mock-webhook:8080/notify",
        env = "RISKFIN_NOTIFY_WEBHOOK"
    )]
    pub notify_webhook: String,

    /// Notification request timeout in milliseconds
    #[arg(long, default_value = "5000", env = "RISKFIN_NOTIFY_TIMEOUT_MS")]
    pub notify_timeout_ms: u64,

    /// Delay between cancelling work and exiting, in milliseconds
    #[arg(long, default_value = "300", env = "RISKFIN_SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false", env = "RISKFIN_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Get broker acknowledgment timeout as Duration.
    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    /// Get publish retry delay as Duration.
    pub fn producer_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.producer_retry_backoff_ms)
    }

    /// Get notification timeout as Duration.
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Get shutdown grace delay as Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:8082".to_string(),
            database_url: None,
            db_min_connections: 1,
            db_max_connections: 10,
            decisions_topic: "risk.decisions".to_string(),
            outbox_topic: "payments.outbox".to_string(),
            dlq_topic: "payments.outbox.dlq".to_string(),
            orchestrator_group: "decision-orchestrator".to_string(),
            notifier_group: "notification".to_string(),
            producer_retries: 5,
            producer_timeout_ms: 5000,
            producer_retry_backoff_ms: 100,
            notify_webhook: "http://mock-webhook:8080/notify".to_string(),
            notify_timeout_ms: 5000,
            shutdown_grace_ms: 300,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}
