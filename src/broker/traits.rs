use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::message::{Headers, Message};

/// Errors surfaced by the broker transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Network or leader hiccup; the send may be retried.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// No acknowledgment within the send timeout.
    #[error("broker acknowledgment timed out")]
    Timeout,

    /// The broker refused the write; retrying will not help.
    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("broker connection closed")]
    Closed,
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_) | BrokerError::Timeout)
    }
}

/// Write side of the broker.
///
/// `publish` returns only after the broker has acknowledged the write on
/// all in-sync replicas.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: Bytes,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), BrokerError>;
}

/// Read side of the broker, bound to one topic and consumer group.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    async fn fetch(&self) -> Result<Message, BrokerError>;

    /// Advance the group's committed offset past `message`.
    async fn commit(&self, message: &Message) -> Result<(), BrokerError>;
}
