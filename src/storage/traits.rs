// src/storage/traits.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{OutboxEvent, Payment, PaymentStatus};

/// Errors surfaced by the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The conditional update matched no record.
    #[error("record not found: {0}")]
    NotFound(String),

    /// An insert collided with an existing key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }
}

/// Payment aggregate persistence.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Atomically set status, score and reason and bump the version.
    ///
    /// Fails with [`StoreError::NotFound`] when no payment has this id.
    async fn update_decision(
        &self,
        id: &str,
        status: PaymentStatus,
        score: f64,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, StoreError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;
}

/// Outbox persistence.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert keyed by the event's idempotency id.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when the id is already recorded.
    async fn insert_event(&self, event: &OutboxEvent) -> Result<(), StoreError>;

    async fn get_event(&self, id: &str) -> Result<Option<OutboxEvent>, StoreError>;

    /// Flip `published` to true. Never reverts; the first timestamp is kept.
    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
