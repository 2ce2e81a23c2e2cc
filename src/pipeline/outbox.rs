use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::OutboxEvent;
use crate::observability::MetricsRegistry;
use crate::storage::{OutboxStore, StoreError};

/// Durably records events ahead of their publish.
pub struct OutboxWriter {
    outbox: Arc<dyn OutboxStore>,
    metrics: Arc<MetricsRegistry>,
}

impl OutboxWriter {
    pub fn new(outbox: Arc<dyn OutboxStore>, metrics: Arc<MetricsRegistry>) -> Self {
        OutboxWriter { outbox, metrics }
    }

    /// Insert `event` under its idempotency id.
    ///
    /// A second record of the same id fails with [`StoreError::DuplicateKey`]
    /// and leaves the stored record untouched.
    pub async fn record(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        match self.outbox.insert_event(event).await {
            Ok(()) => {
                self.metrics.record_outbox_insert(false);
                Ok(())
            }
            Err(e) if e.is_duplicate() => {
                self.metrics.record_outbox_insert(true);
                info!(outbox_id = %event.id, "Outbox event already recorded");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Load a previously recorded event.
    pub async fn load(&self, id: &str) -> Result<Option<OutboxEvent>, StoreError> {
        self.outbox.get_event(id).await
    }
}

/// Marks recorded events as published.
pub struct PublishAcknowledger {
    outbox: Arc<dyn OutboxStore>,
    metrics: Arc<MetricsRegistry>,
}

impl PublishAcknowledger {
    pub fn new(outbox: Arc<dyn OutboxStore>, metrics: Arc<MetricsRegistry>) -> Self {
        PublishAcknowledger { outbox, metrics }
    }

    /// Best-effort: the broker already holds the event, so a failure here
    /// is logged and reported as `false` but never fails the pipeline.
    pub async fn mark_published(&self, id: &str) -> bool {
        match self.outbox.mark_published(id, Utc::now()).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_mark_failure();
                warn!(outbox_id = id, error = %e, "Failed to mark outbox event published");
                false
            }
        }
    }
}
