use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::{PaymentStatus, Verdict};
use crate::observability::MetricsRegistry;
use crate::storage::{PaymentStore, StoreError};

/// Reason persisted when the compensating write runs.
pub const COMPENSATION_REASON: &str = "compensation: update failed";

/// Which write path an apply took.
#[derive(Debug)]
pub enum ApplyPath {
    /// The decision was written as given.
    Primary,
    /// The primary write failed with `cause`; a FAILED status was written
    /// instead, with the compensation's own result in `compensation`.
    Compensated {
        cause: StoreError,
        compensation: Result<(), StoreError>,
    },
}

/// Result of applying a decision.
#[derive(Debug)]
pub struct Applied {
    /// Status intended by the verdict. This is what the outbound event
    /// carries, whether or not compensation ran.
    pub status: PaymentStatus,
    pub path: ApplyPath,
}

impl Applied {
    pub fn compensated(&self) -> bool {
        matches!(self.path, ApplyPath::Compensated { .. })
    }

    /// True when the primary write found no payment with the given id.
    pub fn not_found(&self) -> bool {
        matches!(&self.path, ApplyPath::Compensated { cause, .. } if cause.is_not_found())
    }
}

/// Writes decisions onto payment aggregates.
pub struct DecisionApplier {
    payments: Arc<dyn PaymentStore>,
    metrics: Arc<MetricsRegistry>,
}

impl DecisionApplier {
    pub fn new(payments: Arc<dyn PaymentStore>, metrics: Arc<MetricsRegistry>) -> Self {
        DecisionApplier { payments, metrics }
    }

    /// Apply a verdict to a payment.
    ///
    /// Never fails: a failed primary write is followed by a best-effort
    /// compensating write of FAILED, and errors from that write are
    /// swallowed after logging.
    pub async fn apply(
        &self,
        payment_id: &str,
        verdict: Verdict,
        score: f64,
        reason: &str,
    ) -> Applied {
        let status = verdict.status();

        let cause = match self
            .payments
            .update_decision(payment_id, status, score, reason)
            .await
        {
            Ok(()) => {
                self.metrics.record_apply(None);
                return Applied {
                    status,
                    path: ApplyPath::Primary,
                };
            }
            Err(e) => e,
        };

        error!(
            payment_id = payment_id,
            error = %cause,
            "Failed to update payment decision, compensating"
        );

        let compensation = self
            .payments
            .update_decision(payment_id, PaymentStatus::Failed, score, COMPENSATION_REASON)
            .await;

        if let Err(ref e) = compensation {
            warn!(
                payment_id = payment_id,
                error = %e,
                "Compensating write failed"
            );
        }
        self.metrics.record_apply(Some(compensation.is_ok()));

        Applied {
            status,
            path: ApplyPath::Compensated {
                cause,
                compensation,
            },
        }
    }
}
