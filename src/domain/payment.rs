use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a payment aggregate.
///
/// `Failed` is only ever written by the compensation path; an inbound
/// decision can produce `Approved` or `Declined` and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Declined,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Declined => "DECLINED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Parse from string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "APPROVED" => Some(PaymentStatus::Approved),
            "DECLINED" => Some(PaymentStatus::Declined),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict carried by an inbound risk decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Approved,
    Declined,
}

impl Verdict {
    /// Map a raw decision string to a verdict.
    ///
    /// Only an exact `"APPROVED"` approves; anything else declines.
    pub fn from_decision(decision: &str) -> Self {
        if decision == PaymentStatus::Approved.as_str() {
            Verdict::Approved
        } else {
            Verdict::Declined
        }
    }

    /// Status a successful write of this verdict leaves on the aggregate.
    #[inline]
    pub fn status(&self) -> PaymentStatus {
        match self {
            Verdict::Approved => PaymentStatus::Approved,
            Verdict::Declined => PaymentStatus::Declined,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status().fmt(f)
    }
}

/// Payment aggregate as persisted by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub merchant_id: String,
    pub created_at: DateTime<Utc>,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_reason: Option<String>,
    pub correlation_id: String,
    /// Incremented on every successful decision write
    pub version: i64,
}

impl Payment {
    /// Create a pending payment with no risk assessment yet.
    pub fn pending(id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Payment {
            id: id.into(),
            user_id: String::new(),
            amount: 0,
            currency: String::new(),
            merchant_id: String::new(),
            created_at: Utc::now(),
            status: PaymentStatus::Pending,
            risk_score: None,
            risk_reason: None,
            correlation_id: correlation_id.into(),
            version: 0,
        }
    }
}
