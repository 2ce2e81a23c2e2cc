use chrono::Utc;
use serde::Deserialize;

use crate::domain::{Payment, PaymentStatus};

/// Request to register a payment awaiting its risk decision.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub id: String,

    #[serde(default)]
    pub user_id: String,

    /// Amount in minor units
    #[serde(default)]
    pub amount: i64,

    #[serde(default)]
    pub currency: String,

    #[serde(default)]
    pub merchant_id: String,

    #[serde(default)]
    pub correlation_id: String,
}

impl CreatePaymentRequest {
    /// Convert to a pending payment at version 0.
    pub fn into_payment(self) -> Payment {
        Payment {
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            currency: self.currency.to_uppercase(),
            merchant_id: self.merchant_id,
            created_at: Utc::now(),
            status: PaymentStatus::Pending,
            risk_score: None,
            risk_reason: None,
            correlation_id: self.correlation_id,
            version: 0,
        }
    }
}
