use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payment::Verdict;

/// Reasons an inbound decision body is rejected as malformed.
#[derive(Error, Debug)]
pub enum DecisionParseError {
    #[error("invalid decision payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decision is missing payment_id")]
    MissingPaymentId,
}

/// Inbound risk decision message.
///
/// Ephemeral: it drives one finalize and is never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub payment_id: String,

    /// Raw verdict string, see [`Verdict::from_decision`]
    #[serde(default)]
    pub decision: String,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub correlation_id: String,
}

impl RiskDecision {
    pub fn new(
        payment_id: impl Into<String>,
        verdict: Verdict,
        score: f64,
        reason: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        RiskDecision {
            payment_id: payment_id.into(),
            decision: verdict.status().as_str().to_string(),
            score,
            reason: reason.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Decode a decision from a message body.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecisionParseError> {
        let decision: RiskDecision = serde_json::from_slice(payload)?;
        if decision.payment_id.trim().is_empty() {
            return Err(DecisionParseError::MissingPaymentId);
        }
        Ok(decision)
    }

    #[inline]
    pub fn verdict(&self) -> Verdict {
        Verdict::from_decision(&self.decision)
    }
}
