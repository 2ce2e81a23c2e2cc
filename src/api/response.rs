use serde::Serialize;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        HealthResponse { status: "ok" }
    }
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
}

impl ReadyResponse {
    pub fn ready() -> Self {
        ReadyResponse { status: "ready" }
    }
}

/// Returned when a decision was handed to the broker.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    /// Idempotency id the finalize event will be recorded under
    pub outbox_id: String,
}

impl AcceptedResponse {
    pub fn new(outbox_id: impl Into<String>) -> Self {
        AcceptedResponse {
            status: "accepted",
            outbox_id: outbox_id.into(),
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "BAD_REQUEST")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "CONFLICT")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "UNAVAILABLE")
    }
}
