use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::broker::{Header, Producer};
use crate::domain::{RiskDecision, HEADER_CORRELATION_ID};
use crate::observability::MetricsRegistry;
use crate::pipeline::outbox_id_for;
use crate::storage::PaymentStore;

use super::request::CreatePaymentRequest;
use super::response::{AcceptedResponse, ErrorResponse, HealthResponse, ReadyResponse};

/// Shared application state.
pub struct AppState {
    /// Producer used to enqueue inbound decisions
    pub producer: Arc<dyn Producer>,

    /// Topic the decision orchestrator consumes
    pub decisions_topic: String,

    /// Payment aggregates that decisions are applied to
    pub payments: Arc<dyn PaymentStore>,

    pub metrics: Arc<MetricsRegistry>,

    /// Application start time
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/payments", post(handle_create_payment))
        .route("/v1/decisions", post(handle_ingest))
        .route("/healthz", get(handle_health))
        .route("/readyz", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Register a pending payment so a later decision has an aggregate to update.
async fn handle_create_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePaymentRequest>,
) -> axum::response::Response {
    if req.id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("payment id is required")),
        )
            .into_response();
    }

    let payment = req.into_payment();

    match state.payments.insert_payment(&payment).await {
        Ok(()) => {
            info!(payment_id = %payment.id, "Payment registered");
            (StatusCode::CREATED, Json(payment)).into_response()
        }
        Err(e) if e.is_duplicate() => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::conflict(e.to_string())),
        )
            .into_response(),
        Err(e) => {
            warn!(payment_id = %payment.id, error = %e, "Failed to register payment");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::unavailable(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Validate a risk decision and enqueue it on the decisions topic.
///
/// The body is forwarded unchanged, keyed by payment id.
async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> axum::response::Response {
    let decision = match RiskDecision::from_slice(&body) {
        Ok(decision) => decision,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::bad_request(e.to_string())),
            )
                .into_response();
        }
    };

    let headers = vec![Header::new(
        HEADER_CORRELATION_ID,
        decision.correlation_id.clone(),
    )];

    if let Err(e) = state
        .producer
        .publish(
            &state.decisions_topic,
            Bytes::copy_from_slice(decision.payment_id.as_bytes()),
            body,
            headers,
        )
        .await
    {
        warn!(
            payment_id = %decision.payment_id,
            error = %e,
            "Failed to enqueue risk decision"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::unavailable(e.to_string())),
        )
            .into_response();
    }

    info!(
        payment_id = %decision.payment_id,
        correlation_id = %decision.correlation_id,
        "Risk decision accepted"
    );

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse::new(outbox_id_for(&decision))),
    )
        .into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse::ok())
}

async fn handle_ready() -> impl IntoResponse {
    Json(ReadyResponse::ready())
}

/// Metrics endpoint (Prometheus format).
async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = format!(
        r#"# HELP riskfin_build_info Build information
# TYPE riskfin_build_info gauge
riskfin_build_info{{version="{}"}} 1

# HELP riskfin_uptime_seconds Application uptime in seconds
# TYPE riskfin_uptime_seconds counter
riskfin_uptime_seconds {}

{}"#,
        state.version,
        state.start_time.elapsed().as_secs(),
        state.metrics.to_prometheus(),
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        metrics,
    )
}
