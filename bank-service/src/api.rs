//! HTTP surface of the bank service: charge registration, payment
//! settlement, and the dead-letter queue admin endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;
use webhook_codec::WebhookEvent;

use crate::bank::{BankCharge, BankLedger};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::dlq::{DlqRecord, DlqStore};

// ── Application state ───────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<BankLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub dlq: Arc<DlqStore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let dlq = Arc::new(DlqStore::new(config.dlq_path.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            config.webhook_secret.clone(),
            config.dispatch.clone(),
            Arc::clone(&dlq),
        ));
        Self {
            config: Arc::new(config),
            ledger: Arc::new(BankLedger::new()),
            dispatcher,
            dlq,
        }
    }
}

// ── Response types ──────────────────────────────────────────────

#[derive(Serialize)]
struct DlqListResponse {
    count: usize,
    items: Vec<DlqRecord>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    registered_charges: usize,
}

#[derive(Deserialize)]
struct DlqListParams {
    limit: Option<usize>,
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /bank/pix/charges — register a charge on the bank's side.
async fn register_charge(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "Invalid payload" }));
    };

    let external_id = payload.get("external_id").and_then(|v| v.as_str());
    let value = payload.get("value").and_then(webhook_codec::decimal_from_json);
    let (Some(external_id), Some(value)) = (external_id, value) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "Invalid payload" }));
    };

    let webhook_url = payload
        .get("webhook_url")
        .and_then(|v| v.as_str())
        .unwrap_or(&state.config.webhook_url)
        .to_string();

    state.ledger.register(BankCharge {
        external_id: external_id.into(),
        value,
        webhook_url,
        status: "PENDING".into(),
    });
    info!(external_id, %value, "charge registered in bank");

    json_response(
        StatusCode::CREATED,
        json!({ "message": "Charge registered in bank", "external_id": external_id }),
    )
}

/// POST /bank/pix/pay — settle a charge and notify the receiver.
///
/// The confirmation webhook is dispatched inline, with retries; an
/// exhausted delivery lands in the DLQ and the settlement still succeeds.
async fn pay_charge(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "Invalid payload" }));
    };
    let Some(external_id) = payload.get("external_id").and_then(|v| v.as_str()) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "Invalid payload" }));
    };

    let Some(charge) = state.ledger.get(external_id) else {
        return json_response(StatusCode::NOT_FOUND, json!({ "error": "Charge not found" }));
    };

    let event = WebhookEvent {
        event_id: format!("evt_{}", Uuid::new_v4()),
        external_id: external_id.into(),
        value: charge.value,
        status: "PAID".into(),
    };
    let request_id = Uuid::new_v4().to_string();

    let delivered = state
        .dispatcher
        .deliver_or_park(&charge.webhook_url, &event, &request_id)
        .await
        .is_ok();

    state.ledger.mark_paid(external_id);
    info!(external_id, event_id = %event.event_id, delivered, "PIX payment processed");

    json_response(
        StatusCode::OK,
        json!({
            "message": "PIX processed by bank",
            "event_id": event.event_id,
            "delivered": delivered,
        }),
    )
}

/// GET /bank/dlq?limit=N — most recent dead-lettered deliveries.
async fn dlq_list(State(state): State<AppState>, Query(params): Query<DlqListParams>) -> Response {
    match state.dlq.list(params.limit.unwrap_or(50)) {
        Ok(items) => {
            let response = DlqListResponse { count: items.len(), items };
            (StatusCode::OK, axum::Json(response)).into_response()
        }
        Err(err) => {
            error!(%err, "failed to list DLQ");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal server error" }))
        }
    }
}

/// POST /bank/dlq/replay — re-dispatch one dead-lettered event.
///
/// Replays keep the stored `event_id`, so the receiver treats them
/// idempotently. A failed replay leaves the record untouched and
/// replayable.
async fn dlq_replay(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "event_id is required" }));
    };
    let Some(event_id) = payload.get("event_id").and_then(|v| v.as_str()) else {
        return json_response(StatusCode::BAD_REQUEST, json!({ "error": "event_id is required" }));
    };

    let record = match state.dlq.get_by_event_id(event_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            return json_response(
                StatusCode::NOT_FOUND,
                json!({ "error": "event_id not found in DLQ" }),
            );
        }
        Err(err) => {
            error!(%err, "failed to read DLQ");
            return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal server error" }));
        }
    };

    let request_id = Uuid::new_v4().to_string();
    match state.dispatcher.deliver(&record.url, &record.payload, &request_id).await {
        Ok(_) => {
            if let Err(err) = state.dlq.mark_replayed(event_id) {
                error!(event_id, %err, "replay delivered but bookkeeping failed");
                return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal server error" }));
            }
            info!(event_id, "DLQ event replayed");
            json_response(StatusCode::OK, json!({ "message": "replayed", "event_id": event_id }))
        }
        Err(_) => json_response(
            StatusCode::BAD_GATEWAY,
            json!({ "message": "replay_failed", "event_id": event_id }),
        ),
    }
}

/// GET /health — liveness probe.
async fn health(State(state): State<AppState>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "ok".into(), registered_charges: state.ledger.count() })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/bank/pix/charges", post(register_charge))
        .route("/bank/pix/pay", post(pay_charge))
        .route("/bank/dlq", get(dlq_list))
        .route("/bank/dlq/replay", post(dlq_replay))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
