//! HTTP API for the charges service.
//!
//! Charge creation and reads, the external payment confirmation surface,
//! and the webhook ingress. Charge reads are served through a short-lived
//! cache and apply lazy expiration: a PENDING charge whose oracle window
//! is gone flips to EXPIRED at read time.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::charge::{
    Charge, ChargeStatus, ChargeStore, InMemoryChargeStore, NewCharge, TransitionOutcome,
};
use crate::config::Config;
use crate::error::{raw_json_response, ApiError};
use crate::expiration::{ExpirationOracle, InMemoryOracle};
use crate::idempotency::IdempotencyStore;
use crate::middleware::{propagate_request_id, require_api_key};
use crate::ttl_cache::TtlCache;
use crate::webhook::pix_webhook;

// ── Application state ───────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub charges: Arc<dyn ChargeStore>,
    pub oracle: Arc<dyn ExpirationOracle>,
    pub idempotency: Arc<IdempotencyStore>,
    pub read_cache: Arc<TtlCache>,
}

impl AppState {
    /// Production wiring: one shared TTL cache backs the oracle, the
    /// idempotency store and the read cache.
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(TtlCache::new());
        let idempotency = IdempotencyStore::new(
            Arc::clone(&cache),
            Duration::from_secs(config.idempotency_ttl_seconds),
        );
        Self {
            config: Arc::new(config),
            charges: Arc::new(InMemoryChargeStore::new()),
            oracle: Arc::new(InMemoryOracle::new(Arc::clone(&cache))),
            idempotency: Arc::new(idempotency),
            read_cache: cache,
        }
    }
}

pub(crate) fn read_cache_key(charge_id: u64) -> String {
    format!("charge:{charge_id}")
}

// ── Response types ──────────────────────────────────────────────

#[derive(Serialize)]
struct CreatedChargeResponse {
    id: u64,
    external_id: String,
    status: ChargeStatus,
}

#[derive(Serialize)]
struct ChargeResponse {
    id: u64,
    external_id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    value: Decimal,
    status: ChargeStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl From<Charge> for ChargeResponse {
    fn from(charge: Charge) -> Self {
        ChargeResponse {
            id: charge.id,
            external_id: charge.external_id,
            value: charge.value,
            status: charge.status,
            created_at: charge.created_at,
            expires_at: charge.expires_at,
            paid_at: charge.paid_at,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /payment/charges — create a PENDING charge and arm its payment
/// window.
async fn create_charge(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON payload".into()))?;

    let raw_value = payload
        .get("value")
        .ok_or_else(|| ApiError::BadRequest("Value is required".into()))?;
    let value = webhook_codec::decimal_from_json(raw_value)
        .ok_or_else(|| ApiError::BadRequest("Invalid value".into()))?;
    if value <= Decimal::ZERO {
        return Err(ApiError::BadRequest("Invalid value".into()));
    }

    let now = Utc::now();
    let ttl_seconds = state.config.charge_ttl_seconds;
    let charge = state
        .charges
        .insert(NewCharge {
            external_id: Uuid::new_v4().to_string(),
            value,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
        })
        .map_err(|err| {
            error!(%err, "failed to persist charge");
            ApiError::Internal
        })?;

    // The oracle window opens with the charge; its absence later is the
    // authoritative expiry signal.
    if let Err(err) = state.oracle.arm(&charge.external_id, Duration::from_secs(ttl_seconds)) {
        error!(charge_id = charge.id, %err, "failed to arm expiration oracle");
        return Err(ApiError::Unavailable);
    }

    info!(charge_id = charge.id, external_id = %charge.external_id, value = %charge.value, "charge created");

    let response = CreatedChargeResponse {
        id: charge.id,
        external_id: charge.external_id,
        status: charge.status,
    };
    Ok((StatusCode::CREATED, axum::Json(response)).into_response())
}

/// GET /payment/charges/:id — read a charge, lazily expiring it when its
/// payment window is gone. Responses are cached briefly.
async fn get_charge(
    State(state): State<AppState>,
    Path(charge_id): Path<u64>,
) -> Result<Response, ApiError> {
    let cache_key = read_cache_key(charge_id);
    if let Some(cached) = state.read_cache.get(&cache_key) {
        return Ok(raw_json_response(StatusCode::OK, cached));
    }

    let mut charge = state
        .charges
        .find_by_id(charge_id)
        .map_err(|err| {
            error!(charge_id, %err, "charge lookup failed");
            ApiError::Internal
        })?
        .ok_or_else(|| ApiError::NotFound("Charge not found".into()))?;

    if charge.status == ChargeStatus::Pending {
        let armed = state.oracle.is_armed(&charge.external_id).map_err(|err| {
            error!(charge_id, %err, "expiration oracle check failed");
            ApiError::Unavailable
        })?;
        if !armed {
            match state.charges.transition(&charge.external_id, ChargeStatus::Expired, Utc::now())
            {
                Ok(Some(TransitionOutcome::Applied(expired))) => {
                    warn!(charge_id, "charge expired at read time");
                    charge = expired;
                }
                Ok(Some(TransitionOutcome::Rejected(current))) => charge = current,
                Ok(None) => return Err(ApiError::NotFound("Charge not found".into())),
                Err(err) => {
                    error!(charge_id, %err, "failed to mark charge expired");
                    return Err(ApiError::Internal);
                }
            }
        }
    }

    let body = serde_json::to_string(&ChargeResponse::from(charge))
        .map_err(|_| ApiError::Internal)?;
    state.read_cache.set_ex(
        &cache_key,
        &body,
        Duration::from_secs(state.config.read_cache_ttl_seconds),
    );
    Ok(raw_json_response(StatusCode::OK, body))
}

/// POST /payment/external — API-key-protected manual confirmation path,
/// driving the same state machine and exact-value check as the webhook.
async fn external_payment(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid payload".into()))?;

    let external_id = payload.get("external_id").and_then(|v| v.as_str());
    let raw_value = payload.get("value");
    let (Some(external_id), Some(raw_value)) = (external_id, raw_value) else {
        return Err(ApiError::BadRequest("Invalid payload".into()));
    };

    let charge = state
        .charges
        .find_by_external_id(external_id)
        .map_err(|err| {
            error!(external_id, %err, "charge lookup failed");
            ApiError::Internal
        })?
        .ok_or_else(|| ApiError::BadRequest("Invalid external_id".into()))?;

    if charge.status != ChargeStatus::Pending {
        warn!(charge_id = charge.id, status = %charge.status, "invalid payment attempt");
        return Err(ApiError::BadRequest("Charge not payable".into()));
    }

    let value = webhook_codec::decimal_from_json(raw_value)
        .ok_or_else(|| ApiError::BadRequest("Invalid value".into()))?;
    if value != charge.value {
        warn!(charge_id = charge.id, expected = %charge.value, received = %value, "payment value mismatch");
        return Err(ApiError::BadRequest("Invalid value".into()));
    }

    match state.charges.transition(external_id, ChargeStatus::Paid, Utc::now()) {
        Ok(Some(TransitionOutcome::Applied(paid))) => {
            if let Err(err) = state.oracle.disarm(external_id) {
                warn!(external_id, %err, "failed to disarm expiration oracle");
            }
            state.read_cache.delete(&read_cache_key(paid.id));
            info!(charge_id = paid.id, external_id, value = %paid.value, "payment confirmed");
            Ok(raw_json_response(
                StatusCode::OK,
                json!({ "message": "Payment confirmed" }).to_string(),
            ))
        }
        Ok(Some(TransitionOutcome::Rejected(_))) => {
            Err(ApiError::BadRequest("Charge not payable".into()))
        }
        Ok(None) => Err(ApiError::BadRequest("Invalid external_id".into())),
        Err(err) => {
            error!(charge_id = charge.id, %err, "failed to commit payment");
            Err(ApiError::Internal)
        }
    }
}

/// GET /health — liveness probe.
async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "ok".into() })
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/payment/external", post(external_payment))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/payment/charges", post(create_charge))
        .route("/payment/charges/:id", get(get_charge))
        .route("/webhooks/pix", post(pix_webhook))
        .route("/health", get(health))
        .merge(protected)
        .layer(axum::middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_charge_response_serializes_value_as_number() {
        let now = Utc::now();
        let response = ChargeResponse {
            id: 7,
            external_id: "ext-7".into(),
            value: Decimal::from_str("120.00").unwrap(),
            status: ChargeStatus::Pending,
            created_at: now,
            expires_at: now,
            paid_at: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"value\":120.00"));
        assert!(json.contains("\"status\":\"PENDING\""));
        assert!(json.contains("\"paid_at\":null"));
    }

    #[test]
    fn test_read_cache_key_shape() {
        assert_eq!(read_cache_key(42), "charge:42");
    }
}
