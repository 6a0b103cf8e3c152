//! Inbound PIX webhook processing.
//!
//! Pipeline, short-circuiting on the first failure: signature and
//! freshness over the raw body, idempotency gate, minimal schema, status
//! filter, charge lookup, terminal-state absorption, expiration oracle,
//! exact-decimal value match, PAID transition.
//!
//! Every 2xx answer consumes the idempotency key; error answers leave it
//! untouched so the sender can retry a corrected or delayed event.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use webhook_codec::{
    IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

use crate::api::{read_cache_key, AppState};
use crate::charge::{ChargeStatus, TransitionOutcome};
use crate::error::{raw_json_response, ApiError};

pub async fn pix_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = header_str(&headers, REQUEST_ID_HEADER).unwrap_or("unknown").to_owned();

    // 1. Authenticity and freshness, over the exact bytes received.
    let verified = webhook_codec::verify(
        &state.config.webhook_secret,
        &body,
        header_str(&headers, SIGNATURE_HEADER),
        header_str(&headers, TIMESTAMP_HEADER),
        Utc::now().timestamp(),
    );
    if let Err(err) = verified {
        warn!(%request_id, %err, "webhook rejected by signature check");
        return ApiError::Unauthorized("Invalid webhook signature".into()).into_response();
    }

    // 2. Idempotency gate.
    let Some(idempotency_key) = header_str(&headers, IDEMPOTENCY_KEY_HEADER).map(str::to_owned)
    else {
        return ApiError::BadRequest("Idempotency-Key missing".into()).into_response();
    };
    if let Some(cached) = state.idempotency.begin(&idempotency_key) {
        info!(%request_id, key = %idempotency_key, "idempotent replay served from cache");
        return raw_json_response(StatusCode::OK, cached);
    }

    // 3. Minimal schema.
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return ApiError::BadRequest("Invalid JSON payload".into()).into_response();
    };
    let external_id = payload.get("external_id").and_then(|v| v.as_str());
    let status = payload.get("status").and_then(|v| v.as_str());
    let value = payload.get("value");
    let (Some(external_id), Some(status), Some(value)) = (external_id, status, value) else {
        return ApiError::BadRequest("Invalid payload".into()).into_response();
    };

    // 4. Only settled payments matter here.
    if status != ChargeStatus::Paid.as_str() {
        return commit_reply(&state, &idempotency_key, json!({ "message": "Ignored" }));
    }

    // 5. Charge lookup.
    let charge = match state.charges.find_by_external_id(external_id) {
        Ok(Some(charge)) => charge,
        Ok(None) => {
            error!(%request_id, external_id, "charge not found for webhook");
            return ApiError::NotFound("Charge not found".into()).into_response();
        }
        Err(err) => {
            error!(%request_id, external_id, %err, "charge lookup failed");
            return ApiError::Internal.into_response();
        }
    };

    // 6. Terminal states absorb duplicates without error, so upstream
    //    retries never escalate.
    if charge.status.is_terminal() {
        warn!(%request_id, charge_id = charge.id, status = %charge.status, "webhook for already-processed charge");
        return commit_reply(&state, &idempotency_key, json!({ "message": "Charge already processed" }));
    }

    // 7. The oracle owns "still payable". An unreachable oracle must leave
    //    the idempotency key unconsumed so the sender can retry later.
    let armed = match state.oracle.is_armed(external_id) {
        Ok(armed) => armed,
        Err(err) => {
            error!(%request_id, external_id, %err, "expiration oracle check failed");
            return ApiError::Unavailable.into_response();
        }
    };
    if !armed {
        return expire_charge(&state, &request_id, external_id, &idempotency_key);
    }

    // 8. Exact decimal equality; binary floats never enter the comparison.
    let Some(webhook_value) = webhook_codec::decimal_from_json(value) else {
        return ApiError::BadRequest("Invalid value type".into()).into_response();
    };
    if webhook_value != charge.value {
        warn!(
            %request_id,
            charge_id = charge.id,
            got = %webhook_value,
            expected = %charge.value,
            "webhook value mismatch"
        );
        return ApiError::BadRequest("Invalid value".into()).into_response();
    }

    // 9. Commit the payment.
    match state.charges.transition(external_id, ChargeStatus::Paid, Utc::now()) {
        Ok(Some(TransitionOutcome::Applied(paid))) => {
            // Store commit first; oracle and cache cleanup are best-effort
            // afterthoughts — a crash in between still reads back as PAID.
            if let Err(err) = state.oracle.disarm(external_id) {
                warn!(%request_id, external_id, %err, "failed to disarm expiration oracle");
            }
            state.read_cache.delete(&read_cache_key(paid.id));
            info!(%request_id, charge_id = paid.id, external_id, "payment confirmed via webhook");
            commit_reply(&state, &idempotency_key, json!({ "message": "Payment confirmed" }))
        }
        Ok(Some(TransitionOutcome::Rejected(current))) => {
            // Lost the race against a concurrent confirmation.
            warn!(%request_id, charge_id = current.id, status = %current.status, "payment transition rejected");
            commit_reply(&state, &idempotency_key, json!({ "message": "Charge already processed" }))
        }
        Ok(None) => ApiError::NotFound("Charge not found".into()).into_response(),
        Err(err) => {
            error!(%request_id, charge_id = charge.id, %err, "failed to commit payment");
            ApiError::Internal.into_response()
        }
    }
}

/// Late webhook for a charge whose payment window closed: force the
/// PENDING → EXPIRED transition, then answer 200 so the sender stops.
fn expire_charge(
    state: &AppState,
    request_id: &str,
    external_id: &str,
    idempotency_key: &str,
) -> Response {
    match state.charges.transition(external_id, ChargeStatus::Expired, Utc::now()) {
        Ok(Some(TransitionOutcome::Applied(expired))) => {
            warn!(%request_id, charge_id = expired.id, "webhook received for expired charge");
            state.read_cache.delete(&read_cache_key(expired.id));
            commit_reply(state, idempotency_key, json!({ "message": "Expired charge ignored" }))
        }
        Ok(Some(TransitionOutcome::Rejected(current))) if current.status == ChargeStatus::Paid => {
            // Another confirmation landed between our lookup and now.
            commit_reply(state, idempotency_key, json!({ "message": "Charge already processed" }))
        }
        Ok(Some(TransitionOutcome::Rejected(_))) => {
            commit_reply(state, idempotency_key, json!({ "message": "Expired charge ignored" }))
        }
        Ok(None) => ApiError::NotFound("Charge not found".into()).into_response(),
        Err(err) => {
            error!(%request_id, external_id, %err, "failed to mark charge expired");
            ApiError::Internal.into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Serialize the reply once, consume the idempotency key with those exact
/// bytes, and answer 200 with them.
fn commit_reply(state: &AppState, idempotency_key: &str, body: serde_json::Value) -> Response {
    let body = body.to_string();
    state.idempotency.commit(idempotency_key, &body);
    raw_json_response(StatusCode::OK, body)
}
