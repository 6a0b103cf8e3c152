//! Webhook delivery with retry, exponential backoff and dead-lettering.
//!
//! The canonical body and its signature are computed once per dispatch;
//! retries resend the same bytes. Success is any 2xx response. Everything
//! else — non-2xx status, connect failure, timeout — is retriable until
//! the attempt budget runs out, at which point the event is dead-lettered.
//! An exhausted dispatch is never silently dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, warn};
use webhook_codec::{
    WebhookEvent, EVENT_ID_HEADER, IDEMPOTENCY_KEY_HEADER, REQUEST_ID_HEADER, SIGNATURE_HEADER,
    TIMESTAMP_HEADER, TOLERANCE_SECONDS,
};

use crate::config::DispatchConfig;
use crate::dlq::{DlqRecord, DlqStore};

/// Refresh the timestamp (and MAC) once it is this old. Kept below the
/// receiver's tolerance window so a long retry tail never goes stale.
const TIMESTAMP_REFRESH_SECONDS: i64 = TOLERANCE_SECONDS - 60;

/// Longest slice of an error response body kept for the DLQ record.
const MAX_CAPTURED_BODY_BYTES: usize = 1024;

#[derive(Debug)]
pub struct Delivery {
    pub attempts: u32,
}

#[derive(Debug)]
pub struct DeliveryFailure {
    pub attempts: u32,
    /// HTTP status of the last attempt; `None` when it failed in transport.
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    secret: String,
    config: DispatchConfig,
    dlq: Arc<DlqStore>,
}

impl Dispatcher {
    pub fn new(secret: String, config: DispatchConfig, dlq: Arc<DlqStore>) -> Self {
        Self { client: reqwest::Client::new(), secret, config, dlq }
    }

    /// Deliver `event` to `url`, retrying with exponential backoff and
    /// jitter. Does not touch the DLQ — see [`Dispatcher::deliver_or_park`].
    pub async fn deliver(
        &self,
        url: &str,
        event: &WebhookEvent,
        request_id: &str,
    ) -> Result<Delivery, DeliveryFailure> {
        let body = event.canonical_body();
        let mut signature = webhook_codec::sign(&self.secret, body.as_bytes());
        let mut timestamp = Utc::now().timestamp();

        let mut delay = self.config.initial_delay;
        let mut last_status_code = None;
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            // The receiver enforces timestamp freshness; a retry tail that
            // outlives the window needs a fresh timestamp and signature.
            if Utc::now().timestamp() - timestamp > TIMESTAMP_REFRESH_SECONDS {
                timestamp = Utc::now().timestamp();
                signature = webhook_codec::sign(&self.secret, body.as_bytes());
            }

            let result = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, &signature)
                .header(TIMESTAMP_HEADER, timestamp.to_string())
                .header(EVENT_ID_HEADER, &event.event_id)
                .header(IDEMPOTENCY_KEY_HEADER, &event.event_id)
                .header(REQUEST_ID_HEADER, request_id)
                .body(body.clone())
                .timeout(self.config.timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(
                        event_id = %event.event_id,
                        request_id,
                        attempt,
                        status = response.status().as_u16(),
                        "webhook delivered"
                    );
                    return Ok(Delivery { attempts: attempt });
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(event_id = %event.event_id, request_id, attempt, status, "webhook attempt failed");
                    last_status_code = Some(status);
                    last_error = capture_body(response.text().await.unwrap_or_default());
                }
                Err(err) => {
                    warn!(event_id = %event.event_id, request_id, attempt, error = %err, "webhook attempt errored");
                    last_status_code = None;
                    last_error = Some(err.to_string());
                }
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(jittered(delay, self.config.jitter_ratio)).await;
                delay = next_delay(delay, &self.config);
            }
        }

        warn!(event_id = %event.event_id, request_id, "webhook permanently failed after retries");
        Err(DeliveryFailure { attempts: self.config.max_retries, last_status_code, last_error })
    }

    /// Deliver, dead-lettering the event on exhaustion. Exactly one DLQ
    /// record is written per permanently failed dispatch.
    pub async fn deliver_or_park(
        &self,
        url: &str,
        event: &WebhookEvent,
        request_id: &str,
    ) -> Result<Delivery, DeliveryFailure> {
        match self.deliver(url, event, request_id).await {
            Ok(delivery) => Ok(delivery),
            Err(failure) => {
                let record = DlqRecord::new(
                    url,
                    event,
                    failure.last_status_code,
                    failure.last_error.clone(),
                );
                if let Err(err) = self.dlq.append(&record) {
                    error!(event_id = %event.event_id, %err, "failed to dead-letter webhook");
                }
                Err(failure)
            }
        }
    }
}

/// Next base delay: scale by the multiplier, capped at the configured
/// maximum.
fn next_delay(delay: Duration, config: &DispatchConfig) -> Duration {
    let scaled = delay.as_secs_f64() * config.backoff_multiplier;
    Duration::from_secs_f64(scaled.min(config.max_delay.as_secs_f64()))
}

/// Uniform jitter in `[-ratio·delay, +ratio·delay]`, floored at zero, so
/// synchronized retry bursts spread out.
fn jittered(delay: Duration, ratio: f64) -> Duration {
    let base = delay.as_secs_f64();
    let spread = base * ratio;
    let offset = if spread > 0.0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0.0
    };
    Duration::from_secs_f64((base + offset).max(0.0))
}

fn capture_body(text: String) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let mut end = text.len().min(MAX_CAPTURED_BODY_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

// ── Tests ───────────────────────────────────────────────────────
