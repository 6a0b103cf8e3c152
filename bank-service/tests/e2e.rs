//! Full two-service flows: the real charges API served over loopback HTTP,
//! settled by the bank service through the real dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use bank_service::api::{build_router as build_bank_router, AppState as BankState};
use bank_service::config::{Config as BankConfig, DispatchConfig};
use charges_api::api::{build_router as build_receiver_router, AppState as ReceiverState};
use charges_api::charge::InMemoryChargeStore;
use charges_api::config::Config as ReceiverConfig;
use charges_api::expiration::{ExpirationOracle, InMemoryOracle, OracleError};
use charges_api::idempotency::IdempotencyStore;
use charges_api::ttl_cache::TtlCache;

const SECRET: &str = "e2e-webhook-secret";

fn receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        host: "127.0.0.1".into(),
        port: 0,
        webhook_secret: SECRET.into(),
        external_api_key: None,
        charge_ttl_seconds: 1800,
        idempotency_ttl_seconds: 300,
        read_cache_ttl_seconds: 60,
    }
}

/// Serve a receiver router on an ephemeral port; returns its base URL.
async fn spawn_receiver(state: ReceiverState) -> String {
    let router = build_receiver_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn bank_state(dir: &tempfile::TempDir, max_retries: u32) -> BankState {
    BankState::new(BankConfig {
        host: "127.0.0.1".into(),
        port: 0,
        webhook_secret: SECRET.into(),
        webhook_url: "http://127.0.0.1:1/webhooks/pix".into(),
        dlq_path: dir.path().join("failed_webhooks.jsonl"),
        dispatch: DispatchConfig {
            max_retries,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(40),
            timeout: Duration::from_secs(2),
            jitter_ratio: 0.20,
        },
    })
}

async fn bank_post(router: &Router, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
}

async fn create_receiver_charge(base: &str, value: &str) -> (u64, String) {
    let response = reqwest::Client::new()
        .post(format!("{base}/payment/charges"))
        .header("Content-Type", "application/json")
        .body(format!(r#"{{"value":{value}}}"#))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    (
        body["id"].as_u64().unwrap(),
        body["external_id"].as_str().unwrap().to_string(),
    )
}

async fn read_receiver_charge(base: &str, id: u64) -> serde_json::Value {
    let response = reqwest::Client::new()
        .get(format!("{base}/payment/charges/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_full_payment_flow() {
    let receiver = ReceiverState::new(receiver_config());
    let base = spawn_receiver(receiver).await;

    let dir = tempfile::tempdir().unwrap();
    let bank = bank_state(&dir, 3);
    let bank_router = build_bank_router(bank.clone());

    let (id, external_id) = create_receiver_charge(&base, "120.00").await;

    let (status, _) = bank_post(
        &bank_router,
        "/bank/pix/charges",
        format!(
            r#"{{"external_id":"{external_id}","value":120.00,"webhook_url":"{base}/webhooks/pix"}}"#
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, paid) = bank_post(
        &bank_router,
        "/bank/pix/pay",
        format!(r#"{{"external_id":"{external_id}"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["delivered"], true);

    let charge = read_receiver_charge(&base, id).await;
    assert_eq!(charge["status"], "PAID");
    assert!(charge["paid_at"].is_string());
    assert!(bank.dlq.list(50).unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_charge_flow() {
    let receiver = ReceiverState::new(receiver_config());
    let base = spawn_receiver(receiver.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let bank_router = build_bank_router(bank_state(&dir, 3));

    let (id, external_id) = create_receiver_charge(&base, "95.50").await;

    // The payment window closes before the bank settles.
    receiver.oracle.disarm(&external_id).unwrap();

    bank_post(
        &bank_router,
        "/bank/pix/charges",
        format!(
            r#"{{"external_id":"{external_id}","value":95.50,"webhook_url":"{base}/webhooks/pix"}}"#
        ),
    )
    .await;
    let (status, paid) = bank_post(
        &bank_router,
        "/bank/pix/pay",
        format!(r#"{{"external_id":"{external_id}"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The receiver answered 200 (expired-ignored), so delivery succeeded.
    assert_eq!(paid["delivered"], true);

    let charge = read_receiver_charge(&base, id).await;
    assert_eq!(charge["status"], "EXPIRED");
    assert!(charge["paid_at"].is_null());
}

/// Oracle whose reads can be switched to fail, to knock the receiver into
/// its 503 path.
struct FlakyOracle {
    inner: InMemoryOracle,
    fail_reads: AtomicBool,
}

impl ExpirationOracle for FlakyOracle {
    fn arm(&self, external_id: &str, ttl: Duration) -> Result<(), OracleError> {
        self.inner.arm(external_id, ttl)
    }

    fn is_armed(&self, external_id: &str) -> Result<bool, OracleError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(OracleError("connection refused".into()));
        }
        self.inner.is_armed(external_id)
    }

    fn disarm(&self, external_id: &str) -> Result<(), OracleError> {
        self.inner.disarm(external_id)
    }
}

#[tokio::test]
async fn test_receiver_outage_dead_letters_then_replay_confirms() {
    // Receiver whose expiration oracle can be taken down.
    let cache = Arc::new(TtlCache::new());
    let oracle = Arc::new(FlakyOracle {
        inner: InMemoryOracle::new(Arc::clone(&cache)),
        fail_reads: AtomicBool::new(false),
    });
    let receiver = ReceiverState {
        config: Arc::new(receiver_config()),
        charges: Arc::new(InMemoryChargeStore::new()),
        oracle: oracle.clone(),
        idempotency: Arc::new(IdempotencyStore::new(
            Arc::clone(&cache),
            Duration::from_secs(300),
        )),
        read_cache: cache,
    };
    let base = spawn_receiver(receiver.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let bank = bank_state(&dir, 3);
    let bank_router = build_bank_router(bank.clone());

    let (id, external_id) = create_receiver_charge(&base, "77.00").await;
    bank_post(
        &bank_router,
        "/bank/pix/charges",
        format!(
            r#"{{"external_id":"{external_id}","value":77.00,"webhook_url":"{base}/webhooks/pix"}}"#
        ),
    )
    .await;

    // Oracle down: every webhook attempt gets a 503, the event dead-letters.
    oracle.fail_reads.store(true, Ordering::SeqCst);
    let (_, paid) = bank_post(
        &bank_router,
        "/bank/pix/pay",
        format!(r#"{{"external_id":"{external_id}"}}"#),
    )
    .await;
    assert_eq!(paid["delivered"], false);
    let event_id = paid["event_id"].as_str().unwrap().to_string();

    let record = bank.dlq.get_by_event_id(&event_id).unwrap().unwrap();
    assert_eq!(record.last_status_code, Some(503));
    assert!(!record.replayed);

    // Oracle recovers; the operator replays the dead-lettered event.
    oracle.fail_reads.store(false, Ordering::SeqCst);
    let (status, replay) = bank_post(
        &bank_router,
        "/bank/dlq/replay",
        format!(r#"{{"event_id":"{event_id}"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["message"], "replayed");

    assert!(bank.dlq.get_by_event_id(&event_id).unwrap().unwrap().replayed);
    let charge = read_receiver_charge(&base, id).await;
    assert_eq!(charge["status"], "PAID");
}
