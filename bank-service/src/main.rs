//! bank-service — Issuer-side bank simulation.
//!
//! Startup sequence:
//!   1. Initialise tracing from `RUST_LOG`
//!   2. Load configuration from the environment (aborts without a
//!      webhook secret)
//!   3. Wire the ledger, dispatcher and DLQ, build the router
//!   4. Serve HTTP

use anyhow::Context;
use tracing::info;

use bank_service::api::{build_router, AppState};
use bank_service::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    let addr = format!("{}:{}", config.host, config.port);

    let state = AppState::new(config);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "bank-service listening");

    axum::serve(listener, router).await.context("serving HTTP")?;
    Ok(())
}
