//! Configuration for the charges API.

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Shared secret for webhook signature verification
    pub webhook_secret: String,

    /// Bearer key guarding the external payment confirmation surface.
    /// Unset disables that surface entirely.
    pub external_api_key: Option<String>,

    /// Payment window applied to new charges, in seconds
    pub charge_ttl_seconds: u64,

    /// Idempotency record lifetime, in seconds
    pub idempotency_ttl_seconds: u64,

    /// Charge read cache lifetime, in seconds
    pub read_cache_ttl_seconds: u64,
}

/// Payment window for a fresh charge (30 minutes).
pub const DEFAULT_CHARGE_TTL_SECONDS: u64 = 1800;

/// How long a consumed idempotency key keeps replaying its response.
pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: u64 = 300;

/// How long a charge read is served from cache.
pub const DEFAULT_READ_CACHE_TTL_SECONDS: u64 = 60;

impl Config {
    pub fn from_env() -> Result<Self> {
        // Fail fast: a service that cannot verify webhook signatures must
        // not come up at all.
        let webhook_secret =
            std::env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET not configured")?;
        if webhook_secret.is_empty() {
            bail!("WEBHOOK_SECRET not configured");
        }

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".into())
                .parse()
                .context("Invalid PORT")?,
            webhook_secret,
            external_api_key: std::env::var("EXTERNAL_API_KEY").ok(),
            charge_ttl_seconds: DEFAULT_CHARGE_TTL_SECONDS,
            idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
            read_cache_ttl_seconds: DEFAULT_READ_CACHE_TTL_SECONDS,
        })
    }
}
