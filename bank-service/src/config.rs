//! Configuration for the bank service.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Shared secret for signing outbound webhooks
    pub webhook_secret: String,

    /// Receiver URL used when a charge registration does not carry its own
    pub webhook_url: String,

    /// Durable dead-letter queue file (JSON Lines)
    pub dlq_path: PathBuf,

    /// Delivery retry tunables
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delivery attempts before an event is dead-lettered
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after every attempt
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Per-attempt transport timeout
    pub timeout: Duration,

    /// Jitter as a fraction of the delay, sampled uniformly in
    /// `[-ratio, +ratio]`
    pub jitter_ratio: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            jitter_ratio: 0.20,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Fail fast: unsigned webhooks are worthless to the receiver.
        let webhook_secret =
            std::env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET not configured")?;
        if webhook_secret.is_empty() {
            bail!("WEBHOOK_SECRET not configured");
        }

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            max_retries: std::env::var("MAX_RETRIES")
                .unwrap_or_else(|_| defaults.max_retries.to_string())
                .parse()
                .context("Invalid MAX_RETRIES")?,
            initial_delay: Duration::from_secs_f64(
                std::env::var("INITIAL_DELAY_SECONDS")
                    .unwrap_or_else(|_| "1".into())
                    .parse()
                    .context("Invalid INITIAL_DELAY_SECONDS")?,
            ),
            backoff_multiplier: std::env::var("BACKOFF_MULTIPLIER")
                .unwrap_or_else(|_| defaults.backoff_multiplier.to_string())
                .parse()
                .context("Invalid BACKOFF_MULTIPLIER")?,
            max_delay: Duration::from_secs_f64(
                std::env::var("MAX_DELAY_SECONDS")
                    .unwrap_or_else(|_| "30".into())
                    .parse()
                    .context("Invalid MAX_DELAY_SECONDS")?,
            ),
            timeout: Duration::from_secs_f64(
                std::env::var("TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "5".into())
                    .parse()
                    .context("Invalid TIMEOUT_SECONDS")?,
            ),
            jitter_ratio: defaults.jitter_ratio,
        };

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5001".into())
                .parse()
                .context("Invalid PORT")?,
            webhook_secret,
            webhook_url: std::env::var("WEBHOOK_URL")
                .unwrap_or_else(|_| "http://localhost:5000/webhooks/pix".into()),
            dlq_path: std::env::var("DLQ_PATH")
                .unwrap_or_else(|_| "dlq_data/failed_webhooks.jsonl".into())
                .into(),
            dispatch,
        })
    }
}
