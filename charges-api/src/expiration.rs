//! Expiration oracle — the authoritative "is this charge still payable?"
//! check.
//!
//! A charge is payable exactly while its `charge:ttl:<external_id>` key is
//! alive; absence of the key means the payment window closed. Expiration is
//! lazy — a charge only becomes observably EXPIRED when a read or a webhook
//! consults the oracle. The core never re-arms a window.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::ttl_cache::TtlCache;

#[derive(Debug, Error)]
#[error("expiration oracle unavailable: {0}")]
pub struct OracleError(pub String);

pub trait ExpirationOracle: Send + Sync {
    /// Open the payment window for `external_id`.
    fn arm(&self, external_id: &str, ttl: Duration) -> Result<(), OracleError>;

    fn is_armed(&self, external_id: &str) -> Result<bool, OracleError>;

    /// Close the window explicitly (used once payment lands).
    fn disarm(&self, external_id: &str) -> Result<(), OracleError>;
}

fn ttl_key(external_id: &str) -> String {
    format!("charge:ttl:{external_id}")
}

/// Oracle backed by the in-process TTL cache.
pub struct InMemoryOracle {
    cache: Arc<TtlCache>,
}

impl InMemoryOracle {
    pub fn new(cache: Arc<TtlCache>) -> Self {
        Self { cache }
    }
}

impl ExpirationOracle for InMemoryOracle {
    fn arm(&self, external_id: &str, ttl: Duration) -> Result<(), OracleError> {
        self.cache.set_ex(&ttl_key(external_id), "PENDING", ttl);
        Ok(())
    }

    fn is_armed(&self, external_id: &str) -> Result<bool, OracleError> {
        Ok(self.cache.exists(&ttl_key(external_id)))
    }

    fn disarm(&self, external_id: &str) -> Result<(), OracleError> {
        self.cache.delete(&ttl_key(external_id));
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────
