//! Charge model and store.
//!
//! The store serializes all writes to a given charge behind one lock, so
//! state transitions are linearizable per `external_id`. The trait is the
//! seam where a relational backend would plug in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state_machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChargeStatus {
    Pending,
    Paid,
    Expired,
}

impl ChargeStatus {
    /// Wire and storage representation. The enum is internal only.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "PENDING",
            ChargeStatus::Paid => "PAID",
            ChargeStatus::Expired => "EXPIRED",
        }
    }

    /// PAID and EXPIRED absorb every further event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChargeStatus::Paid | ChargeStatus::Expired)
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Charge {
    pub id: u64,
    pub external_id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub value: Decimal,
    pub status: ChargeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the caller; the store assigns the internal id.
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub external_id: String,
    pub value: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("charge store failure: {0}")]
pub struct StoreError(pub String);

/// Result of asking the store to run the state machine on a charge.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// Transition applied; the updated charge.
    Applied(Charge),
    /// The state machine refused the transition; the charge as stored.
    Rejected(Charge),
}

pub trait ChargeStore: Send + Sync {
    fn insert(&self, new: NewCharge) -> Result<Charge, StoreError>;

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Charge>, StoreError>;

    fn find_by_id(&self, id: u64) -> Result<Option<Charge>, StoreError>;

    /// Run the state machine against the stored charge, atomically with
    /// respect to every other write on the same charge. `Ok(None)` means no
    /// such charge exists.
    fn transition(
        &self,
        external_id: &str,
        target: ChargeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome>, StoreError>;
}

// ── In-memory implementation ────────────────────────────────────

#[derive(Default)]
struct Inner {
    next_id: u64,
    by_id: HashMap<u64, Charge>,
    id_by_external: HashMap<String, u64>,
}

#[derive(Default)]
pub struct InMemoryChargeStore {
    inner: Mutex<Inner>,
}

impl InMemoryChargeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChargeStore for InMemoryChargeStore {
    fn insert(&self, new: NewCharge) -> Result<Charge, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.id_by_external.contains_key(&new.external_id) {
            return Err(StoreError(format!("duplicate external_id: {}", new.external_id)));
        }

        inner.next_id += 1;
        let charge = Charge {
            id: inner.next_id,
            external_id: new.external_id.clone(),
            value: new.value,
            status: ChargeStatus::Pending,
            created_at: new.created_at,
            expires_at: new.expires_at,
            paid_at: None,
        };
        inner.id_by_external.insert(new.external_id, charge.id);
        inner.by_id.insert(charge.id, charge.clone());
        Ok(charge)
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Charge>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .id_by_external
            .get(external_id)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: u64) -> Result<Option<Charge>, StoreError> {
        Ok(self.inner.lock().unwrap().by_id.get(&id).cloned())
    }

    fn transition(
        &self,
        external_id: &str,
        target: ChargeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionOutcome>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&id) = inner.id_by_external.get(external_id) else {
            return Ok(None);
        };
        let Some(charge) = inner.by_id.get_mut(&id) else {
            return Ok(None);
        };

        let mut updated = charge.clone();
        match state_machine::transition(&mut updated, target, now) {
            Ok(()) => {
                *charge = updated.clone();
                Ok(Some(TransitionOutcome::Applied(updated)))
            }
            Err(_) => Ok(Some(TransitionOutcome::Rejected(charge.clone()))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
