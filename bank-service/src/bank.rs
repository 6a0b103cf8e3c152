//! In-memory ledger for the bank's side of a PIX charge.
//!
//! The bank only needs enough state to settle a charge and know where to
//! send the confirmation webhook; durable truth lives with the charges
//! API.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BankCharge {
    pub external_id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub value: Decimal,
    pub webhook_url: String,
    pub status: String,
}

#[derive(Default)]
pub struct BankLedger {
    charges: Mutex<HashMap<String, BankCharge>>,
}

impl BankLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a charge, overwriting any previous registration with the
    /// same `external_id`.
    pub fn register(&self, charge: BankCharge) {
        self.charges.lock().unwrap().insert(charge.external_id.clone(), charge);
    }

    pub fn get(&self, external_id: &str) -> Option<BankCharge> {
        self.charges.lock().unwrap().get(external_id).cloned()
    }

    pub fn mark_paid(&self, external_id: &str) {
        if let Some(charge) = self.charges.lock().unwrap().get_mut(external_id) {
            charge.status = "PAID".into();
        }
    }

    pub fn count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

// ── Tests ───────────────────────────────────────────────────────
