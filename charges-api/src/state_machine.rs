//! Charge lifecycle rules.
//!
//! PENDING may move to PAID or EXPIRED; PAID and EXPIRED absorb every
//! further event. `paid_at` is stamped in the same mutation that flips the
//! status to PAID, so the two can never disagree.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::charge::{Charge, ChargeStatus};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid charge transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ChargeStatus,
    pub to: ChargeStatus,
}

pub fn allowed(from: ChargeStatus, to: ChargeStatus) -> bool {
    matches!(
        (from, to),
        (ChargeStatus::Pending, ChargeStatus::Paid)
            | (ChargeStatus::Pending, ChargeStatus::Expired)
    )
}

/// Apply `target` to the charge, stamping `paid_at` on the PAID edge.
pub fn transition(
    charge: &mut Charge,
    target: ChargeStatus,
    now: DateTime<Utc>,
) -> Result<(), InvalidTransition> {
    if !allowed(charge.status, target) {
        return Err(InvalidTransition { from: charge.status, to: target });
    }

    charge.status = target;
    if target == ChargeStatus::Paid && charge.paid_at.is_none() {
        charge.paid_at = Some(now);
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────
