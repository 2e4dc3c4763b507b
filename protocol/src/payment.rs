//! # Payment Records
//!
//! A payment record is the scheduler's memory of an intent to pay:
//! which asset, to whom, how much, and not before when. Records are
//! append-only. After creation the only thing that ever changes is the
//! lifecycle status, and it changes exactly once:
//!
//! ```text
//! Scheduled ──execute──▶ Executed   (terminal)
//! ```
//!
//! There is no cancellation, no rescheduling and no partial execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::{Amount, AssetId};
use crate::identity::Principal;

/// Sequential payment identifier. The first record a scheduler creates is 0.
pub type PaymentId = u64;

/// Lifecycle state of a payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for its time gate, or ready but not yet triggered.
    Scheduled,
    /// Funds were released. Terminal.
    Executed {
        /// When the release happened (scheduler clock).
        executed_at: DateTime<Utc>,
        /// Who triggered the execution. Not necessarily a trusted party:
        /// anyone may trigger a mature payment.
        executed_by: Principal,
    },
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Scheduled => write!(f, "Scheduled"),
            PaymentStatus::Executed { .. } => write!(f, "Executed"),
        }
    }
}

/// A scheduled (or executed) payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Sequence number assigned at creation.
    pub id: PaymentId,
    /// Asset to pay out.
    pub asset: AssetId,
    /// Who receives the funds.
    pub recipient: Principal,
    /// Strictly positive amount, fixed at creation.
    pub amount: Amount,
    /// Earliest instant at which execution is allowed (inclusive).
    pub execute_after: DateTime<Utc>,
    /// Lifecycle state.
    pub status: PaymentStatus,
    /// Who recorded the intent.
    pub scheduled_by: Principal,
    /// When the intent was recorded.
    pub scheduled_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Returns `true` once the payment has been executed.
    pub fn is_executed(&self) -> bool {
        matches!(self.status, PaymentStatus::Executed { .. })
    }

    /// Returns `true` if the payment is still scheduled and its time gate
    /// has opened. The gate is inclusive: `now == execute_after` is ready.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.is_executed() && now >= self.execute_after
    }
}
