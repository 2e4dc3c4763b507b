//! # Kernel Errors
//!
//! One error type for every kernel operation. Each variant belongs to one
//! of six kinds ([`ErrorKind`]); callers that only care about the category
//! (the HTTP layer mapping to status codes, metrics labels) match on
//! [`KernelError::kind`] instead of on individual variants.
//!
//! Every error aborts the whole operation with no partial effect. When an
//! operation fails after its first write and the compensating write fails
//! too, the error is [`KernelError::RollbackFailed`]: memory still holds
//! the pre-operation state, and the owning component rewrites the stale
//! row before its next mutation.

use chrono::{DateTime, Utc};
use pfta_protocol::{Amount, AssetId, DbError, LedgerError, PaymentId, Principal};
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why the policy engine rejected a payment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Payments must move a strictly positive amount.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The amount exceeds the per-payment limit currently in force.
    #[error("amount {amount} exceeds the per-payment limit of {limit}")]
    ExceedsLimit {
        /// Requested amount.
        amount: Amount,
        /// Limit at the time of the check.
        limit: Amount,
    },
}

/// Errors returned by the policy engine, the vault and the scheduler.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The caller is not the administrator, or not an authorized agent.
    #[error("{caller} is not authorized to {action}")]
    Unauthorized {
        /// Who attempted the call.
        caller: Principal,
        /// The privileged action that was refused.
        action: &'static str,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(#[from] PolicyViolation),

    /// A release asked for more than the vault tracks for the asset.
    #[error("insufficient funds: requested {requested} {asset}, vault holds {available}")]
    InsufficientFunds {
        asset: AssetId,
        requested: Amount,
        available: Amount,
    },

    /// The underlying ledger refused to move funds.
    #[error("asset transfer failed: {0}")]
    Transfer(#[from] LedgerError),

    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),

    /// The one-shot guard: a payment executes at most once.
    #[error("payment {0} was already executed")]
    AlreadyExecuted(PaymentId),

    /// The time gate has not opened yet.
    #[error("payment {id} is not executable before {execute_after} (now {now})")]
    NotYetExecutable {
        id: PaymentId,
        execute_after: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Crediting the tracked balance would overflow.
    #[error("tracked balance of {asset} would overflow")]
    BalanceOverflow { asset: AssetId },

    /// A zero policy limit would block every payment forever.
    #[error("the per-payment limit cannot be zero")]
    ZeroLimit,

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// An operation failed and the write undoing its persisted half failed
    /// as well. Storage is stale until the component repairs it.
    #[error("{cause}; restoring stored state failed: {restore}")]
    RollbackFailed {
        cause: Box<KernelError>,
        restore: DbError,
    },
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Category of a [`KernelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    PolicyViolation,
    InsufficientFunds,
    InvalidState,
    Configuration,
    Storage,
}

impl ErrorKind {
    /// Stable lowercase label, used in API bodies and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KernelError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::Unauthorized { .. } => ErrorKind::Authorization,
            KernelError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            KernelError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            // A ledger that fails on its own storage is an infrastructure
            // problem, not a funds problem.
            KernelError::Transfer(LedgerError::Storage(_)) => ErrorKind::Storage,
            KernelError::Transfer(_) => ErrorKind::InsufficientFunds,
            KernelError::PaymentNotFound(_)
            | KernelError::AlreadyExecuted(_)
            | KernelError::NotYetExecutable { .. }
            | KernelError::BalanceOverflow { .. } => ErrorKind::InvalidState,
            KernelError::ZeroLimit => ErrorKind::Configuration,
            KernelError::Storage(_) | KernelError::RollbackFailed { .. } => ErrorKind::Storage,
        }
    }
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
