//! # PFTA Treasury Kernel
//!
//! Custody and disbursement for pooled organizational funds. Three
//! components, each correct alone and none able to bypass another:
//!
//! - **Policy Engine**: the per-payment limit, re-checked at the moment of
//!   execution.
//! - **Treasury Vault**: custodian of record; tracks balances, accepts
//!   deposits from anyone, releases only to authorized agents.
//! - **Payment Scheduler**: records payment intents and executes them once,
//!   at or after their time gate, as the vault's authorized agent.
//!
//! [`KernelIndex`] deploys and wires the three together.
//!
//! ## Design Principles
//!
//! 1. All balance arithmetic is checked. A release larger than the tracked
//!    balance fails; nothing wraps or underflows.
//! 2. Lifecycle states are enum variants, not boolean flags.
//! 3. Every public operation is one critical section: a component lock is
//!    held for the whole call and every failure leaves no partial effect,
//!    in memory or on disk.
//! 4. The caller is always an explicit argument.

pub mod access;
pub mod error;
pub mod index;
pub mod payment_scheduler;
pub mod policy_engine;
pub mod treasury_vault;

pub use access::AccessControl;
pub use error::{ErrorKind, KernelError, KernelResult, PolicyViolation};
pub use index::KernelIndex;
pub use payment_scheduler::PaymentScheduler;
pub use policy_engine::PolicyEngine;
pub use treasury_vault::TreasuryVault;
