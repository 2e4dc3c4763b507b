// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # PFTA Protocol: Shared Kernel Primitives
//!
//! The treasury kernel (see the `pfta-contracts` crate) is deliberately small:
//! a policy engine, a custodial vault and a payment scheduler. Everything
//! those three components need to agree on lives here, so that the kernel
//! crate is nothing but rules.
//!
//! ## Architecture
//!
//! - **identity**: Principals (who is calling), operator keys, signed requests and
//!   component address derivation.
//! - **asset**: Asset identifiers and the `Amount` unit.
//! - **payment**: The payment record data model and its lifecycle states.
//! - **clock**: Time source abstraction; the time gate reads through it.
//! - **ledger**: The external asset-transfer collaborator (pull/push/balance).
//! - **storage**: sled-backed persistence for every piece of kernel state.
//! - **config**: Constants and defaults.
//!
//! ## Design Philosophy
//!
//! 1. Amounts are `u64` smallest units. Arithmetic is checked, always.
//! 2. Every persisted struct derives `Serialize`/`Deserialize`.
//! 3. Component identities are data, not ambient context: a caller is
//!    always passed in explicitly.

pub mod asset;
pub mod clock;
pub mod config;
pub mod identity;
pub mod ledger;
pub mod payment;
pub mod storage;

pub use asset::{Amount, AssetId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{AuthError, IdentifierError, OperatorKey, Principal, RequestSignature};
pub use ledger::{AssetLedger, LedgerError, TokenLedger};
pub use payment::{PaymentId, PaymentRecord, PaymentStatus};
pub use storage::{DbError, KernelDb};
