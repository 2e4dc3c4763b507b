//! # Asset Ledger
//!
//! The kernel does not own money; it owns *claims* on money held by an
//! external fungible-asset ledger. This module defines the narrow interface
//! the kernel needs from that ledger ([`AssetLedger`]) and ships one
//! implementation ([`TokenLedger`]) that the node and the tests run against.
//!
//! ## Contract
//!
//! ```text
//! pull(owner, custodian, asset, amount)      owner ──amount──▶ custodian
//!     requires: allowance(owner → custodian) >= amount, balance(owner) >= amount
//!     consumes: `amount` of the allowance
//! push(custodian, recipient, asset, amount)  custodian ──amount──▶ recipient
//!     requires: balance(custodian) >= amount
//! ```
//!
//! Both are atomic and exact: either the full amount moves or nothing does.

pub mod token;

pub use token::TokenLedger;

use thiserror::Error;

use crate::asset::{Amount, AssetId};
use crate::identity::Principal;
use crate::storage::DbError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by an asset ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The source account does not hold enough of the asset.
    #[error("insufficient balance: {holder} holds {available} {asset}, needs {requested}")]
    InsufficientBalance {
        asset: AssetId,
        holder: Principal,
        available: Amount,
        requested: Amount,
    },

    /// The owner has not pre-approved the spender for enough.
    #[error(
        "insufficient allowance: {owner} approved {spender} for {allowed} {asset}, needs {requested}"
    )]
    InsufficientAllowance {
        asset: AssetId,
        owner: Principal,
        spender: Principal,
        allowed: Amount,
        requested: Amount,
    },

    /// Crediting the destination would overflow `u64`.
    #[error("balance overflow for {holder} in {asset}")]
    Overflow { asset: AssetId, holder: Principal },

    /// The ledger's own persistence failed.
    #[error("ledger storage error: {0}")]
    Storage(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The transfer primitive the treasury vault delegates to.
pub trait AssetLedger: Send + Sync {
    /// Moves `amount` from `owner` into `custodian`'s holdings, spending
    /// an allowance `owner` granted to `custodian` beforehand.
    fn pull(
        &self,
        owner: &Principal,
        custodian: &Principal,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Moves `amount` out of `custodian`'s own holdings to `recipient`.
    fn push(
        &self,
        custodian: &Principal,
        recipient: &Principal,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Current holdings of `holder` in `asset`.
    fn balance_of(&self, asset: &AssetId, holder: &Principal) -> Amount;
}
