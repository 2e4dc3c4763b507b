//! Persisted configuration records.

use serde::{Deserialize, Serialize};

use crate::asset::Amount;
use crate::identity::Principal;

/// Durable state of a policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// The only principal allowed to change the limit.
    pub admin: Principal,
    /// Maximum amount a single payment may move. Never zero.
    pub max_payment_amount: Amount,
}

/// Durable identity of a treasury vault. Balances and grants live in their
/// own trees; this record only pins the administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// The only principal allowed to change the authorization set.
    pub admin: Principal,
}

/// Addresses of a wired kernel deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelAddresses {
    /// Administrator of both the policy engine and the vault.
    pub admin: Principal,
    /// Policy engine address.
    pub policy: Principal,
    /// Treasury vault address (the ledger custodian).
    pub vault: Principal,
    /// Payment scheduler address (the vault's authorized agent).
    pub scheduler: Principal,
}
