//! # Treasury Vault
//!
//! The custodian of record. The vault tracks, per asset, how much it holds
//! on the organization's behalf, accepts deposits from anyone, and releases
//! funds only to callers on its authorization set.
//!
//! ## Balance invariant
//!
//! For every asset the tracked balance equals everything pulled in by
//! `deposit` minus everything pushed out by `release`. Releases larger than
//! the tracked balance fail; nothing ever underflows.
//!
//! ## Ordering
//!
//! Both fund-moving operations persist the new tracked balance first and
//! only then ask the ledger to move funds. If the ledger refuses, the old
//! balance is written back before the error is returned. When that write
//! fails too, the asset is queued for repair: the in-memory balance is
//! still correct, and the next deposit or release rewrites the stored row
//! from it before doing anything else.

use parking_lot::Mutex;
use pfta_protocol::storage::VaultConfig;
use pfta_protocol::{Amount, AssetId, AssetLedger, KernelDb, Principal};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::access::AccessControl;
use crate::error::{KernelError, KernelResult, PolicyViolation};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct VaultState {
    access: AccessControl,
    balances: BTreeMap<AssetId, Amount>,
    /// Assets whose stored balance disagrees with `balances`.
    unsynced: BTreeSet<AssetId>,
}

impl VaultState {
    fn balance(&self, asset: &AssetId) -> Amount {
        self.balances.get(asset).copied().unwrap_or(0)
    }
}

/// Custodial vault over an external asset ledger.
pub struct TreasuryVault {
    address: Principal,
    db: KernelDb,
    ledger: Arc<dyn AssetLedger>,
    state: Mutex<VaultState>,
}

impl std::fmt::Debug for TreasuryVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreasuryVault")
            .field("address", &self.address)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl TreasuryVault {
    /// Creates and persists an empty vault administered by `admin`.
    pub fn deploy(
        db: KernelDb,
        address: Principal,
        admin: Principal,
        ledger: Arc<dyn AssetLedger>,
    ) -> KernelResult<Self> {
        db.put_vault_config(&address, &VaultConfig { admin: admin.clone() })?;
        tracing::info!(vault = %address, %admin, "treasury vault deployed");
        Ok(Self {
            address,
            db,
            ledger,
            state: Mutex::new(VaultState {
                access: AccessControl::new(admin),
                balances: BTreeMap::new(),
                unsynced: BTreeSet::new(),
            }),
        })
    }

    /// Loads a vault with its balances and grants, or `None` if nothing is
    /// stored at `address`.
    pub fn restore(
        db: KernelDb,
        address: Principal,
        ledger: Arc<dyn AssetLedger>,
    ) -> KernelResult<Option<Self>> {
        let Some(config) = db.get_vault_config(&address)? else {
            return Ok(None);
        };
        let balances: BTreeMap<AssetId, Amount> = db.vault_balances(&address)?.into_iter().collect();
        let access = AccessControl::with_grants(config.admin, db.grants(&address)?);
        tracing::debug!(
            vault = %address,
            assets = balances.len(),
            agents = access.authorized_agents().len(),
            "treasury vault restored"
        );
        Ok(Some(Self {
            address,
            db,
            ledger,
            state: Mutex::new(VaultState {
                access,
                balances,
                unsynced: BTreeSet::new(),
            }),
        }))
    }

    /// The vault's own identity; this is the custodian on the ledger.
    pub fn address(&self) -> &Principal {
        &self.address
    }

    pub fn admin(&self) -> Principal {
        self.state.lock().access.admin().clone()
    }

    // -- Funds --------------------------------------------------------------

    /// Pulls `amount` of `asset` from `caller` into custody and credits the
    /// tracked balance. Open to anyone. The caller must have approved the
    /// vault on the ledger beforehand.
    ///
    /// Returns the new tracked balance.
    pub fn deposit(&self, caller: &Principal, asset: &AssetId, amount: Amount) -> KernelResult<Amount> {
        if amount == 0 {
            return Err(PolicyViolation::ZeroAmount.into());
        }
        let mut state = self.state.lock();
        self.repair(&mut state)?;
        let previous = state.balance(asset);
        let updated = previous
            .checked_add(amount)
            .ok_or_else(|| KernelError::BalanceOverflow { asset: asset.clone() })?;

        self.db.put_vault_balance(&self.address, asset, updated)?;
        if let Err(e) = self.ledger.pull(caller, &self.address, asset, amount) {
            tracing::debug!(vault = %self.address, %caller, %asset, amount, error = %e, "deposit pull refused");
            return Err(self.restore_balance(&mut state, asset, previous, e.into()));
        }
        state.balances.insert(asset.clone(), updated);

        tracing::info!(vault = %self.address, from = %caller, %asset, amount, balance = updated, "deposit");
        Ok(updated)
    }

    /// Debits the tracked balance and pushes `amount` of `asset` to
    /// `recipient`. Only authorized agents may call this; it is the sole
    /// path by which custodied funds leave the vault.
    ///
    /// Returns the new tracked balance.
    pub fn release(
        &self,
        caller: &Principal,
        asset: &AssetId,
        recipient: &Principal,
        amount: Amount,
    ) -> KernelResult<Amount> {
        let mut state = self.state.lock();
        self.repair(&mut state)?;
        if !state.access.is_authorized(caller) {
            tracing::warn!(vault = %self.address, %caller, %asset, amount, "release by unauthorized agent");
            return Err(KernelError::Unauthorized {
                caller: caller.clone(),
                action: "release funds",
            });
        }
        let previous = state.balance(asset);
        let updated = previous
            .checked_sub(amount)
            .ok_or_else(|| KernelError::InsufficientFunds {
                asset: asset.clone(),
                requested: amount,
                available: previous,
            })?;

        self.db.put_vault_balance(&self.address, asset, updated)?;
        if let Err(e) = self.ledger.push(&self.address, recipient, asset, amount) {
            tracing::error!(vault = %self.address, %recipient, %asset, amount, error = %e, "release push failed");
            return Err(self.restore_balance(&mut state, asset, previous, e.into()));
        }
        state.balances.insert(asset.clone(), updated);

        tracing::info!(vault = %self.address, agent = %caller, to = %recipient, %asset, amount, balance = updated, "release");
        Ok(updated)
    }

    /// Writes `previous` back after a refused transfer and returns the error
    /// to report. If the write fails the asset is queued for [`repair`](Self::repair).
    fn restore_balance(
        &self,
        state: &mut VaultState,
        asset: &AssetId,
        previous: Amount,
        cause: KernelError,
    ) -> KernelError {
        match self.db.put_vault_balance(&self.address, asset, previous) {
            Ok(()) => cause,
            Err(restore) => {
                tracing::error!(vault = %self.address, %asset, error = %restore, "failed to restore tracked balance, queued for repair");
                state.unsynced.insert(asset.clone());
                KernelError::RollbackFailed {
                    cause: Box::new(cause),
                    restore,
                }
            }
        }
    }

    /// Rewrites every queued balance row from memory. Fails, leaving the
    /// rest queued, on the first write that fails.
    fn repair(&self, state: &mut VaultState) -> KernelResult<()> {
        while let Some(asset) = state.unsynced.first().cloned() {
            self.db
                .put_vault_balance(&self.address, &asset, state.balance(&asset))?;
            state.unsynced.remove(&asset);
            tracing::info!(vault = %self.address, %asset, "tracked balance row repaired");
        }
        Ok(())
    }

    /// Assets whose stored balance row is waiting to be rewritten.
    pub fn pending_repairs(&self) -> Vec<AssetId> {
        self.state.lock().unsynced.iter().cloned().collect()
    }

    /// Tracked balance of `asset`; zero for assets never deposited.
    pub fn get_balance(&self, asset: &AssetId) -> Amount {
        self.state.lock().balance(asset)
    }

    /// Every tracked asset with its balance, in asset order.
    pub fn balances(&self) -> Vec<(AssetId, Amount)> {
        self.state
            .lock()
            .balances
            .iter()
            .map(|(asset, amount)| (asset.clone(), *amount))
            .collect()
    }

    // -- Authorization ------------------------------------------------------

    /// Sets whether `agent` may call [`release`](Self::release).
    /// Administrator only; a refused call leaves the set unchanged.
    pub fn authorize_scheduler(&self, caller: &Principal, agent: &Principal, enabled: bool) -> KernelResult<()> {
        let mut state = self.state.lock();
        if let Err(e) = state.access.ensure_admin(caller, "change vault authorizations") {
            tracing::warn!(vault = %self.address, %caller, %agent, enabled, "rejected authorization change from non-admin");
            return Err(e);
        }
        self.db.put_grant(&self.address, agent, enabled)?;
        if enabled {
            state.access.grant(agent.clone());
        } else {
            state.access.revoke(agent.clone());
        }

        tracing::info!(vault = %self.address, %agent, enabled, "agent authorization set");
        Ok(())
    }

    /// Shorthand for enabling `agent`.
    pub fn grant_agent(&self, caller: &Principal, agent: &Principal) -> KernelResult<()> {
        self.authorize_scheduler(caller, agent, true)
    }

    pub fn revoke_agent(&self, caller: &Principal, agent: &Principal) -> KernelResult<()> {
        self.authorize_scheduler(caller, agent, false)
    }

    pub fn is_authorized(&self, agent: &Principal) -> bool {
        self.state.lock().access.is_authorized(agent)
    }

    pub fn authorized_agents(&self) -> Vec<Principal> {
        self.state.lock().access.authorized_agents()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pfta_protocol::TokenLedger;

    fn musd() -> AssetId {
        AssetId::new("mUSD")
    }

    fn setup() -> (Arc<TokenLedger>, TreasuryVault) {
        let db = KernelDb::open_temporary().unwrap();
        let ledger = Arc::new(TokenLedger::new());
        let vault = TreasuryVault::deploy(
            db,
            Principal::new("vault"),
            Principal::new("admin"),
            ledger.clone(),
        )
        .unwrap();
        (ledger, vault)
    }

    fn fund(ledger: &TokenLedger, vault: &TreasuryVault, who: &str, amount: Amount) {
        let who = Principal::new(who);
        ledger.mint(&musd(), &who, amount).unwrap();
        ledger.approve(&musd(), &who, vault.address(), amount).unwrap();
        vault.deposit(&who, &musd(), amount).unwrap();
    }

    #[test]
    fn deposit_credits_balance() {
        let (ledger, vault) = setup();
        fund(&ledger, &vault, "alice", 200);
        assert_eq!(vault.get_balance(&musd()), 200);
        assert_eq!(ledger.balance_of(&musd(), vault.address()), 200);
        assert_eq!(vault.get_balance(&AssetId::new("other")), 0);
    }

    #[test]
    fn deposit_without_approval_changes_nothing() {
        let (ledger, vault) = setup();
        let alice = Principal::new("alice");
        ledger.mint(&musd(), &alice, 100).unwrap();

        let err = vault.deposit(&alice, &musd(), 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(vault.get_balance(&musd()), 0);
        assert_eq!(ledger.balance_of(&musd(), &alice), 100);
    }

    #[test]
    fn zero_deposit_rejected() {
        let (_ledger, vault) = setup();
        let err = vault.deposit(&Principal::new("a"), &musd(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    }

    #[test]
    fn authorized_release_moves_funds() {
        let (ledger, vault) = setup();
        fund(&ledger, &vault, "alice", 200);
        let agent = Principal::new("agent");
        let bob = Principal::new("bob");
        vault.grant_agent(&Principal::new("admin"), &agent).unwrap();

        assert_eq!(vault.release(&agent, &musd(), &bob, 25).unwrap(), 175);
        assert_eq!(vault.get_balance(&musd()), 175);
        assert_eq!(ledger.balance_of(&musd(), &bob), 25);
    }

    #[test]
    fn unauthorized_release_rejected() {
        let (ledger, vault) = setup();
        fund(&ledger, &vault, "alice", 200);

        let err = vault
            .release(&Principal::new("mallory"), &musd(), &Principal::new("mallory"), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(vault.get_balance(&musd()), 200);
    }

    #[test]
    fn overdraw_rejected() {
        let (ledger, vault) = setup();
        fund(&ledger, &vault, "alice", 50);
        let agent = Principal::new("agent");
        vault.grant_agent(&Principal::new("admin"), &agent).unwrap();

        let err = vault
            .release(&agent, &musd(), &Principal::new("bob"), 51)
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::InsufficientFunds {
                requested: 51,
                available: 50,
                ..
            }
        ));
        assert_eq!(vault.get_balance(&musd()), 50);
    }

    #[test]
    fn revoked_agent_cannot_release() {
        let (ledger, vault) = setup();
        fund(&ledger, &vault, "alice", 10);
        let admin = Principal::new("admin");
        let agent = Principal::new("agent");

        vault.grant_agent(&admin, &agent).unwrap();
        vault.revoke_agent(&admin, &agent).unwrap();
        assert!(!vault.is_authorized(&agent));
        assert!(vault
            .release(&agent, &musd(), &Principal::new("bob"), 1)
            .is_err());
    }

    #[test]
    fn non_admin_cannot_authorize() {
        let (_ledger, vault) = setup();
        let err = vault
            .authorize_scheduler(&Principal::new("mallory"), &Principal::new("mallory"), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(vault.authorized_agents().is_empty());
    }

    #[test]
    fn state_survives_restore() {
        let db = KernelDb::open_temporary().unwrap();
        let ledger = Arc::new(TokenLedger::new());
        let address = Principal::new("vault");
        let vault =
            TreasuryVault::deploy(db.clone(), address.clone(), Principal::new("admin"), ledger.clone())
                .unwrap();
        fund(&ledger, &vault, "alice", 300);
        vault
            .grant_agent(&Principal::new("admin"), &Principal::new("agent"))
            .unwrap();
        drop(vault);

        let restored = TreasuryVault::restore(db, address, ledger).unwrap().unwrap();
        assert_eq!(restored.get_balance(&musd()), 300);
        assert_eq!(restored.balances(), vec![(musd(), 300)]);
        assert!(restored.is_authorized(&Principal::new("agent")));
        assert_eq!(restored.admin(), Principal::new("admin"));
    }
}
