//! # Token Ledger
//!
//! A multi-asset fungible token ledger with balances and spender allowances,
//! in the shape every token standard converges on: `mint`, `approve`,
//! `transfer`, and `transfer_from` (exposed here as [`AssetLedger::pull`]).
//!
//! When opened over a [`KernelDb`] every mutation is written through before
//! it becomes visible in memory, so external holdings survive restarts
//! together with the vault's claims on them. The rows one mutation touches
//! are written in a single transaction, so a failed write leaves nothing
//! to undo.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::{AssetLedger, LedgerError};
use crate::asset::{Amount, AssetId};
use crate::identity::Principal;
use crate::storage::KernelDb;

type HolderKey = (AssetId, Principal);
type AllowanceKey = (AssetId, Principal, Principal);

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<HolderKey, Amount>,
    allowances: HashMap<AllowanceKey, Amount>,
}

impl LedgerState {
    fn balance(&self, asset: &AssetId, holder: &Principal) -> Amount {
        self.balances
            .get(&(asset.clone(), holder.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn allowance(&self, asset: &AssetId, owner: &Principal, spender: &Principal) -> Amount {
        self.allowances
            .get(&(asset.clone(), owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Computes the post-transfer balances of `from` and `to` without
    /// applying them.
    fn plan_transfer(
        &self,
        asset: &AssetId,
        from: &Principal,
        to: &Principal,
        amount: Amount,
    ) -> Result<Vec<(HolderKey, Amount)>, LedgerError> {
        let from_balance = self.balance(asset, from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                asset: asset.clone(),
                holder: from.clone(),
                available: from_balance,
                requested: amount,
            });
        }
        if from == to {
            return Ok(Vec::new());
        }
        let to_balance = self
            .balance(asset, to)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                asset: asset.clone(),
                holder: to.clone(),
            })?;
        Ok(vec![
            ((asset.clone(), from.clone()), from_balance - amount),
            ((asset.clone(), to.clone()), to_balance),
        ])
    }
}

/// In-process token ledger, optionally persisted.
#[derive(Debug, Default)]
pub struct TokenLedger {
    state: Mutex<LedgerState>,
    db: Option<KernelDb>,
}

impl TokenLedger {
    /// Creates an empty, memory-only ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a ledger backed by `db`, loading every persisted balance and
    /// allowance.
    pub fn open(db: KernelDb) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();
        for (asset, holder, amount) in db.ledger_balances()? {
            state.balances.insert((asset, holder), amount);
        }
        for (asset, owner, spender, amount) in db.allowances()? {
            state.allowances.insert((asset, owner, spender), amount);
        }
        tracing::debug!(
            holders = state.balances.len(),
            allowances = state.allowances.len(),
            "token ledger loaded"
        );
        Ok(Self {
            state: Mutex::new(state),
            db: Some(db),
        })
    }

    /// Creates `amount` new units of `asset` in `to`'s account.
    ///
    /// Issuance control is the caller's concern; the node only exposes this
    /// to the kernel administrator.
    pub fn mint(&self, asset: &AssetId, to: &Principal, amount: Amount) -> Result<Amount, LedgerError> {
        let mut state = self.state.lock();
        let new_balance = state
            .balance(asset, to)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                asset: asset.clone(),
                holder: to.clone(),
            })?;
        let writes = vec![((asset.clone(), to.clone()), new_balance)];
        self.persist(&writes, None)?;
        apply(&mut state, writes);
        tracing::info!(asset = %asset, to = %to, amount, "minted");
        Ok(new_balance)
    }

    /// Sets `spender`'s allowance over `owner`'s `asset` to exactly `amount`
    /// (overwrite, not increment).
    pub fn approve(
        &self,
        asset: &AssetId,
        owner: &Principal,
        spender: &Principal,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if let Some(db) = &self.db {
            db.put_allowance(asset, owner, spender, amount)?;
        }
        state
            .allowances
            .insert((asset.clone(), owner.clone(), spender.clone()), amount);
        tracing::debug!(asset = %asset, owner = %owner, spender = %spender, amount, "allowance set");
        Ok(())
    }

    /// Remaining allowance `owner` granted to `spender`.
    pub fn allowance(&self, asset: &AssetId, owner: &Principal, spender: &Principal) -> Amount {
        self.state.lock().allowance(asset, owner, spender)
    }

    /// Moves `amount` from `from` to `to`. The caller is trusted to be
    /// `from`; authentication happens above the ledger.
    pub fn transfer(
        &self,
        asset: &AssetId,
        from: &Principal,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let writes = state.plan_transfer(asset, from, to, amount)?;
        self.persist(&writes, None)?;
        apply(&mut state, writes);
        Ok(())
    }

    /// Writes planned balances (and a new allowance value) through to
    /// storage in one transaction. No-op for a memory-only ledger.
    fn persist(
        &self,
        writes: &[(HolderKey, Amount)],
        allowance: Option<(&AssetId, &Principal, &Principal, Amount)>,
    ) -> Result<(), LedgerError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        db.put_ledger_entries(
            writes
                .iter()
                .map(|((asset, holder), amount)| (asset, holder, *amount)),
            allowance,
        )?;
        Ok(())
    }
}

fn apply(state: &mut LedgerState, writes: Vec<(HolderKey, Amount)>) {
    for (key, amount) in writes {
        state.balances.insert(key, amount);
    }
}

impl AssetLedger for TokenLedger {
    fn pull(
        &self,
        owner: &Principal,
        custodian: &Principal,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();

        let allowed = state.allowance(asset, owner, custodian);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                asset: asset.clone(),
                owner: owner.clone(),
                spender: custodian.clone(),
                allowed,
                requested: amount,
            });
        }
        let writes = state.plan_transfer(asset, owner, custodian, amount)?;
        let remaining = allowed - amount;
        self.persist(&writes, Some((asset, owner, custodian, remaining)))?;

        state
            .allowances
            .insert((asset.clone(), owner.clone(), custodian.clone()), remaining);
        apply(&mut state, writes);
        Ok(())
    }

    fn push(
        &self,
        custodian: &Principal,
        recipient: &Principal,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.transfer(asset, custodian, recipient, amount)
    }

    fn balance_of(&self, asset: &AssetId, holder: &Principal) -> Amount {
        self.state.lock().balance(asset, holder)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DbError;

    fn musd() -> AssetId {
        AssetId::new("mUSD")
    }

    fn p(s: &str) -> Principal {
        Principal::new(s)
    }

    #[test]
    fn mint_credits_holder() {
        let ledger = TokenLedger::new();
        assert_eq!(ledger.mint(&musd(), &p("alice"), 1_000).unwrap(), 1_000);
        assert_eq!(ledger.balance_of(&musd(), &p("alice")), 1_000);
        assert_eq!(ledger.balance_of(&musd(), &p("bob")), 0);
    }

    #[test]
    fn mint_overflow_rejected() {
        let ledger = TokenLedger::new();
        ledger.mint(&musd(), &p("alice"), u64::MAX).unwrap();
        let err = ledger.mint(&musd(), &p("alice"), 1).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
    }

    #[test]
    fn pull_requires_allowance() {
        let ledger = TokenLedger::new();
        ledger.mint(&musd(), &p("alice"), 1_000).unwrap();

        let err = ledger
            .pull(&p("alice"), &p("vault"), &musd(), 100)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientAllowance {
                allowed: 0,
                requested: 100,
                ..
            }
        ));
        assert_eq!(ledger.balance_of(&musd(), &p("alice")), 1_000);
    }

    #[test]
    fn pull_consumes_allowance_and_moves_funds() {
        let ledger = TokenLedger::new();
        ledger.mint(&musd(), &p("alice"), 1_000).unwrap();
        ledger.approve(&musd(), &p("alice"), &p("vault"), 300).unwrap();

        ledger.pull(&p("alice"), &p("vault"), &musd(), 200).unwrap();

        assert_eq!(ledger.balance_of(&musd(), &p("alice")), 800);
        assert_eq!(ledger.balance_of(&musd(), &p("vault")), 200);
        assert_eq!(ledger.allowance(&musd(), &p("alice"), &p("vault")), 100);
    }

    #[test]
    fn pull_with_allowance_but_no_funds_moves_nothing() {
        let ledger = TokenLedger::new();
        ledger.mint(&musd(), &p("alice"), 50).unwrap();
        ledger.approve(&musd(), &p("alice"), &p("vault"), 500).unwrap();

        let err = ledger
            .pull(&p("alice"), &p("vault"), &musd(), 100)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.allowance(&musd(), &p("alice"), &p("vault")), 500);
        assert_eq!(ledger.balance_of(&musd(), &p("vault")), 0);
    }

    #[test]
    fn push_moves_custodian_funds() {
        let ledger = TokenLedger::new();
        ledger.mint(&musd(), &p("vault"), 200).unwrap();

        ledger.push(&p("vault"), &p("bob"), &musd(), 25).unwrap();
        assert_eq!(ledger.balance_of(&musd(), &p("vault")), 175);
        assert_eq!(ledger.balance_of(&musd(), &p("bob")), 25);

        assert!(ledger.push(&p("vault"), &p("bob"), &musd(), 176).is_err());
    }

    #[test]
    fn approve_overwrites() {
        let ledger = TokenLedger::new();
        ledger.approve(&musd(), &p("a"), &p("s"), 10).unwrap();
        ledger.approve(&musd(), &p("a"), &p("s"), 3).unwrap();
        assert_eq!(ledger.allowance(&musd(), &p("a"), &p("s")), 3);
    }

    #[test]
    fn assets_are_isolated() {
        let ledger = TokenLedger::new();
        ledger.mint(&AssetId::new("A"), &p("alice"), 10).unwrap();
        assert_eq!(ledger.balance_of(&AssetId::new("B"), &p("alice")), 0);
        assert!(ledger
            .transfer(&AssetId::new("B"), &p("alice"), &p("bob"), 1)
            .is_err());
    }

    #[test]
    fn persisted_ledger_reloads() {
        let db = KernelDb::open_temporary().unwrap();
        {
            let ledger = TokenLedger::open(db.clone()).unwrap();
            ledger.mint(&musd(), &p("alice"), 1_000).unwrap();
            ledger.approve(&musd(), &p("alice"), &p("vault"), 400).unwrap();
            ledger.pull(&p("alice"), &p("vault"), &musd(), 150).unwrap();
        }

        let reloaded = TokenLedger::open(db).unwrap();
        assert_eq!(reloaded.balance_of(&musd(), &p("alice")), 850);
        assert_eq!(reloaded.balance_of(&musd(), &p("vault")), 150);
        assert_eq!(reloaded.allowance(&musd(), &p("alice"), &p("vault")), 250);
    }

    #[test]
    fn unstorable_spender_is_refused_and_ledger_still_reopens() {
        let db = KernelDb::open_temporary().unwrap();
        let ledger = TokenLedger::open(db.clone()).unwrap();
        ledger.mint(&musd(), &p("alice"), 100).unwrap();

        let err = ledger
            .approve(&musd(), &p("alice"), &p("evil\u{0}x"), 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(DbError::InvalidKey(_))));
        assert_eq!(ledger.allowance(&musd(), &p("alice"), &p("evil\u{0}x")), 0);

        let reloaded = TokenLedger::open(db).unwrap();
        assert_eq!(reloaded.balance_of(&musd(), &p("alice")), 100);
    }

    #[test]
    fn refused_pull_leaves_balances_and_allowance_on_disk() {
        let db = KernelDb::open_temporary().unwrap();
        let ledger = TokenLedger::open(db.clone()).unwrap();
        ledger.mint(&musd(), &p("alice"), 500).unwrap();
        ledger.approve(&musd(), &p("alice"), &p("vault"), 500).unwrap();
        ledger.approve(&musd(), &p("alice"), &p("vault"), 200).unwrap();
        assert!(ledger.pull(&p("alice"), &p("vault"), &musd(), 300).is_err());

        let reloaded = TokenLedger::open(db).unwrap();
        assert_eq!(reloaded.balance_of(&musd(), &p("alice")), 500);
        assert_eq!(reloaded.balance_of(&musd(), &p("vault")), 0);
        assert_eq!(reloaded.allowance(&musd(), &p("alice"), &p("vault")), 200);
    }
}
