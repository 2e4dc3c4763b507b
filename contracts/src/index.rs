//! # Kernel Index
//!
//! Deploys and wires a complete kernel (policy engine, vault, scheduler)
//! and keeps their handles and addresses in one place.
//!
//! Wiring consists of a single privileged step: the administrator
//! authorizes the scheduler's address on the vault. The resulting
//! [`KernelAddresses`] are recorded in the database so a restarted process
//! can find the same deployment again.

use pfta_protocol::config::{POLICY_DOMAIN, SCHEDULER_DOMAIN, VAULT_DOMAIN};
use pfta_protocol::storage::KernelAddresses;
use pfta_protocol::{Amount, AssetLedger, Clock, DbError, KernelDb, Principal};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::KernelResult;
use crate::payment_scheduler::PaymentScheduler;
use crate::policy_engine::PolicyEngine;
use crate::treasury_vault::TreasuryVault;

/// A wired kernel deployment.
#[derive(Debug, Clone)]
pub struct KernelIndex {
    addresses: KernelAddresses,
    policy: Arc<PolicyEngine>,
    vault: Arc<TreasuryVault>,
    scheduler: Arc<PaymentScheduler>,
}

impl KernelIndex {
    /// Deploys a fresh kernel administered by `admin`.
    ///
    /// Component addresses are derived from `admin` and a random salt, so
    /// repeated deployments never collide.
    pub fn deploy(
        db: KernelDb,
        admin: Principal,
        max_payment_amount: Amount,
        ledger: Arc<dyn AssetLedger>,
        clock: Arc<dyn Clock>,
    ) -> KernelResult<Self> {
        let salt = Uuid::new_v4();
        let addresses = KernelAddresses {
            policy: Principal::derive(POLICY_DOMAIN, &admin, salt.as_bytes()),
            vault: Principal::derive(VAULT_DOMAIN, &admin, salt.as_bytes()),
            scheduler: Principal::derive(SCHEDULER_DOMAIN, &admin, salt.as_bytes()),
            admin,
        };

        let policy = Arc::new(PolicyEngine::deploy(
            db.clone(),
            addresses.policy.clone(),
            addresses.admin.clone(),
            max_payment_amount,
        )?);
        let vault = Arc::new(TreasuryVault::deploy(
            db.clone(),
            addresses.vault.clone(),
            addresses.admin.clone(),
            ledger,
        )?);
        let scheduler = Arc::new(PaymentScheduler::new(
            db.clone(),
            addresses.scheduler.clone(),
            policy.clone(),
            vault.clone(),
            clock,
        )?);

        vault.authorize_scheduler(&addresses.admin, &addresses.scheduler, true)?;
        db.put_kernel_addresses(&addresses)?;

        tracing::info!(
            admin = %addresses.admin,
            policy = %addresses.policy,
            vault = %addresses.vault,
            scheduler = %addresses.scheduler,
            "kernel deployed"
        );
        Ok(Self {
            addresses,
            policy,
            vault,
            scheduler,
        })
    }

    /// Reopens the kernel recorded in `db`, or returns `None` if nothing
    /// has been deployed there yet.
    pub fn open(
        db: KernelDb,
        ledger: Arc<dyn AssetLedger>,
        clock: Arc<dyn Clock>,
    ) -> KernelResult<Option<Self>> {
        let Some(addresses) = db.get_kernel_addresses()? else {
            return Ok(None);
        };

        let policy = PolicyEngine::restore(db.clone(), addresses.policy.clone())?
            .ok_or_else(|| DbError::NotFound(format!("policy engine {}", addresses.policy)))?;
        let vault = TreasuryVault::restore(db.clone(), addresses.vault.clone(), ledger)?
            .ok_or_else(|| DbError::NotFound(format!("treasury vault {}", addresses.vault)))?;
        let policy = Arc::new(policy);
        let vault = Arc::new(vault);
        let scheduler = Arc::new(PaymentScheduler::new(
            db,
            addresses.scheduler.clone(),
            policy.clone(),
            vault.clone(),
            clock,
        )?);

        tracing::info!(
            policy = %addresses.policy,
            vault = %addresses.vault,
            scheduler = %addresses.scheduler,
            payments = scheduler.payment_count(),
            "kernel reopened"
        );
        Ok(Some(Self {
            addresses,
            policy,
            vault,
            scheduler,
        }))
    }

    /// Reopens the recorded kernel if there is one, deploys otherwise.
    ///
    /// An existing deployment keeps its stored administrator and limit;
    /// `admin` and `max_payment_amount` only apply to a fresh deploy.
    pub fn open_or_deploy(
        db: KernelDb,
        admin: Principal,
        max_payment_amount: Amount,
        ledger: Arc<dyn AssetLedger>,
        clock: Arc<dyn Clock>,
    ) -> KernelResult<Self> {
        if let Some(index) = Self::open(db.clone(), ledger.clone(), clock.clone())? {
            if index.addresses.admin != admin {
                tracing::warn!(
                    stored = %index.addresses.admin,
                    requested = %admin,
                    "kernel already deployed with a different admin; keeping the stored one"
                );
            }
            return Ok(index);
        }
        Self::deploy(db, admin, max_payment_amount, ledger, clock)
    }

    pub fn addresses(&self) -> &KernelAddresses {
        &self.addresses
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn vault(&self) -> &Arc<TreasuryVault> {
        &self.vault
    }

    pub fn scheduler(&self) -> &Arc<PaymentScheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfta_protocol::{SystemClock, TokenLedger};

    fn parts() -> (KernelDb, Arc<dyn AssetLedger>, Arc<dyn Clock>) {
        (
            KernelDb::open_temporary().unwrap(),
            Arc::new(TokenLedger::new()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn deploy_wires_scheduler_into_vault() {
        let (db, ledger, clock) = parts();
        let index = KernelIndex::deploy(db, Principal::new("admin"), 100, ledger, clock).unwrap();

        let addresses = index.addresses();
        assert!(index.vault().is_authorized(&addresses.scheduler));
        assert_eq!(index.vault().authorized_agents(), vec![addresses.scheduler.clone()]);
        assert_eq!(index.policy().max_payment_amount(), 100);
        assert_eq!(index.scheduler().address(), &addresses.scheduler);
        assert_ne!(addresses.policy, addresses.vault);
        assert!(addresses.vault.as_str().starts_with("0x"));
    }

    #[test]
    fn deployments_get_distinct_addresses() {
        let (db, ledger, clock) = parts();
        let a = KernelIndex::deploy(db.clone(), Principal::new("admin"), 1, ledger.clone(), clock.clone()).unwrap();
        let b = KernelIndex::deploy(db, Principal::new("admin"), 1, ledger, clock).unwrap();
        assert_ne!(a.addresses().vault, b.addresses().vault);
    }

    #[test]
    fn zero_limit_deploy_fails() {
        let (db, ledger, clock) = parts();
        assert!(KernelIndex::deploy(db.clone(), Principal::new("admin"), 0, ledger, clock).is_err());
        assert!(db.get_kernel_addresses().unwrap().is_none());
    }

    #[test]
    fn open_or_deploy_reuses_existing_kernel() {
        let (db, ledger, clock) = parts();
        assert!(KernelIndex::open(db.clone(), ledger.clone(), clock.clone())
            .unwrap()
            .is_none());

        let first =
            KernelIndex::open_or_deploy(db.clone(), Principal::new("admin"), 100, ledger.clone(), clock.clone())
                .unwrap();
        let second =
            KernelIndex::open_or_deploy(db, Principal::new("someone"), 999, ledger, clock).unwrap();

        assert_eq!(first.addresses(), second.addresses());
        assert_eq!(second.policy().max_payment_amount(), 100);
        assert!(second.vault().is_authorized(&second.addresses().scheduler));
    }
}
