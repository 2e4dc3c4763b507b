//! # Policy Engine
//!
//! Validates proposed payments against the organization-wide per-payment
//! limit. The limit is the engine's only mutable state; it can be changed
//! by the policy administrator and never to zero.
//!
//! Validation is re-run at execution time by the scheduler, so lowering the
//! limit affects payments that were scheduled under the old one.

use parking_lot::RwLock;
use pfta_protocol::storage::PolicyConfig;
use pfta_protocol::{Amount, AssetId, KernelDb, Principal};

use crate::error::{KernelError, KernelResult, PolicyViolation};

/// The per-payment limit validator.
#[derive(Debug)]
pub struct PolicyEngine {
    address: Principal,
    db: KernelDb,
    config: RwLock<PolicyConfig>,
}

impl PolicyEngine {
    /// Creates and persists a new engine at `address`.
    ///
    /// Fails with `ZeroLimit` if `max_payment_amount` is zero.
    pub fn deploy(
        db: KernelDb,
        address: Principal,
        admin: Principal,
        max_payment_amount: Amount,
    ) -> KernelResult<Self> {
        if max_payment_amount == 0 {
            return Err(KernelError::ZeroLimit);
        }
        let config = PolicyConfig {
            admin,
            max_payment_amount,
        };
        db.put_policy(&address, &config)?;
        tracing::info!(
            policy = %address,
            admin = %config.admin,
            max_payment_amount,
            "policy engine deployed"
        );
        Ok(Self {
            address,
            db,
            config: RwLock::new(config),
        })
    }

    /// Loads a previously deployed engine, or `None` if nothing is stored
    /// at `address`.
    pub fn restore(db: KernelDb, address: Principal) -> KernelResult<Option<Self>> {
        let Some(config) = db.get_policy(&address)? else {
            return Ok(None);
        };
        tracing::debug!(policy = %address, limit = config.max_payment_amount, "policy engine restored");
        Ok(Some(Self {
            address,
            db,
            config: RwLock::new(config),
        }))
    }

    pub fn address(&self) -> &Principal {
        &self.address
    }

    pub fn admin(&self) -> Principal {
        self.config.read().admin.clone()
    }

    /// The limit currently in force.
    pub fn max_payment_amount(&self) -> Amount {
        self.config.read().max_payment_amount
    }

    /// Checks a proposed payment. Returns `Ok(true)` when acceptable and a
    /// `PolicyViolation` otherwise. Asset and recipient are accepted as
    /// opaque values.
    pub fn validate_payment(
        &self,
        asset: &AssetId,
        amount: Amount,
        recipient: &Principal,
    ) -> KernelResult<bool> {
        let config = self.config.read();
        check(&config, asset, amount, recipient)?;
        Ok(true)
    }

    /// Validates a payment and, if it passes, runs `then` while the policy
    /// is held for reading. The limit cannot change between the check and
    /// whatever `then` does with it.
    pub fn enforce<T>(
        &self,
        asset: &AssetId,
        amount: Amount,
        recipient: &Principal,
        then: impl FnOnce() -> KernelResult<T>,
    ) -> KernelResult<T> {
        let config = self.config.read();
        check(&config, asset, amount, recipient)?;
        then()
    }

    /// Replaces the per-payment limit. Administrator only; zero is rejected.
    /// Returns the previous limit.
    pub fn set_max_payment_amount(&self, caller: &Principal, new_limit: Amount) -> KernelResult<Amount> {
        let mut config = self.config.write();
        if caller != &config.admin {
            tracing::warn!(policy = %self.address, %caller, "rejected limit change from non-admin");
            return Err(KernelError::Unauthorized {
                caller: caller.clone(),
                action: "set the payment limit",
            });
        }
        if new_limit == 0 {
            return Err(KernelError::ZeroLimit);
        }

        let updated = PolicyConfig {
            admin: config.admin.clone(),
            max_payment_amount: new_limit,
        };
        self.db.put_policy(&self.address, &updated)?;
        let previous = std::mem::replace(&mut *config, updated).max_payment_amount;

        tracing::info!(policy = %self.address, previous, new_limit, "payment limit changed");
        Ok(previous)
    }
}

fn check(
    config: &PolicyConfig,
    asset: &AssetId,
    amount: Amount,
    recipient: &Principal,
) -> Result<(), PolicyViolation> {
    if amount == 0 {
        return Err(PolicyViolation::ZeroAmount);
    }
    if amount > config.max_payment_amount {
        tracing::debug!(%asset, %recipient, amount, limit = config.max_payment_amount, "payment over limit");
        return Err(PolicyViolation::ExceedsLimit {
            amount,
            limit: config.max_payment_amount,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn engine(limit: Amount) -> PolicyEngine {
        let db = KernelDb::open_temporary().unwrap();
        PolicyEngine::deploy(db, Principal::new("policy"), Principal::new("admin"), limit).unwrap()
    }

    fn asset() -> AssetId {
        AssetId::new("mUSD")
    }

    #[test]
    fn zero_limit_deploy_rejected() {
        let db = KernelDb::open_temporary().unwrap();
        let err = PolicyEngine::deploy(db, Principal::new("p"), Principal::new("a"), 0).unwrap_err();
        assert!(matches!(err, KernelError::ZeroLimit));
    }

    #[test]
    fn limit_is_inclusive() {
        let policy = engine(100);
        let bob = Principal::new("bob");
        assert!(policy.validate_payment(&asset(), 100, &bob).unwrap());
        assert!(policy.validate_payment(&asset(), 1, &bob).unwrap());

        let err = policy.validate_payment(&asset(), 101, &bob).unwrap_err();
        assert!(matches!(
            err,
            KernelError::PolicyViolation(PolicyViolation::ExceedsLimit {
                amount: 101,
                limit: 100
            })
        ));
    }

    #[test]
    fn zero_amount_rejected() {
        let policy = engine(100);
        let err = policy
            .validate_payment(&asset(), 0, &Principal::new("bob"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    }

    #[test]
    fn only_admin_sets_limit() {
        let policy = engine(100);
        let err = policy
            .set_max_payment_amount(&Principal::new("mallory"), 5_000)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(policy.max_payment_amount(), 100);

        assert_eq!(
            policy
                .set_max_payment_amount(&Principal::new("admin"), 5_000)
                .unwrap(),
            100
        );
        assert_eq!(policy.max_payment_amount(), 5_000);
    }

    #[test]
    fn zero_limit_update_rejected() {
        let policy = engine(100);
        let err = policy
            .set_max_payment_amount(&Principal::new("admin"), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(policy.max_payment_amount(), 100);
    }

    #[test]
    fn enforce_skips_closure_on_violation() {
        let policy = engine(10);
        let mut ran = false;
        let result = policy.enforce(&asset(), 11, &Principal::new("bob"), || {
            ran = true;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!ran);

        let value = policy
            .enforce(&asset(), 10, &Principal::new("bob"), || Ok(42))
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn limit_survives_restore() {
        let db = KernelDb::open_temporary().unwrap();
        let address = Principal::new("policy");
        let policy =
            PolicyEngine::deploy(db.clone(), address.clone(), Principal::new("admin"), 100).unwrap();
        policy
            .set_max_payment_amount(&Principal::new("admin"), 250)
            .unwrap();

        let restored = PolicyEngine::restore(db.clone(), address).unwrap().unwrap();
        assert_eq!(restored.max_payment_amount(), 250);
        assert_eq!(restored.admin(), Principal::new("admin"));

        assert!(PolicyEngine::restore(db, Principal::new("other"))
            .unwrap()
            .is_none());
    }
}
