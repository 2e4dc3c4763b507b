//! End-to-end kernel scenarios.
//!
//! These tests drive a deployed [`KernelIndex`] the way an operator would:
//! fund the vault through the ledger, schedule payments, move the clock and
//! execute. Each test checks both the kernel's tracked state and the
//! ledger's actual holdings.

use chrono::Duration;
use pfta_contracts::{ErrorKind, KernelError, KernelIndex, PolicyViolation};
use pfta_protocol::{AssetId, AssetLedger, Clock, KernelDb, ManualClock, Principal, TokenLedger};
use std::sync::Arc;

struct Kernel {
    index: KernelIndex,
    ledger: Arc<TokenLedger>,
    clock: ManualClock,
}

fn admin() -> Principal {
    Principal::new("treasurer")
}

fn musd() -> AssetId {
    AssetId::new("mUSD")
}

/// Helper: deploys a kernel with the given policy limit.
fn kernel(limit: u64) -> Kernel {
    let db = KernelDb::open_temporary().unwrap();
    let ledger = Arc::new(TokenLedger::new());
    let clock = ManualClock::starting_now();
    let index = KernelIndex::deploy(db, admin(), limit, ledger.clone(), Arc::new(clock.clone()))
        .unwrap();
    Kernel {
        index,
        ledger,
        clock,
    }
}

/// Helper: mints `amount` to `depositor`, approves the vault and deposits.
fn deposit(k: &Kernel, depositor: &str, amount: u64) {
    let depositor = Principal::new(depositor);
    let vault = k.index.vault();
    k.ledger.mint(&musd(), &depositor, amount).unwrap();
    k.ledger
        .approve(&musd(), &depositor, vault.address(), amount)
        .unwrap();
    vault.deposit(&depositor, &musd(), amount).unwrap();
}

// ---------------------------------------------------------------------------
// Payment lifecycle
// ---------------------------------------------------------------------------

#[test]
fn timelocked_payment_executes_after_gate() {
    let k = kernel(100);
    deposit(&k, "donor", 100);
    let scheduler = k.index.scheduler();
    let vault = k.index.vault();
    let bob = Principal::new("bob");

    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 50, k.clock.now() + Duration::seconds(60))
        .unwrap();
    assert_eq!(id, 0);

    // Before the gate.
    let err = scheduler.execute_payment(&bob, id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(vault.get_balance(&musd()), 100);

    // Past the gate.
    k.clock.advance(Duration::seconds(61));
    scheduler.execute_payment(&bob, id).unwrap();

    assert_eq!(k.ledger.balance_of(&musd(), &bob), 50);
    assert_eq!(vault.get_balance(&musd()), 50);
    assert_eq!(k.ledger.balance_of(&musd(), vault.address()), 50);
}

#[test]
fn over_limit_payment_never_executes() {
    let k = kernel(100);
    deposit(&k, "donor", 5_000);
    let scheduler = k.index.scheduler();
    let bob = Principal::new("bob");

    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 1_000, k.clock.now())
        .unwrap();

    for _ in 0..3 {
        k.clock.advance(Duration::days(30));
        let err = scheduler.execute_payment(&bob, id).unwrap_err();
        assert!(matches!(
            err,
            KernelError::PolicyViolation(PolicyViolation::ExceedsLimit {
                amount: 1_000,
                limit: 100
            })
        ));
    }
    assert_eq!(k.index.vault().get_balance(&musd()), 5_000);
    assert!(!scheduler.payment(id).unwrap().is_executed());
}

#[test]
fn lowering_limit_blocks_previously_valid_payment() {
    let k = kernel(100);
    deposit(&k, "donor", 100);
    let scheduler = k.index.scheduler();
    let bob = Principal::new("bob");

    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 80, k.clock.now())
        .unwrap();
    k.index
        .policy()
        .set_max_payment_amount(&admin(), 50)
        .unwrap();

    let err = scheduler.execute_payment(&bob, id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyViolation);

    // Raising it again makes the same record executable.
    k.index
        .policy()
        .set_max_payment_amount(&admin(), 80)
        .unwrap();
    scheduler.execute_payment(&bob, id).unwrap();
    assert_eq!(k.ledger.balance_of(&musd(), &bob), 80);
}

#[test]
fn payment_executes_at_most_once() {
    let k = kernel(100);
    deposit(&k, "donor", 1_000);
    let scheduler = k.index.scheduler();
    let bob = Principal::new("bob");

    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 10, k.clock.now())
        .unwrap();
    scheduler.execute_payment(&Principal::new("keeper"), id).unwrap();

    // Nothing that happens afterwards reopens the record.
    deposit(&k, "donor", 1_000);
    k.index
        .policy()
        .set_max_payment_amount(&admin(), 10_000)
        .unwrap();
    k.clock.advance(Duration::days(1));
    for caller in ["keeper", "bob", "treasurer"] {
        let err = scheduler
            .execute_payment(&Principal::new(caller), id)
            .unwrap_err();
        assert!(matches!(err, KernelError::AlreadyExecuted(0)));
    }
    assert_eq!(k.ledger.balance_of(&musd(), &bob), 10);
}

#[test]
fn insufficient_vault_balance_fails_then_succeeds_after_deposit() {
    let k = kernel(100);
    deposit(&k, "donor", 20);
    let scheduler = k.index.scheduler();
    let bob = Principal::new("bob");

    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 60, k.clock.now())
        .unwrap();
    let err = scheduler.execute_payment(&bob, id).unwrap_err();
    assert!(matches!(err, KernelError::InsufficientFunds { .. }));
    assert!(!scheduler.payment(id).unwrap().is_executed());

    deposit(&k, "donor", 40);
    let record = scheduler.execute_payment(&bob, id).unwrap();
    assert!(record.is_executed());
    assert_eq!(k.index.vault().get_balance(&musd()), 0);
}

#[test]
fn revoked_scheduler_cannot_release() {
    let k = kernel(100);
    deposit(&k, "donor", 100);
    let scheduler = k.index.scheduler();
    let vault = k.index.vault();
    let bob = Principal::new("bob");

    vault.revoke_agent(&admin(), scheduler.address()).unwrap();
    let id = scheduler
        .schedule_payment(&admin(), &musd(), &bob, 10, k.clock.now())
        .unwrap();

    let err = scheduler.execute_payment(&bob, id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(!scheduler.payment(id).unwrap().is_executed());
    assert_eq!(vault.get_balance(&musd()), 100);
}

// ---------------------------------------------------------------------------
// Vault custody
// ---------------------------------------------------------------------------

#[test]
fn authorized_agent_release_and_unauthorized_refusal() {
    let k = kernel(100);
    deposit(&k, "donor", 200);
    let vault = k.index.vault();
    let agent = Principal::new("payroll-bot");
    let bob = Principal::new("bob");

    vault.authorize_scheduler(&admin(), &agent, true).unwrap();
    vault.release(&agent, &musd(), &bob, 25).unwrap();
    assert_eq!(vault.get_balance(&musd()), 175);
    assert_eq!(k.ledger.balance_of(&musd(), &bob), 25);

    for amount in [0, 1, 175, 10_000] {
        let err = vault
            .release(&Principal::new("stranger"), &musd(), &bob, amount)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
    assert_eq!(vault.get_balance(&musd()), 175);
}

#[test]
fn only_admin_changes_authorizations() {
    let k = kernel(100);
    let vault = k.index.vault();
    let before = vault.authorized_agents();

    let err = vault
        .authorize_scheduler(&Principal::new("bob"), &Principal::new("bob"), true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let scheduler = k.index.scheduler().address().clone();
    assert!(vault
        .authorize_scheduler(&scheduler, &scheduler, false)
        .is_err());
    assert_eq!(vault.authorized_agents(), before);
}

#[test]
fn tracked_balance_equals_deposits_minus_releases() {
    let k = kernel(1_000);
    let vault = k.index.vault();
    let agent = Principal::new("agent");
    vault.grant_agent(&admin(), &agent).unwrap();

    let mut expected: u64 = 0;
    let steps: [(bool, u64); 8] = [
        (true, 300),
        (false, 120),
        (true, 45),
        (false, 500), // overdraw, rejected
        (false, 225),
        (true, 10),
        (false, 10),
        (false, 1), // balance is zero here
    ];
    for (is_deposit, amount) in steps {
        if is_deposit {
            deposit(&k, "donor", amount);
            expected += amount;
        } else {
            match vault.release(&agent, &musd(), &Principal::new("payee"), amount) {
                Ok(_) => expected -= amount,
                Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientFunds),
            }
        }
        assert_eq!(vault.get_balance(&musd()), expected);
        assert_eq!(k.ledger.balance_of(&musd(), vault.address()), expected);
    }
    assert_eq!(expected, 0);
}
