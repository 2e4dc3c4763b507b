//! Walkthrough of the treasury kernel lifecycle.
//!
//! Deploys a kernel on a temporary database, funds the vault, schedules a
//! time-locked payment, and shows each guard (time gate, policy limit,
//! one-shot) refusing and then allowing execution.
//!
//! Run with:
//!   cargo run -p pfta-contracts --example treasury_demo

use chrono::Duration;
use std::sync::Arc;

use pfta_contracts::KernelIndex;
use pfta_protocol::{AssetId, AssetLedger, Clock, KernelDb, ManualClock, Principal, TokenLedger};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

fn step(title: &str) {
    println!("\n{BOLD}{CYAN}▸ {title}{RESET}");
}

fn ok(msg: impl std::fmt::Display) {
    println!("  {GREEN}✓{RESET} {msg}");
}

fn refused(msg: impl std::fmt::Display) {
    println!("  {YELLOW}✗{RESET} {msg}");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db = KernelDb::open_temporary()?;
    let ledger = Arc::new(TokenLedger::new());
    let clock = ManualClock::starting_now();
    let treasurer = Principal::new("treasurer");
    let donor = Principal::new("donor");
    let bob = Principal::new("bob");
    let musd = AssetId::new("mUSD");

    step("Deploy kernel (limit 100)");
    let kernel = KernelIndex::deploy(db, treasurer.clone(), 100, ledger.clone(), Arc::new(clock.clone()))?;
    let addresses = kernel.addresses();
    ok(format!("policy    {}", addresses.policy));
    ok(format!("vault     {}", addresses.vault));
    ok(format!("scheduler {} (authorized on vault)", addresses.scheduler));

    step("Fund the vault with 200 mUSD");
    ledger.mint(&musd, &donor, 200)?;
    ledger.approve(&musd, &donor, &addresses.vault, 200)?;
    let balance = kernel.vault().deposit(&donor, &musd, 200)?;
    ok(format!("vault balance {balance}"));

    step("Schedule 50 mUSD to bob, executable in 60s");
    let scheduler = kernel.scheduler();
    let id = scheduler.schedule_payment(&treasurer, &musd, &bob, 50, clock.now() + Duration::seconds(60))?;
    ok(format!("payment #{id} scheduled"));

    match scheduler.execute_payment(&bob, id) {
        Ok(_) => ok("executed early (unexpected)"),
        Err(e) => refused(e),
    }

    step("Advance the clock 60s");
    clock.advance(Duration::seconds(60));
    let record = scheduler.execute_payment(&bob, id)?;
    ok(format!("payment #{} {}", record.id, record.status));
    ok(format!("bob holds {} mUSD", ledger.balance_of(&musd, &bob)));
    ok(format!("vault tracks {} mUSD", kernel.vault().get_balance(&musd)));

    match scheduler.execute_payment(&bob, id) {
        Ok(_) => ok("executed twice (unexpected)"),
        Err(e) => refused(e),
    }

    step("Schedule 1000 mUSD against the 100 limit");
    let big = scheduler.schedule_payment(&treasurer, &musd, &bob, 1_000, clock.now())?;
    match scheduler.execute_payment(&bob, big) {
        Ok(_) => ok("executed over limit (unexpected)"),
        Err(e) => refused(e),
    }

    step("Unauthorized direct release");
    match kernel.vault().release(&bob, &musd, &bob, 1) {
        Ok(_) => ok("released (unexpected)"),
        Err(e) => refused(e),
    }

    println!();
    Ok(())
}
