//! # Payment Scheduler
//!
//! Records payment intents and later executes them through the vault.
//!
//! ## Lifecycle
//!
//! ```text
//! schedule_payment ──▶ Scheduled ──execute_payment──▶ Executed (terminal)
//! ```
//!
//! Scheduling is cheap and open to anyone: it only checks that the amount
//! is non-zero. Everything else (the time gate, the policy limit, vault
//! authorization and balance) is checked when the payment executes, because
//! all of it may change in between.
//!
//! Execution is also open to anyone. The credential the vault checks is the
//! scheduler's own address, not the caller's, so a third party can trigger
//! a mature payment without being trusted with funds.
//!
//! ## Atomicity
//!
//! `execute_payment` holds the scheduler lock for the whole call, then the
//! policy read lock (via [`PolicyEngine::enforce`]), then the vault lock.
//! The record is persisted as executed before the vault is asked to
//! release; if the release fails the record is persisted back as scheduled.
//! If that write fails as well the call reports
//! [`KernelError::RollbackFailed`] and the payment is queued for repair:
//! the next scheduling or execution call rewrites its row from memory,
//! where it is still scheduled.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pfta_protocol::{
    Amount, AssetId, Clock, DbError, KernelDb, PaymentId, PaymentRecord, PaymentStatus, Principal,
};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{KernelError, KernelResult, PolicyViolation};
use crate::policy_engine::PolicyEngine;
use crate::treasury_vault::TreasuryVault;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SchedulerState {
    /// Append-only; `records[i].id == i`.
    records: Vec<PaymentRecord>,
    /// Scheduled (not executed) payments keyed by `(execute_after, id)`.
    pending: BTreeSet<(DateTime<Utc>, PaymentId)>,
    /// Payments whose stored row disagrees with `records`.
    unsynced: BTreeSet<PaymentId>,
}

impl SchedulerState {
    fn rollback(&mut self, id: PaymentId, cause: KernelError, restore: DbError) -> KernelError {
        self.unsynced.insert(id);
        KernelError::RollbackFailed {
            cause: Box::new(cause),
            restore,
        }
    }
}

/// Time-gated, one-shot payment orchestrator.
pub struct PaymentScheduler {
    address: Principal,
    db: KernelDb,
    policy: Arc<PolicyEngine>,
    vault: Arc<TreasuryVault>,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
}

impl std::fmt::Debug for PaymentScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentScheduler")
            .field("address", &self.address)
            .field("policy", self.policy.address())
            .field("vault", self.vault.address())
            .finish_non_exhaustive()
    }
}

impl PaymentScheduler {
    /// Creates a scheduler wired to `policy` and `vault`, loading any
    /// payment records already stored under `address`.
    ///
    /// The scheduler cannot release anything until the vault administrator
    /// authorizes `address` on the vault.
    pub fn new(
        db: KernelDb,
        address: Principal,
        policy: Arc<PolicyEngine>,
        vault: Arc<TreasuryVault>,
        clock: Arc<dyn Clock>,
    ) -> KernelResult<Self> {
        let mut state = SchedulerState::default();
        for (position, record) in db.payments(&address)?.into_iter().enumerate() {
            if record.id != position as PaymentId {
                return Err(DbError::Serialization(format!(
                    "payment table of {address} has a gap: expected id {position}, found {}",
                    record.id
                ))
                .into());
            }
            if !record.is_executed() {
                state.pending.insert((record.execute_after, record.id));
            }
            state.records.push(record);
        }
        tracing::debug!(
            scheduler = %address,
            payments = state.records.len(),
            pending = state.pending.len(),
            "payment scheduler loaded"
        );
        Ok(Self {
            address,
            db,
            policy,
            vault,
            clock,
            state: Mutex::new(state),
        })
    }

    /// The scheduler's own identity; this is what the vault authorizes.
    pub fn address(&self) -> &Principal {
        &self.address
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn vault(&self) -> &Arc<TreasuryVault> {
        &self.vault
    }

    /// Current time as seen by the time gate.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Records a payment intent and returns its id. Ids are sequential,
    /// starting at 0.
    ///
    /// Only a zero amount is rejected here. Policy and balance are checked
    /// at execution.
    pub fn schedule_payment(
        &self,
        caller: &Principal,
        asset: &AssetId,
        recipient: &Principal,
        amount: Amount,
        execute_after: DateTime<Utc>,
    ) -> KernelResult<PaymentId> {
        if amount == 0 {
            return Err(PolicyViolation::ZeroAmount.into());
        }
        let mut state = self.state.lock();
        self.repair(&mut state)?;
        let id = state.records.len() as PaymentId;
        let record = PaymentRecord {
            id,
            asset: asset.clone(),
            recipient: recipient.clone(),
            amount,
            execute_after,
            status: PaymentStatus::Scheduled,
            scheduled_by: caller.clone(),
            scheduled_at: self.clock.now(),
        };

        self.db.put_payment(&self.address, &record)?;
        state.pending.insert((execute_after, id));
        state.records.push(record);

        tracing::info!(
            scheduler = %self.address,
            payment_id = id,
            by = %caller,
            to = %recipient,
            %asset,
            amount,
            %execute_after,
            "payment scheduled"
        );
        Ok(id)
    }

    /// Executes a mature payment: checks existence, the one-shot guard, the
    /// time gate (`now >= execute_after`) and the policy, then releases the
    /// funds from the vault as the scheduler.
    ///
    /// Returns the executed record.
    pub fn execute_payment(&self, caller: &Principal, id: PaymentId) -> KernelResult<PaymentRecord> {
        let mut state = self.state.lock();
        self.repair(&mut state)?;
        let record = state
            .records
            .get(id as usize)
            .cloned()
            .ok_or(KernelError::PaymentNotFound(id))?;
        if record.is_executed() {
            return Err(KernelError::AlreadyExecuted(id));
        }
        let now = self.clock.now();
        if !record.is_ready(now) {
            return Err(KernelError::NotYetExecutable {
                id,
                execute_after: record.execute_after,
                now,
            });
        }

        let executed = PaymentRecord {
            status: PaymentStatus::Executed {
                executed_at: now,
                executed_by: caller.clone(),
            },
            ..record.clone()
        };

        self.policy
            .enforce(&record.asset, record.amount, &record.recipient, || {
                self.db.put_payment(&self.address, &executed)?;
                if let Err(e) =
                    self.vault
                        .release(&self.address, &record.asset, &record.recipient, record.amount)
                {
                    if let Err(restore) = self.db.put_payment(&self.address, &record) {
                        tracing::error!(
                            scheduler = %self.address,
                            payment_id = id,
                            error = %restore,
                            "failed to restore scheduled status, queued for repair"
                        );
                        return Err(state.rollback(id, e, restore));
                    }
                    return Err(e);
                }
                Ok(())
            })?;

        state.pending.remove(&(record.execute_after, id));
        state.records[id as usize] = executed.clone();

        tracing::info!(
            scheduler = %self.address,
            payment_id = id,
            by = %caller,
            to = %record.recipient,
            asset = %record.asset,
            amount = record.amount,
            "payment executed"
        );
        Ok(executed)
    }

    /// Rewrites every queued payment row from memory. Fails, leaving the
    /// rest queued, on the first write that fails.
    fn repair(&self, state: &mut SchedulerState) -> KernelResult<()> {
        while let Some(id) = state.unsynced.first().copied() {
            if let Some(record) = state.records.get(id as usize) {
                self.db.put_payment(&self.address, record)?;
            }
            state.unsynced.remove(&id);
            tracing::info!(scheduler = %self.address, payment_id = id, "payment row repaired");
        }
        Ok(())
    }

    /// Payments whose stored row is waiting to be rewritten.
    pub fn pending_repairs(&self) -> Vec<PaymentId> {
        self.state.lock().unsynced.iter().copied().collect()
    }

    // -- Reads --------------------------------------------------------------

    pub fn payment(&self, id: PaymentId) -> Option<PaymentRecord> {
        self.state.lock().records.get(id as usize).cloned()
    }

    /// All records in id order.
    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().records.clone()
    }

    pub fn payment_count(&self) -> u64 {
        self.state.lock().records.len() as u64
    }

    /// Ids of scheduled payments whose time gate is open, in id order.
    /// Readiness says nothing about policy or balance.
    pub fn ready_payments(&self) -> Vec<PaymentId> {
        let now = self.clock.now();
        let state = self.state.lock();
        let mut ids: Vec<PaymentId> = state
            .pending
            .range(..=(now, PaymentId::MAX))
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
