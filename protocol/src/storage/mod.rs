//! # Storage Module
//!
//! Durable kernel state. Every component keeps its working state in memory
//! behind a lock and writes through to a [`KernelDb`] before an operation
//! returns, so a restarted node picks up exactly where the last committed
//! operation left it.
//!
//! ## Architecture
//!
//! ```text
//! db.rs     : sled trees and typed accessors
//! records.rs: persisted configuration records (policy, vault, addresses)
//! ```
//!
//! ## Design Decisions
//!
//! 1. **sled trees per concern.** Balances, grants, payments and ledger rows
//!    each get their own keyspace, so prefix scans never cross concerns.
//! 2. **Bincode for records, big-endian integers for amounts.** Compact and
//!    deterministic. JSON is reserved for the metadata tree, which operators
//!    occasionally inspect by hand.
//! 3. **Flush on every write.** The kernel moves money; a committed operation
//!    that vanishes on power loss is not committed.

pub mod db;
pub mod records;

pub use db::{DbError, DbResult, KernelDb};
pub use records::{KernelAddresses, PolicyConfig, VaultConfig};
