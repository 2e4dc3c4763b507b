//! # KernelDb: Persistent Storage Engine
//!
//! The persistence layer for the treasury kernel, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree                | Key                                   | Value                    |
//! |---------------------|---------------------------------------|--------------------------|
//! | `vaults`            | `vault` (UTF-8)                       | `bincode(VaultConfig)`   |
//! | `vault_balances`    | `vault \0 asset`                      | amount (8B BE)           |
//! | `vault_grants`      | `vault \0 agent`                      | `1` / `0`                |
//! | `policies`          | `policy` (UTF-8)                      | `bincode(PolicyConfig)`  |
//! | `payments`          | `scheduler \0 id` (id 8B BE)          | `bincode(PaymentRecord)` |
//! | `ledger_balances`   | `asset \0 holder`                     | amount (8B BE)           |
//! | `ledger_allowances` | `asset \0 owner \0 spender`           | amount (8B BE)           |
//! | `metadata`          | key (UTF-8)                           | value (bytes)            |
//!
//! Payment ids are stored big-endian so that sled's lexicographic ordering
//! matches numeric ordering, so a prefix scan over one scheduler returns its
//! records in id order.
//!
//! Key components never contain the separator byte: writes with such a
//! component fail with [`DbError::InvalidKey`] instead of producing a row
//! that cannot be split again on load.
//!
//! Ledger rows that change together (the two sides of a transfer, plus the
//! consumed allowance of a pull) are written in one sled transaction.

use sled::transaction::TransactionError;
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;

use super::records::{KernelAddresses, PolicyConfig, VaultConfig};
use crate::asset::{Amount, AssetId};
use crate::config::{KEY_SEPARATOR, META_KERNEL_ADDRESSES, META_SCHEMA_VERSION};
use crate::identity::Principal;
use crate::payment::{PaymentId, PaymentRecord};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid key component: {0:?}")]
    InvalidKey(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Key Helpers
// ---------------------------------------------------------------------------

fn check_component(part: &str) -> DbResult<()> {
    if part.is_empty() || part.as_bytes().contains(&KEY_SEPARATOR) {
        return Err(DbError::InvalidKey(part.to_string()));
    }
    Ok(())
}

fn composite_key(parts: &[&str]) -> DbResult<Vec<u8>> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        check_component(part)?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.extend_from_slice(part.as_bytes());
    }
    Ok(key)
}

fn prefix_of(owner: &str) -> Vec<u8> {
    let mut prefix = owner.as_bytes().to_vec();
    prefix.push(KEY_SEPARATOR);
    prefix
}

fn split_key(key: &[u8]) -> DbResult<Vec<String>> {
    key.split(|b| *b == KEY_SEPARATOR)
        .map(|part| {
            String::from_utf8(part.to_vec())
                .map_err(|e| DbError::Serialization(format!("non-utf8 key component: {e}")))
        })
        .collect()
}

fn encode_amount(amount: Amount) -> [u8; 8] {
    amount.to_be_bytes()
}

fn decode_amount(bytes: &[u8]) -> DbResult<Amount> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid amount bytes".to_string()))?;
    Ok(Amount::from_be_bytes(arr))
}

fn encode<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// KernelDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for the treasury kernel.
///
/// Wraps a sled `Db` and exposes typed accessors per concern. Cloning is
/// cheap (sled handles are reference counted) and every clone sees the same
/// data, so each component simply holds its own clone.
///
/// # Thread Safety
///
/// sled supports lock-free concurrent reads and serialized writes.
/// Higher-level atomicity (read-check-write sequences) is the components'
/// responsibility: they hold their own lock across the whole operation.
#[derive(Debug, Clone)]
pub struct KernelDb {
    #[cfg(feature = "fault-injection")]
    write_failure: std::sync::Arc<std::sync::atomic::AtomicBool>,
    db: Db,
    vaults: Tree,
    vault_balances: Tree,
    vault_grants: Tree,
    policies: Tree,
    payments: Tree,
    ledger_balances: Tree,
    ledger_allowances: Tree,
    metadata: Tree,
}

impl KernelDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when the last handle is
    /// dropped. No filesystem cleanup needed in tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            vaults: db.open_tree("vaults")?,
            vault_balances: db.open_tree("vault_balances")?,
            vault_grants: db.open_tree("vault_grants")?,
            policies: db.open_tree("policies")?,
            payments: db.open_tree("payments")?,
            ledger_balances: db.open_tree("ledger_balances")?,
            ledger_allowances: db.open_tree("ledger_allowances")?,
            metadata: db.open_tree("metadata")?,
            #[cfg(feature = "fault-injection")]
            write_failure: Default::default(),
            db,
        })
    }

    /// Makes every subsequent write fail (or succeed again) on this handle
    /// and all of its clones. Test support for storage-failure paths.
    #[cfg(feature = "fault-injection")]
    pub fn set_write_failure(&self, fail: bool) {
        self.write_failure
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(feature = "fault-injection")]
    fn check_writable(&self) -> DbResult<()> {
        if self.write_failure.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DbError::Sled(sled::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            ))));
        }
        Ok(())
    }

    #[cfg(not(feature = "fault-injection"))]
    fn check_writable(&self) -> DbResult<()> {
        Ok(())
    }

    fn insert(&self, tree: &Tree, key: impl AsRef<[u8]>, value: impl Into<IVec>) -> DbResult<()> {
        self.check_writable()?;
        tree.insert(key.as_ref(), value)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Vault operations ---------------------------------------------------

    /// Persist the configuration record of a vault.
    pub fn put_vault_config(&self, vault: &Principal, config: &VaultConfig) -> DbResult<()> {
        check_component(vault.as_str())?;
        self.insert(&self.vaults, vault.as_str().as_bytes(), encode(config)?)
    }

    /// Load the configuration record of a vault.
    pub fn get_vault_config(&self, vault: &Principal) -> DbResult<Option<VaultConfig>> {
        match self.vaults.get(vault.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a vault's tracked balance for one asset.
    pub fn put_vault_balance(
        &self,
        vault: &Principal,
        asset: &AssetId,
        amount: Amount,
    ) -> DbResult<()> {
        let key = composite_key(&[vault.as_str(), asset.as_str()])?;
        self.insert(&self.vault_balances, key, &encode_amount(amount)[..])
    }

    /// All tracked balances of a vault, in asset order.
    pub fn vault_balances(&self, vault: &Principal) -> DbResult<Vec<(AssetId, Amount)>> {
        let prefix = prefix_of(vault.as_str());
        let mut out = Vec::new();
        for entry in self.vault_balances.scan_prefix(&prefix) {
            let (key, value) = entry?;
            let asset = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            out.push((AssetId::new(asset), decode_amount(&value)?));
        }
        Ok(out)
    }

    /// Persist one entry of a vault's authorization set.
    pub fn put_grant(&self, vault: &Principal, agent: &Principal, enabled: bool) -> DbResult<()> {
        let key = composite_key(&[vault.as_str(), agent.as_str()])?;
        self.insert(&self.vault_grants, key, &[u8::from(enabled)][..])
    }

    /// Every recorded grant of a vault, including revoked ones.
    pub fn grants(&self, vault: &Principal) -> DbResult<Vec<(Principal, bool)>> {
        let prefix = prefix_of(vault.as_str());
        let mut out = Vec::new();
        for entry in self.vault_grants.scan_prefix(&prefix) {
            let (key, value) = entry?;
            let agent = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            out.push((Principal::new(agent), value.first() == Some(&1)));
        }
        Ok(out)
    }

    // -- Policy operations --------------------------------------------------

    /// Persist a policy engine's configuration.
    pub fn put_policy(&self, policy: &Principal, config: &PolicyConfig) -> DbResult<()> {
        check_component(policy.as_str())?;
        self.insert(&self.policies, policy.as_str().as_bytes(), encode(config)?)
    }

    /// Load a policy engine's configuration.
    pub fn get_policy(&self, policy: &Principal) -> DbResult<Option<PolicyConfig>> {
        match self.policies.get(policy.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // -- Payment operations -------------------------------------------------

    fn payment_key(scheduler: &Principal, id: PaymentId) -> Vec<u8> {
        let mut key = prefix_of(scheduler.as_str());
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    /// Persist (insert or overwrite) a payment record.
    pub fn put_payment(&self, scheduler: &Principal, record: &PaymentRecord) -> DbResult<()> {
        check_component(scheduler.as_str())?;
        self.insert(
            &self.payments,
            Self::payment_key(scheduler, record.id),
            encode(record)?,
        )
    }

    /// Load a single payment record.
    pub fn get_payment(
        &self,
        scheduler: &Principal,
        id: PaymentId,
    ) -> DbResult<Option<PaymentRecord>> {
        match self.payments.get(Self::payment_key(scheduler, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All payment records of a scheduler in ascending id order.
    pub fn payments(&self, scheduler: &Principal) -> DbResult<Vec<PaymentRecord>> {
        let prefix = prefix_of(scheduler.as_str());
        let mut out = Vec::new();
        for entry in self.payments.scan_prefix(&prefix) {
            let (_key, value) = entry?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    // -- Ledger operations --------------------------------------------------

    /// Persist a set of ledger holder balances, and optionally one
    /// allowance, atomically: either every row is written or none is.
    pub fn put_ledger_entries<'a>(
        &self,
        balances: impl IntoIterator<Item = (&'a AssetId, &'a Principal, Amount)>,
        allowance: Option<(&AssetId, &Principal, &Principal, Amount)>,
    ) -> DbResult<()> {
        let balance_rows = balances
            .into_iter()
            .map(|(asset, holder, amount)| {
                Ok((composite_key(&[asset.as_str(), holder.as_str()])?, encode_amount(amount)))
            })
            .collect::<DbResult<Vec<_>>>()?;
        let allowance_row = allowance
            .map(|(asset, owner, spender, amount)| {
                composite_key(&[asset.as_str(), owner.as_str(), spender.as_str()])
                    .map(|key| (key, encode_amount(amount)))
            })
            .transpose()?;

        self.check_writable()?;
        (&self.ledger_balances, &self.ledger_allowances)
            .transaction(|(balance_tree, allowance_tree)| {
                for (key, value) in &balance_rows {
                    balance_tree.insert(key.as_slice(), &value[..])?;
                }
                if let Some((key, value)) = &allowance_row {
                    allowance_tree.insert(key.as_slice(), &value[..])?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(e) => DbError::Sled(e),
                TransactionError::Abort(()) => {
                    DbError::Serialization("ledger transaction aborted".to_string())
                }
            })?;
        self.db.flush()?;
        Ok(())
    }

    /// Every persisted ledger balance.
    pub fn ledger_balances(&self) -> DbResult<Vec<(AssetId, Principal, Amount)>> {
        let mut out = Vec::new();
        for entry in self.ledger_balances.iter() {
            let (key, value) = entry?;
            match split_key(&key)?.as_slice() {
                [asset, holder] => out.push((
                    AssetId::new(asset.clone()),
                    Principal::new(holder.clone()),
                    decode_amount(&value)?,
                )),
                _ => return Err(DbError::Serialization("malformed ledger balance key".into())),
            }
        }
        Ok(out)
    }

    /// Persist a ledger allowance.
    pub fn put_allowance(
        &self,
        asset: &AssetId,
        owner: &Principal,
        spender: &Principal,
        amount: Amount,
    ) -> DbResult<()> {
        let key = composite_key(&[asset.as_str(), owner.as_str(), spender.as_str()])?;
        self.insert(&self.ledger_allowances, key, &encode_amount(amount)[..])
    }

    /// Every persisted ledger allowance.
    pub fn allowances(&self) -> DbResult<Vec<(AssetId, Principal, Principal, Amount)>> {
        let mut out = Vec::new();
        for entry in self.ledger_allowances.iter() {
            let (key, value) = entry?;
            match split_key(&key)?.as_slice() {
                [asset, owner, spender] => out.push((
                    AssetId::new(asset.clone()),
                    Principal::new(owner.clone()),
                    Principal::new(spender.clone()),
                    decode_amount(&value)?,
                )),
                _ => return Err(DbError::Serialization("malformed allowance key".into())),
            }
        }
        Ok(out)
    }

    // -- Metadata -----------------------------------------------------------

    /// Record the addresses of a deployed kernel, together with the schema
    /// version that wrote them.
    pub fn put_kernel_addresses(&self, addresses: &KernelAddresses) -> DbResult<()> {
        let json =
            serde_json::to_vec(addresses).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.check_writable()?;
        self.metadata.insert(
            META_SCHEMA_VERSION,
            &crate::config::STORAGE_SCHEMA_VERSION.to_be_bytes()[..],
        )?;
        self.insert(&self.metadata, META_KERNEL_ADDRESSES, json)
    }

    /// Addresses of the kernel deployed in this database, if any.
    pub fn get_kernel_addresses(&self) -> DbResult<Option<KernelAddresses>> {
        match self.metadata.get(META_KERNEL_ADDRESSES)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Storage schema version recorded at deployment.
    pub fn schema_version(&self) -> DbResult<Option<u32>> {
        match self.metadata.get(META_SCHEMA_VERSION)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| DbError::Serialization("invalid schema version".into()))?;
                Ok(Some(u32::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
