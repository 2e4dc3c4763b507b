//! # Assets and Amounts
//!
//! An asset is any fungible resource the ledger can move: a token, a
//! currency, a points balance. The kernel never looks inside an [`AssetId`];
//! it only uses it as a key for balances and allowances.
//!
//! All quantities are [`Amount`]s: unsigned integers in the asset's smallest
//! unit. No floats, no decimals in arithmetic. Display scaling is a client
//! concern.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::principal::{check_identifier, IdentifierError};

/// Quantity of an asset in smallest units.
pub type Amount = u64;

/// Identifier of a fungible asset. Same validation rules as a
/// [`Principal`](crate::identity::Principal) when decoded.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Wraps a trusted identifier (symbol, contract address, ...) as an
    /// asset id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates and wraps an identifier received from outside.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        check_identifier(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AssetId {
    type Error = IdentifierError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<AssetId> for String {
    fn from(a: AssetId) -> Self {
        a.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_symbols() {
        let asset: AssetId = serde_json::from_str("\"mUSD\"").unwrap();
        assert_eq!(asset, AssetId::new("mUSD"));
        assert_eq!(serde_json::to_string(&asset).unwrap(), "\"mUSD\"");
    }

    #[test]
    fn rejects_nul_and_empty() {
        assert!(serde_json::from_str::<AssetId>("\"m\\u0000USD\"").is_err());
        assert_eq!(AssetId::parse(""), Err(IdentifierError::Empty));
    }
}
