//! Opaque caller/recipient identities and component address derivation.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::{ADDRESS_LENGTH, ADDRESS_PREFIX, MAX_IDENTIFIER_LENGTH, OPERATOR_DOMAIN};

/// Why an externally supplied identifier was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier is longer than {max} bytes")]
    TooLong { max: usize },

    /// Control characters (NUL in particular) would break storage keys.
    #[error("identifier contains a control character")]
    ControlCharacter,
}

/// Checks an identifier received from outside the process: principals and
/// asset ids decoded from requests or records go through here.
pub fn check_identifier(id: &str) -> Result<(), IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if id.len() > MAX_IDENTIFIER_LENGTH {
        return Err(IdentifierError::TooLong {
            max: MAX_IDENTIFIER_LENGTH,
        });
    }
    if id.chars().any(char::is_control) {
        return Err(IdentifierError::ControlCharacter);
    }
    Ok(())
}

/// An identity the kernel can authorize, pay, or record as a caller.
///
/// The kernel treats the inner string as opaque: it is compared, stored and
/// displayed, never parsed. Derived addresses look like `0x` followed by 40
/// hex characters. Deserialization accepts any non-empty printable string up
/// to [`MAX_IDENTIFIER_LENGTH`] bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Wraps a trusted identifier as a principal. Input from outside the
    /// process goes through [`parse`](Self::parse) instead.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates and wraps an identifier.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        check_identifier(&id)?;
        Ok(Self(id))
    }

    /// The principal an operator holding `public_key` acts as.
    ///
    /// `0x || hex(BLAKE3(domain || public_key)[..20])`.
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(OPERATOR_DOMAIN.as_bytes());
        hasher.update(public_key.as_bytes());
        Self::from_digest(hasher.finalize().as_bytes())
    }

    /// Derives a component address from a domain tag, the deploying
    /// principal and a salt.
    ///
    /// ```text
    /// address = "0x" || hex( BLAKE3(domain || 0x00 || deployer || 0x00 || salt)[..20] )
    /// ```
    ///
    /// The same inputs always yield the same address; a fresh salt per
    /// deployment keeps two kernels deployed by one admin apart.
    pub fn derive(domain: &str, deployer: &Principal, salt: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(deployer.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(salt);
        Self::from_digest(hasher.finalize().as_bytes())
    }

    /// Builds an address from the leading bytes of a 32-byte digest.
    fn from_digest(digest: &[u8; 32]) -> Self {
        Self(format!(
            "{}{}",
            ADDRESS_PREFIX,
            hex::encode(&digest[..ADDRESS_LENGTH])
        ))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty. Empty principals are
    /// rejected at the API boundary; the kernel itself never creates one.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Principal {
    type Error = IdentifierError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<Principal> for String {
    fn from(p: Principal) -> Self {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let admin = Principal::new("admin");
        let a = Principal::derive("pfta.treasury-vault", &admin, b"salt");
        let b = Principal::derive("pfta.treasury-vault", &admin, b"salt");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_separates_domains_and_salts() {
        let admin = Principal::new("admin");
        let vault = Principal::derive("pfta.treasury-vault", &admin, b"salt");
        let scheduler = Principal::derive("pfta.payment-scheduler", &admin, b"salt");
        let other = Principal::derive("pfta.treasury-vault", &admin, b"pepper");
        assert_ne!(vault, scheduler);
        assert_ne!(vault, other);
    }

    #[test]
    fn derived_address_format() {
        let p = Principal::derive("d", &Principal::new("x"), b"");
        assert!(p.as_str().starts_with("0x"));
        assert_eq!(p.as_str().len(), 2 + 40);
        assert!(p.as_str()[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn serializes_as_plain_string() {
        let p = Principal::new("alice");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"alice\"");
        let back: Principal = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn deserialization_rejects_unusable_identifiers() {
        assert!(serde_json::from_str::<Principal>("\"evil\\u0000x\"").is_err());
        assert!(serde_json::from_str::<Principal>("\"\"").is_err());
        let long = format!("\"{}\"", "a".repeat(MAX_IDENTIFIER_LENGTH + 1));
        assert!(serde_json::from_str::<Principal>(&long).is_err());
    }

    #[test]
    fn parse_reports_the_reason() {
        assert_eq!(Principal::parse(""), Err(IdentifierError::Empty));
        assert_eq!(
            Principal::parse("line\nbreak"),
            Err(IdentifierError::ControlCharacter)
        );
        assert_eq!(Principal::parse("0xabc").unwrap().as_str(), "0xabc");
    }
}
