//! # Signed Requests
//!
//! How a caller proves which principal it acts as. Every mutating request
//! carries an Ed25519 public key, a timestamp and a signature over
//!
//! ```text
//! domain \n METHOD \n path[?query] \n timestamp_ms \n hex(BLAKE3(body))
//! ```
//!
//! The verifier derives the [`Principal`] from the key that checked out, so
//! a client can only ever act as a key it holds. Component principals (the
//! vault, the scheduler) are derived from a salt rather than a key and can
//! never be presented by a client.
//!
//! The timestamp bounds how long a captured request stays usable; the node
//! additionally remembers signatures it has seen within that window.

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use thiserror::Error;

use super::principal::Principal;
use crate::config::{REQUEST_MAX_SKEW_MS, REQUEST_SIGNING_DOMAIN};

/// Why a request signature was refused.
///
/// Deliberately coarse: a failed check does not say which part of the
/// message differed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed signature: expected 64 hex-encoded bytes")]
    MalformedSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("request timestamp {timestamp_ms} is outside the accepted window")]
    StaleTimestamp { timestamp_ms: i64 },
}

/// The exact bytes a request signature covers.
pub fn signing_message(method: &str, path: &str, timestamp_ms: i64, body: &[u8]) -> Vec<u8> {
    format!(
        "{REQUEST_SIGNING_DOMAIN}\n{}\n{path}\n{timestamp_ms}\n{}",
        method.to_ascii_uppercase(),
        blake3::hash(body).to_hex()
    )
    .into_bytes()
}

/// Credentials attached to one request, as they travel in headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    /// Hex-encoded signature over [`signing_message`].
    pub signature: String,
    /// Signing time, Unix milliseconds.
    pub timestamp_ms: i64,
}

/// A request whose signature checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest {
    /// The principal derived from the verifying key.
    pub principal: Principal,
    /// Raw signature bytes. Unique per request, so they double as the
    /// replay-tracking key.
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl RequestSignature {
    /// Checks freshness against `now_ms`, then the signature over
    /// `method`, `path` and `body`.
    pub fn verify(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        now_ms: i64,
    ) -> Result<VerifiedRequest, AuthError> {
        if now_ms.abs_diff(self.timestamp_ms) > REQUEST_MAX_SKEW_MS.unsigned_abs() {
            return Err(AuthError::StaleTimestamp {
                timestamp_ms: self.timestamp_ms,
            });
        }
        let public_key = decode_public_key(&self.public_key)?;
        let signature_bytes: [u8; SIGNATURE_LENGTH] = hex::decode(self.signature.trim())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(AuthError::MalformedSignature)?;

        let message = signing_message(method, path, self.timestamp_ms, body);
        public_key
            .verify_strict(&message, &Signature::from_bytes(&signature_bytes))
            .map_err(|_| AuthError::VerificationFailed)?;

        Ok(VerifiedRequest {
            principal: Principal::from_public_key(&public_key),
            signature: signature_bytes,
        })
    }
}

/// Parses a hex-encoded Ed25519 public key.
pub fn decode_public_key(hex_str: &str) -> Result<VerifyingKey, AuthError> {
    let bytes: [u8; PUBLIC_KEY_LENGTH] = hex::decode(hex_str.trim())
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(AuthError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| AuthError::InvalidPublicKey)
}
