//! # Operator Keys
//!
//! Ed25519 key material for human or service operators: the kernel
//! administrator, whose key the node generates on `init`, and anyone else
//! who deposits, schedules or triggers payments. The kernel only ever sees
//! the derived [`Principal`]; the key itself stays on the operator's disk
//! and proves itself by signing requests.
//!
//! Key bytes are never logged. Keep it that way.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use thiserror::Error;

use super::principal::Principal;
use super::request::{signing_message, RequestSignature};

/// Errors that can occur while loading operator keys.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not hex")]
    InvalidSecretKey,
}

/// An operator's Ed25519 signing key.
///
/// Not `Serialize`. Persist it with [`to_hex`](Self::to_hex) into a file
/// with restrictive permissions.
pub struct OperatorKey {
    signing_key: SigningKey,
}

impl OperatorKey {
    /// Generates a fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstructs a key from its hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let secret: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Hex-encodes the secret key for writing to a key file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Returns the public half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded public key, for display.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    /// The principal this operator acts as. See
    /// [`Principal::from_public_key`].
    pub fn principal(&self) -> Principal {
        Principal::from_public_key(&self.verifying_key())
    }

    /// Signs arbitrary bytes. Deterministic (RFC 8032).
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Strict Ed25519 verification against this key's public half.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key().verify_strict(message, signature).is_ok()
    }

    /// Produces the credentials for one HTTP request.
    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        timestamp_ms: i64,
        body: &[u8],
    ) -> RequestSignature {
        let signature = self.sign(&signing_message(method, path, timestamp_ms, body));
        RequestSignature {
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_preserves_principal() {
        let key = OperatorKey::generate();
        let restored = OperatorKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.principal(), restored.principal());
        assert_eq!(key.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn distinct_keys_distinct_principals() {
        assert_ne!(
            OperatorKey::generate().principal(),
            OperatorKey::generate().principal()
        );
    }

    #[test]
    fn sign_and_verify() {
        let key = OperatorKey::generate();
        let signature = key.sign(b"authorize scheduler");
        assert!(key.verify(b"authorize scheduler", &signature));
        assert!(!key.verify(b"authorize mallory", &signature));
        assert!(!OperatorKey::generate().verify(b"authorize scheduler", &signature));
    }

    #[test]
    fn principal_matches_public_key_derivation() {
        let key = OperatorKey::generate();
        assert_eq!(key.principal(), Principal::from_public_key(&key.verifying_key()));
    }

    #[test]
    fn from_hex_tolerates_trailing_newline() {
        let key = OperatorKey::generate();
        let with_newline = format!("{}\n", key.to_hex());
        assert!(OperatorKey::from_hex(&with_newline).is_ok());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(OperatorKey::from_hex("not hex").is_err());
        assert!(OperatorKey::from_hex("abcd").is_err());
    }
}
