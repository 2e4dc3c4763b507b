//! # Identity Module
//!
//! Who is calling, and who is being paid. The kernel never authenticates
//! anyone itself: it receives a [`Principal`] for every call and compares it
//! against the administrators and grants it has on record. Authentication is
//! the transport's job; the node verifies a signed request
//! ([`RequestSignature`]) and passes on the principal of the key that
//! signed it.
//!
//! Two kinds of principal exist in practice:
//!
//! 1. **Operators**: people or services holding an Ed25519 key. Their
//!    address is derived from the public key ([`OperatorKey::principal`]).
//! 2. **Components**: the policy engine, vault and scheduler themselves.
//!    Their address is derived from a domain tag, the deployer and a random
//!    salt ([`Principal::derive`]). The scheduler's own address is the
//!    credential the vault checks on release, never the scheduler's caller.

pub mod keys;
pub mod principal;
pub mod request;

pub use keys::{KeyError, OperatorKey};
pub use principal::{IdentifierError, Principal};
pub use request::{AuthError, RequestSignature, VerifiedRequest};
