//! # Kernel Configuration & Constants
//!
//! Every magic number in PFTA lives here. Runtime knobs (ports, data
//! directory, administrator) are CLI arguments on the node; these are the
//! defaults they fall back to and the names the storage layer agrees on.

use crate::asset::Amount;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Kernel protocol version. Bump the major component whenever the on-disk
/// record layout changes incompatibly.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version tag written into the metadata tree at deployment.
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Policy Defaults
// ---------------------------------------------------------------------------

/// Per-payment ceiling used when the operator does not pass one explicitly.
pub const DEFAULT_MAX_PAYMENT_AMOUNT: Amount = 100_000;

// ---------------------------------------------------------------------------
// Address Derivation
// ---------------------------------------------------------------------------

/// Number of hash bytes kept when deriving a component or operator address.
/// 20 bytes, rendered as 40 hex characters behind a `0x` prefix.
pub const ADDRESS_LENGTH: usize = 20;

/// Prefix carried by every derived address.
pub const ADDRESS_PREFIX: &str = "0x";

/// Domain separators for component address derivation.
pub const POLICY_DOMAIN: &str = "pfta.policy-engine";
pub const VAULT_DOMAIN: &str = "pfta.treasury-vault";
pub const SCHEDULER_DOMAIN: &str = "pfta.payment-scheduler";
pub const OPERATOR_DOMAIN: &str = "pfta.operator";

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// How often the node refreshes its ready-payments gauge, in milliseconds.
pub const MATURITY_SCAN_INTERVAL_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Request Authentication
// ---------------------------------------------------------------------------

/// Header carrying the hex-encoded Ed25519 public key of the signer.
pub const PUBLIC_KEY_HEADER: &str = "x-pfta-public-key";

/// Header carrying the hex-encoded request signature.
pub const SIGNATURE_HEADER: &str = "x-pfta-signature";

/// Header carrying the signing time in Unix milliseconds.
pub const TIMESTAMP_HEADER: &str = "x-pfta-timestamp";

/// Domain tag prefixed to every signed request message.
pub const REQUEST_SIGNING_DOMAIN: &str = "pfta.request.v1";

/// Maximum distance between a request's timestamp and the node clock,
/// in milliseconds. Replays are tracked for this long.
pub const REQUEST_MAX_SKEW_MS: i64 = 5 * 60 * 1_000;

/// Largest request body the node will buffer for signature checks.
pub const MAX_SIGNED_BODY_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Separator byte between composite key components. Principals and asset ids
/// are validated to hold no control characters, and the storage layer
/// refuses any key component containing this byte.
pub const KEY_SEPARATOR: u8 = 0x00;

/// Longest principal or asset id accepted from outside, in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 256;

/// Metadata key holding the JSON-encoded addresses of a deployed kernel.
pub const META_KERNEL_ADDRESSES: &str = "kernel_addresses";

/// Metadata key holding the storage schema version.
pub const META_SCHEMA_VERSION: &str = "schema_version";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_distinct() {
        let domains = [POLICY_DOMAIN, VAULT_DOMAIN, SCHEDULER_DOMAIN, OPERATOR_DOMAIN];
        for (i, a) in domains.iter().enumerate() {
            for b in &domains[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn ports_do_not_collide() {
        assert_ne!(DEFAULT_RPC_PORT, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn auth_headers_are_distinct() {
        assert_ne!(PUBLIC_KEY_HEADER, SIGNATURE_HEADER);
        assert_ne!(SIGNATURE_HEADER, TIMESTAMP_HEADER);
        assert_ne!(PUBLIC_KEY_HEADER, TIMESTAMP_HEADER);
    }

    #[test]
    fn default_limit_is_usable() {
        // A zero default would make a fresh deployment reject its own config.
        assert!(DEFAULT_MAX_PAYMENT_AMOUNT > 0);
    }
}
