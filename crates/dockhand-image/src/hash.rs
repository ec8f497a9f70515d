//! SHA-256 content verification.
//!
//! Registries identify manifests by the digest of their exact bytes; these
//! helpers compute and check that digest.

use dockhand_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Computes the SHA-256 digest of a byte slice.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> Digest {
    let hex = format!("{:x}", Sha256::digest(bytes));
    tracing::trace!(len = bytes.len(), digest = %hex, "computed SHA-256");
    Digest::from_hex(hex).unwrap_or_else(|_| unreachable!("sha256 output is always 64 hex chars"))
}

/// Returns whether `bytes` hash to `expected`.
#[must_use]
pub fn matches(bytes: &[u8], expected: &Digest) -> bool {
    digest_bytes(bytes) == *expected
}
