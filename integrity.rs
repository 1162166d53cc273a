//! Corruption-detection digests over encrypted snapshot bytes.
//!
//! A digest is written next to the payload and recomputed on load; a
//! mismatch means the file was corrupted and triggers backup fallback.
//! This is corruption detection only: there is no secret key and no
//! authentication guarantee.

use sha2::{Digest, Sha256};

/// Sentinel recorded in place of a digest when hashing is disabled.
pub const NO_HASH: &str = "NO_HASH";

/// Pluggable digest over a byte buffer, producing a hex string.
pub trait IntegrityGuard: Send + Sync {
    /// Hex digest over the encrypted payload, or [`NO_HASH`] when disabled.
    fn digest(&self, bytes: &[u8]) -> String;

    /// Whether digests are computed and verified at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Check `recorded` against a fresh digest of `bytes`. A stored
    /// [`NO_HASH`] marker always passes: that file was written with
    /// hashing off.
    fn verify(&self, bytes: &[u8], recorded: &str) -> bool {
        if !self.enabled() || recorded == NO_HASH {
            return true;
        }
        self.digest(bytes) == recorded
    }
}

/// SHA-256 digest guard.
#[derive(Debug, Default)]
pub struct Sha256Integrity;

impl IntegrityGuard for Sha256Integrity {
    fn digest(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

/// Disabled hashing: records the sentinel and verifies nothing.
#[derive(Debug, Default)]
pub struct NoopIntegrity;

impl IntegrityGuard for NoopIntegrity {
    fn digest(&self, _bytes: &[u8]) -> String {
        NO_HASH.to_string()
    }

    fn enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_is_hex() {
        let guard = Sha256Integrity;
        let digest = guard.digest(b"payload");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verify_detects_mismatch() {
        let guard = Sha256Integrity;
        let digest = guard.digest(b"payload");
        assert!(guard.verify(b"payload", &digest));
        assert!(!guard.verify(b"tampered", &digest));
    }

    #[test]
    fn no_hash_marker_always_passes() {
        let guard = Sha256Integrity;
        assert!(guard.verify(b"anything", NO_HASH));
    }

    #[test]
    fn noop_guard_records_sentinel() {
        let guard = NoopIntegrity;
        assert_eq!(guard.digest(b"payload"), NO_HASH);
        assert!(guard.verify(b"anything", "garbage"));
    }
}
