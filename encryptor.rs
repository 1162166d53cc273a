//! Pluggable snapshot ciphers.
//!
//! A [`SnapshotCipher`] is a byte-to-byte transform with an inverse,
//! applied after serialization and before hashing on save, and inverted
//! after digest verification on load. The integrity digest therefore
//! covers ciphertext, never plaintext.
//!
//! The default is [`IdentityCipher`]. [`XChaChaCipher`] provides real
//! encryption with a 24-byte nonce prefix and a managed key file.
//!
//! ## Key Management
//!
//! - Keys are zeroized on drop (via `Zeroize` trait)
//! - Unix file permissions set to 0600 (owner read/write only)
//! - Cryptographically secure random generation via `OsRng`

use anyhow::{bail, Context, Result};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{AeadCore, KeyInit, XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroize;

/// Byte transform with an inverse, applied around the integrity digest.
pub trait SnapshotCipher: Send + Sync {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// The identity transform, used when saves are stored in the clear.
#[derive(Debug, Default)]
pub struct IdentityCipher;

impl SnapshotCipher for IdentityCipher {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// XChaCha20-Poly1305 cipher with a persisted 256-bit key.
///
/// Output framing: `[nonce:24][ciphertext]`, one fresh random nonce per
/// save. In production: prefer a hardware key store or OS keyring.
pub struct XChaChaCipher {
    key_bytes: [u8; 32],
}

impl Drop for XChaChaCipher {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl XChaChaCipher {
    /// Load the key at `path`, generating and persisting a new one if the
    /// file does not exist yet.
    pub async fn from_key_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let key_bytes = if fs::try_exists(path)
            .await
            .with_context(|| format!("checking existence of {}", path.display()))?
        {
            info!(path = %path.display(), "loading existing save-file key");
            let data = fs::read(path)
                .await
                .with_context(|| format!("reading key from {}", path.display()))?;
            if data.len() != 32 {
                warn!(path = %path.display(), found_bytes = data.len(), "invalid key size");
                bail!(
                    "expected 32-byte key at {} but found {} bytes",
                    path.display(),
                    data.len()
                );
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&data);
            arr
        } else {
            info!(path = %path.display(), "generating new save-file key");
            let mut key = [0u8; 32];
            OsRng.fill_bytes(&mut key);

            // Write with restrictive permissions using spawn_blocking for Unix
            #[cfg(unix)]
            {
                let path_buf = path.to_path_buf();
                let key_clone = key;
                tokio::task::spawn_blocking(move || {
                    use std::fs::OpenOptions;
                    use std::io::Write;
                    use std::os::unix::fs::OpenOptionsExt;

                    let mut f = OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(&path_buf)?;
                    f.write_all(&key_clone)?;
                    Ok::<(), anyhow::Error>(())
                })
                .await??;
            }
            #[cfg(not(unix))]
            {
                fs::write(path, &key).await?;
            }

            key
        };

        Ok(Self { key_bytes })
    }

    /// Build a cipher directly from key material (tests, embedded keys).
    pub fn from_key(key_bytes: [u8; 32]) -> Self {
        Self { key_bytes }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        // This is safe because key_bytes is always exactly 32 bytes
        XChaCha20Poly1305::new_from_slice(&self.key_bytes)
            .expect("BUG: key_bytes is always 32 bytes, this should never fail")
    }
}

impl SnapshotCipher for XChaChaCipher {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plain)
            .map_err(|e| anyhow::anyhow!("encryption failed: {}", e))?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 24 {
            bail!("ciphertext too short: {} bytes", data.len());
        }
        let (nonce_bytes, ciphertext) = data.split_at(24);
        let mut nonce_buf = [0u8; 24];
        nonce_buf.copy_from_slice(nonce_bytes);
        #[allow(deprecated)]
        let nonce = XNonce::from_slice(&nonce_buf);

        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cipher() -> XChaChaCipher {
        XChaChaCipher::from_key([0x42u8; 32])
    }

    #[test]
    fn identity_passes_bytes_through() {
        let cipher = IdentityCipher;
        let data = b"plain snapshot bytes";
        assert_eq!(cipher.encrypt(data).expect("encrypt"), data);
        assert_eq!(cipher.decrypt(data).expect("decrypt"), data);
    }

    #[test]
    fn xchacha_round_trip() {
        let cipher = make_cipher();
        let plain = b"{\"version\":1,\"sections\":[]}";

        let enc = cipher.encrypt(plain).expect("encrypt");
        assert_ne!(&enc[24..], plain.as_slice());

        let dec = cipher.decrypt(&enc).expect("decrypt");
        assert_eq!(dec, plain);
    }

    #[test]
    fn xchacha_rejects_tampering() {
        let cipher = make_cipher();
        let mut enc = cipher.encrypt(b"payload").expect("encrypt");
        let last = enc.len() - 1;
        enc[last] ^= 0x01;
        assert!(cipher.decrypt(&enc).is_err());
    }

    #[test]
    fn xchacha_rejects_short_input() {
        let cipher = make_cipher();
        assert!(cipher.decrypt(&[0u8; 10]).is_err());
    }

    #[tokio::test]
    async fn key_file_is_generated_then_reused() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let key_path = tmp.path().join("save.key");

        let first = XChaChaCipher::from_key_file(&key_path).await.expect("generate");
        let second = XChaChaCipher::from_key_file(&key_path).await.expect("reload");

        let enc = first.encrypt(b"data").expect("encrypt");
        assert_eq!(second.decrypt(&enc).expect("decrypt"), b"data");
    }
}
