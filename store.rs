//! Atomic on-disk save-file protocol.
//!
//! This module provides [`AtomicFileStore`], the owner of the durable
//! write/read pipeline for a single save path.
//!
//! ## File format (exactly two lines)
//!
//! ```text
//! HASH:<hex-digest-or-NO_HASH>
//! DATA:<base64-encoded-ciphertext>
//! ```
//!
//! ## Write protocol
//!
//! serialize → encrypt → digest over ciphertext → base64 → write to
//! `<main>.tmp` → best-effort copy of the previous main to `<main>.bak` →
//! delete main → rename tmp over main. The rename is the only step that
//! must be atomic at the storage layer; a crash before it leaves the
//! previous main file intact and loadable.
//!
//! ## Read protocol
//!
//! Parse the two-line shape, verify the digest, decrypt, deserialize. Any
//! failure copies the backup over the main path and re-attempts the full
//! read exactly once; if that fails too the result is `None` ("no usable
//! save"). A corrupted main file with a corrupted backup is not
//! recoverable.

use crate::encryptor::{IdentityCipher, SnapshotCipher};
use crate::error::SnapVaultError;
use crate::integrity::{IntegrityGuard, NoopIntegrity};
use crate::snapshot::CompositeSnapshot;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

const HASH_PREFIX: &str = "HASH:";
const DATA_PREFIX: &str = "DATA:";

pub struct AtomicFileStore {
    path: PathBuf,
    integrity: Box<dyn IntegrityGuard>,
    cipher: Box<dyn SnapshotCipher>,
}

impl AtomicFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            integrity: Box::new(NoopIntegrity),
            cipher: Box::new(IdentityCipher),
        }
    }

    pub fn with_integrity(mut self, integrity: Box<dyn IntegrityGuard>) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_cipher(mut self, cipher: Box<dyn SnapshotCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    pub fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(suffix);
        PathBuf::from(os)
    }

    /// CPU-bound half of a save: serialize, encrypt, digest, encode.
    ///
    /// Kept synchronous so the background-save path can run it on a
    /// blocking worker while [`commit`](Self::commit) stays on the
    /// orchestrating task.
    pub fn encode(&self, snapshot: &CompositeSnapshot) -> Result<String> {
        let plain = snapshot.to_json()?;
        let encrypted = self
            .cipher
            .encrypt(plain.as_bytes())
            .map_err(|e| SnapVaultError::cipher(e.to_string()))?;
        let digest = self.integrity.digest(&encrypted);
        let data = BASE64.encode(&encrypted);
        Ok(format!("{HASH_PREFIX}{digest}\n{DATA_PREFIX}{data}"))
    }

    /// Inverse of [`encode`](Self::encode): parse, verify, decrypt,
    /// deserialize.
    pub fn decode(&self, contents: &str) -> Result<CompositeSnapshot> {
        let mut lines = contents.lines();
        let hash_line = lines
            .next()
            .ok_or_else(|| SnapVaultError::format("save file is empty"))?;
        let data_line = lines
            .next()
            .ok_or_else(|| SnapVaultError::format("save file is missing its DATA line"))?;
        if lines.next().is_some() {
            return Err(SnapVaultError::format("save file has trailing content").into());
        }

        let digest = hash_line
            .strip_prefix(HASH_PREFIX)
            .ok_or_else(|| SnapVaultError::format("first line is not a HASH line"))?;
        let data = data_line
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| SnapVaultError::format("second line is not a DATA line"))?;

        let encrypted = BASE64
            .decode(data)
            .map_err(|e| SnapVaultError::format(format!("bad base64 payload: {}", e)))?;

        if !self.integrity.verify(&encrypted, digest) {
            return Err(SnapVaultError::integrity("digest mismatch on DATA payload").into());
        }

        let plain = self
            .cipher
            .decrypt(&encrypted)
            .map_err(|e| SnapVaultError::cipher(e.to_string()))?;
        let text =
            String::from_utf8(plain).map_err(|_| SnapVaultError::format("payload is not UTF-8"))?;
        CompositeSnapshot::from_json(&text)
    }

    /// File-replace half of a save: temp write, backup rotation, atomic
    /// rename. Always runs on the calling task to keep the unsafe window
    /// short.
    pub async fn commit(&self, payload: String) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating storage directory {:?}", parent))?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, payload.as_bytes())
            .await
            .with_context(|| format!("writing temp save file {:?}", tmp))?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            // Previous generation becomes the backup; losing it is survivable
            if let Err(e) = fs::copy(&self.path, self.backup_path()).await {
                warn!(error = %e, "backup copy failed, continuing without a fresh backup");
            }
            if let Err(e) = fs::remove_file(&self.path).await {
                warn!(error = %e, "could not delete previous save file before rename");
            }
        }

        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing save file {:?}", self.path))?;

        debug!(path = %self.path.display(), bytes = payload.len(), "save file committed");
        Ok(())
    }

    /// Full synchronous-style write: encode on the calling task, then
    /// commit. Produces byte-identical files to the background path.
    pub async fn write(&self, snapshot: &CompositeSnapshot) -> Result<()> {
        let payload = self.encode(snapshot)?;
        self.commit(payload).await
    }

    /// Read the save file, falling back to the backup once on any failure.
    ///
    /// `Ok(None)` means "no usable save": either no file was ever written,
    /// or both the main file and its backup are unreadable.
    pub async fn read(&self) -> Result<Option<CompositeSnapshot>> {
        let main_exists = fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking existence of {:?}", self.path))?;
        let backup = self.backup_path();
        let backup_exists = fs::try_exists(&backup).await.unwrap_or(false);

        if !main_exists && !backup_exists {
            debug!(path = %self.path.display(), "no save file present, fresh state");
            return Ok(None);
        }

        match self.try_read_main().await {
            Ok(snapshot) => {
                info!(
                    path = %self.path.display(),
                    sections = snapshot.sections.len(),
                    "save file loaded"
                );
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!(error = %e, "save file unreadable, attempting backup fallback");

                if !backup_exists {
                    warn!("no backup file available; treating as no usable save");
                    return Ok(None);
                }

                if let Err(copy_err) = fs::copy(&backup, &self.path).await {
                    error!(error = %copy_err, "restoring backup over main path failed");
                    return Ok(None);
                }

                match self.try_read_main().await {
                    Ok(snapshot) => {
                        info!(
                            sections = snapshot.sections.len(),
                            "save restored from backup file"
                        );
                        Ok(Some(snapshot))
                    }
                    Err(e2) => {
                        error!(error = %e2, "backup also unreadable; no usable save");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn try_read_main(&self) -> Result<CompositeSnapshot> {
        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {:?}", self.path))?;
        self.decode(&contents)
    }

    /// Delete the save file plus its backup and temp siblings.
    pub async fn delete(&self) -> Result<()> {
        for path in [self.path.clone(), self.backup_path(), self.temp_path()] {
            if fs::try_exists(&path).await.unwrap_or(false) {
                fs::remove_file(&path)
                    .await
                    .with_context(|| format!("deleting {:?}", path))?;
                debug!(path = %path.display(), "save artifact deleted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::Sha256Integrity;
    use crate::snapshot::SectionBlob;
    use tempfile::TempDir;

    fn sample_snapshot() -> CompositeSnapshot {
        CompositeSnapshot::new(
            1_700_000_000,
            vec![SectionBlob {
                key: "Inventory".into(),
                schema_tag: "Inventory".into(),
                json: "{\"slots\":[{\"id\":1,\"count\":5}]}".into(),
            }],
        )
    }

    fn store_at(dir: &TempDir) -> AtomicFileStore {
        AtomicFileStore::new(dir.path().join("snapshot.sav"))
            .with_integrity(Box::new(Sha256Integrity))
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        store.write(&sample_snapshot()).await.expect("write");
        let back = store.read().await.expect("read").expect("snapshot present");

        assert_eq!(back.sections, sample_snapshot().sections);
    }

    #[tokio::test]
    async fn file_has_two_header_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        store.write(&sample_snapshot()).await.expect("write");
        let raw = std::fs::read_to_string(store.path()).expect("raw read");
        let lines: Vec<&str> = raw.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("HASH:"));
        assert!(lines[1].starts_with("DATA:"));
    }

    #[tokio::test]
    async fn missing_file_is_fresh_state() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        assert!(store.read().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn corrupted_data_falls_back_to_backup() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        // Two writes so the first generation lands in the backup
        store.write(&sample_snapshot()).await.expect("first write");
        store.write(&sample_snapshot()).await.expect("second write");
        assert!(store.backup_path().exists());

        // Flip one byte inside the DATA line
        let mut raw = std::fs::read(store.path()).expect("raw read");
        let data_offset = raw.iter().position(|&b| b == b'\n').expect("newline") + 6;
        raw[data_offset] ^= 0x01;
        std::fs::write(store.path(), &raw).expect("corrupt write");

        let back = store.read().await.expect("read").expect("backup restored");
        assert_eq!(back.sections, sample_snapshot().sections);
    }

    #[tokio::test]
    async fn corruption_without_backup_yields_none() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        store.write(&sample_snapshot()).await.expect("write");
        assert!(!store.backup_path().exists());

        let mut raw = std::fs::read(store.path()).expect("raw read");
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        std::fs::write(store.path(), &raw).expect("corrupt write");

        // Never the corrupted payload, never an error: just no usable save
        assert!(store.read().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn stale_temp_file_does_not_shadow_main() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        store.write(&sample_snapshot()).await.expect("write");
        // Simulate a crash after the temp write but before the rename
        std::fs::write(store.temp_path(), b"half-written garbage").expect("temp write");

        let back = store.read().await.expect("read").expect("main intact");
        assert_eq!(back.sections, sample_snapshot().sections);
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        std::fs::create_dir_all(tmp.path()).expect("dir");
        std::fs::write(store.path(), "not a save file at all").expect("write");
        assert!(store.read().await.expect("read").is_none());

        assert!(store.decode("HASH:abc").is_err());
        assert!(store.decode("HASH:abc\nDATA:!!!").is_err());
        assert!(store.decode("HASH:abc\nDATA:aGk=\nextra").is_err());
    }

    #[tokio::test]
    async fn no_hash_file_loads_under_enabled_guard() {
        let tmp = TempDir::new().expect("tempdir");

        // Written with hashing disabled
        let plain_store = AtomicFileStore::new(tmp.path().join("snapshot.sav"));
        plain_store.write(&sample_snapshot()).await.expect("write");

        // Read with hashing enabled: the NO_HASH marker skips verification
        let checked_store = store_at(&tmp);
        let back = checked_store
            .read()
            .await
            .expect("read")
            .expect("snapshot present");
        assert_eq!(back.sections, sample_snapshot().sections);
    }

    #[tokio::test]
    async fn delete_removes_all_artifacts() {
        let tmp = TempDir::new().expect("tempdir");
        let store = store_at(&tmp);

        store.write(&sample_snapshot()).await.expect("first write");
        store.write(&sample_snapshot()).await.expect("second write");
        std::fs::write(store.temp_path(), b"leftover").expect("temp write");

        store.delete().await.expect("delete");
        assert!(!store.path().exists());
        assert!(!store.backup_path().exists());
        assert!(!store.temp_path().exists());
    }
}
