//! # SnapVault - Sectioned State Persistence
//!
//! SnapVault snapshots an application's state, split across
//! independently-owned sections, to durable storage and restores it later,
//! tolerating partial writes, corruption, and sections whose owners have
//! not registered yet when a load occurs.
//!
//! ## Features
//!
//! - **Atomic writes**: temp-file-then-rename, with backup rotation
//! - **Integrity checking**: SHA-256 digest over the stored payload
//! - **Optional encryption**: XChaCha20-Poly1305 with a managed key file
//! - **Incremental saves**: dirty-tracking providers skip clean sections
//! - **Deferred restore**: snapshots loaded before providers exist are
//!   applied as soon as the first provider registers
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapvault::{config::Config, manager::SaveManager, schema::SchemaRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config::new("./saves", "game.sav");
//!     let mut schemas = SchemaRegistry::new();
//!     schemas.register::<serde_json::Value>("Settings");
//!
//!     let manager = std::sync::Arc::new(SaveManager::from_config(&cfg, schemas).await?);
//!     manager.load().await?;
//!     manager.start(); // autosave begins after the first load attempt
//!
//!     // ... register providers, play, save ...
//!     manager.on_quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## File Format
//!
//! Saves are exactly two lines: `HASH:<hex-digest-or-NO_HASH>` followed by
//! `DATA:<base64-ciphertext>`. A `.bak` sibling keeps the previous
//! generation; a `.tmp` sibling exists only mid-write.

pub mod config;
pub mod coordinator;
pub mod encryptor;
pub mod error;
pub mod integrity;
pub mod manager;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export common types for convenience
pub use error::SnapVaultError;
