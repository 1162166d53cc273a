//! Snapshot data model.
//!
//! A [`CompositeSnapshot`] is the full aggregate of persisted state: a
//! versioned list of [`SectionBlob`]s, one per section owner. Blobs are
//! order-independent and every payload must deserialize without reference
//! to its siblings, so a single bad section never takes down the rest.
//!
//! The snapshot is owned exclusively by the save manager and replaced
//! wholesale on every save pass; blobs are never merged in place.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Snapshot schema version stamped into every save.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One provider's serialized state slice within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBlob {
    /// Stable identifier for one provider's data, unique within a snapshot.
    pub key: String,
    /// Tag identifying the payload's schema for deserialization.
    #[serde(rename = "type")]
    pub schema_tag: String,
    /// Opaque, self-contained serialization of the section payload.
    pub json: String,
}

impl SectionBlob {
    /// Deserialize the payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.json)
            .with_context(|| format!("decoding section '{}' as {}", self.key, self.schema_tag))
    }
}

/// The full aggregate of all sections plus versioning metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSnapshot {
    pub version: u32,
    #[serde(rename = "lastSaveUnixSeconds")]
    pub last_save_unix_seconds: i64,
    pub sections: Vec<SectionBlob>,
}

impl CompositeSnapshot {
    pub fn new(last_save_unix_seconds: i64, sections: Vec<SectionBlob>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            last_save_unix_seconds,
            sections,
        }
    }

    /// Look up a section by key.
    pub fn section(&self, key: &str) -> Option<&SectionBlob> {
        self.sections.iter().find(|s| s.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing snapshot")
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("deserializing snapshot")
    }
}

/// A provider's freshly captured payload, before the registry assigns its
/// section key.
#[derive(Debug, Clone)]
pub struct CapturedSection {
    pub tag: String,
    pub json: String,
}

impl CapturedSection {
    /// Serialize a typed value into a captured section under `tag`.
    pub fn encode<T: Serialize>(tag: impl Into<String>, value: &T) -> Result<Self> {
        let tag = tag.into();
        let json = serde_json::to_string(value)
            .with_context(|| format!("encoding section payload for tag '{}'", tag))?;
        Ok(Self { tag, json })
    }
}
