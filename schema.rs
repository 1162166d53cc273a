//! Explicit schema registry.
//!
//! Every section payload carries a schema tag. The registry maps each tag
//! to a typed decoder that section owners register at startup, so resolving
//! a stored tag is a plain map lookup. Decoders produce type-erased values
//! (`Box<dyn Any + Send>`) that providers downcast in `restore`.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use tracing::{debug, warn};

type DecodeFn = Box<dyn Fn(&str) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// One registered schema: a tag plus its typed decoder.
pub struct SchemaEntry {
    tag: String,
    decode: DecodeFn,
}

impl SchemaEntry {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Deserialize `json` into the registered type, erased behind `Any`.
    pub fn decode(&self, json: &str) -> Result<Box<dyn Any + Send>> {
        (self.decode)(json)
    }
}

/// Registry of known section schemas, keyed by tag.
#[derive(Default)]
pub struct SchemaRegistry {
    entries: HashMap<String, SchemaEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tag` as decoding into `T`. Re-registering a tag replaces
    /// the previous decoder.
    pub fn register<T>(&mut self, tag: impl Into<String>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        if self.entries.contains_key(&tag) {
            warn!(tag = %tag, "schema tag re-registered, replacing previous decoder");
        }
        debug!(tag = %tag, "schema registered");

        let entry_tag = tag.clone();
        let decode: DecodeFn = Box::new(move |json| {
            let value: T = serde_json::from_str(json)
                .with_context(|| format!("decoding payload for schema '{}'", entry_tag))?;
            Ok(Box::new(value) as Box<dyn Any + Send>)
        });

        self.entries.insert(
            tag.clone(),
            SchemaEntry { tag, decode },
        );
    }

    /// Resolve a stored tag to its schema, if known.
    pub fn resolve(&self, tag: &str) -> Option<&SchemaEntry> {
        self.entries.get(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Inventory {
        slots: Vec<u32>,
    }

    #[test]
    fn resolve_and_decode_registered_schema() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Inventory>("Inventory");

        let entry = registry.resolve("Inventory").expect("registered tag");
        let value = entry.decode("{\"slots\":[1,2,3]}").expect("decode");
        let inv = value.downcast::<Inventory>().expect("downcast");
        assert_eq!(*inv, Inventory { slots: vec![1, 2, 3] });
    }

    #[test]
    fn unknown_tag_is_unresolved() {
        let registry = SchemaRegistry::new();
        assert!(registry.resolve("Missing").is_none());
    }

    #[test]
    fn decode_failure_surfaces_error() {
        let mut registry = SchemaRegistry::new();
        registry.register::<Inventory>("Inventory");

        let entry = registry.resolve("Inventory").expect("registered tag");
        assert!(entry.decode("not json").is_err());
    }
}
