//! Provider registry and capture pass.
//!
//! Tracks registered section providers, applies include/exclude filters,
//! and implements dirty-based incremental selection. Capture calls are
//! issued sequentially; no provider API is assumed reentrant.

use crate::provider::{effective_key, AsSharedProvider, SectionProvider, SharedProvider};
use crate::snapshot::{CompositeSnapshot, SectionBlob};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ProviderRegistry {
    providers: Vec<SharedProvider>,
    /// Allow-list of provider type names; non-empty overrides the deny list.
    include: Vec<String>,
    /// Deny-list of provider type names.
    exclude: Vec<String>,
}

impl ProviderRegistry {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            providers: Vec::new(),
            include,
            exclude,
        }
    }

    pub fn providers(&self) -> &[SharedProvider] {
        &self.providers
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }

    pub fn is_registered(&self, provider: &SharedProvider) -> bool {
        self.providers.iter().any(|p| Arc::ptr_eq(p, provider))
    }

    /// Register a provider. Returns `false` without side effects when the
    /// same instance is already registered, when the filters reject the
    /// provider's type name, or when the provider declares neither a
    /// section key nor a schema tag.
    pub async fn register(&mut self, provider: &impl AsSharedProvider) -> bool {
        let provider = provider.as_shared_provider();
        if self.is_registered(&provider) {
            debug!("provider already registered, ignoring");
            return false;
        }

        let (name, key) = {
            let guard = provider.lock().await;
            (guard.provider_name(), effective_key(&*guard))
        };

        if !self.allows(name) {
            debug!(provider = name, "provider filtered out by include/exclude lists");
            return false;
        }

        let Some(key) = key else {
            warn!(
                provider = name,
                "provider declares neither a section key nor a schema tag; not registered"
            );
            return false;
        };

        info!(provider = name, key = %key, "provider registered");
        self.providers.push(Arc::clone(&provider));
        true
    }

    /// Unregister a provider by reference identity.
    pub fn unregister(&mut self, provider: &SharedProvider) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| !Arc::ptr_eq(p, provider));
        let removed = self.providers.len() != before;
        if removed {
            debug!("provider unregistered");
        }
        removed
    }

    fn allows(&self, name: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|n| n == name);
        }
        !self.exclude.iter().any(|n| n == name)
    }

    /// Run a capture pass over every registered provider, sequentially.
    ///
    /// A full pass (`force_all`) captures every ready provider; an
    /// incremental pass skips providers whose dirty flag is `false`.
    /// Sections belonging to skipped or not-ready providers, and sections
    /// whose owner is not currently registered, are carried forward from
    /// `previous`. `clear_dirty` runs exactly once on each provider whose
    /// capture succeeded.
    pub async fn capture_sections(
        &self,
        previous: Option<&CompositeSnapshot>,
        force_all: bool,
    ) -> Vec<SectionBlob> {
        let mut sections: Vec<SectionBlob> = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut captured_ok: Vec<SharedProvider> = Vec::new();

        for provider in &self.providers {
            let mut guard = provider.lock().await;
            let Some(key) = effective_key(&*guard) else {
                continue;
            };

            if !claimed.insert(key.clone()) {
                warn!(key = %key, "duplicate section key; keeping the first provider's data");
                continue;
            }

            if !guard.ready() {
                debug!(key = %key, "provider not ready, carrying previous section forward");
                carry_forward(previous, &key, &mut sections);
                continue;
            }

            let selected = force_all || guard.dirty().unwrap_or(true);
            if !selected {
                debug!(key = %key, "provider clean, carrying previous section forward");
                carry_forward(previous, &key, &mut sections);
                continue;
            }

            match guard.capture() {
                Ok(Some(captured)) => {
                    debug!(key = %key, tag = %captured.tag, "section captured");
                    sections.push(SectionBlob {
                        key,
                        schema_tag: captured.tag,
                        json: captured.json,
                    });
                    captured_ok.push(Arc::clone(provider));
                }
                Ok(None) => {
                    // Nothing to persist this cycle: the key is omitted,
                    // not zero-filled
                    debug!(key = %key, "provider captured nothing this cycle");
                    captured_ok.push(Arc::clone(provider));
                }
                Err(e) => {
                    warn!(
                        key = %key,
                        error = %e,
                        "provider capture failed; keeping its previous section"
                    );
                    carry_forward(previous, &key, &mut sections);
                }
            }
        }

        // Sections whose owner has not (re-)registered yet survive the save
        if let Some(prev) = previous {
            for blob in &prev.sections {
                if !claimed.contains(&blob.key) {
                    debug!(key = %blob.key, "carrying forward section with no registered provider");
                    sections.push(blob.clone());
                }
            }
        }

        for provider in captured_ok {
            provider.lock().await.clear_dirty();
        }

        sections
    }
}

fn carry_forward(
    previous: Option<&CompositeSnapshot>,
    key: &str,
    sections: &mut Vec<SectionBlob>,
) {
    if let Some(blob) = previous.and_then(|p| p.section(key)) {
        sections.push(blob.clone());
    }
}
