//! Section provider capability trait.
//!
//! A provider is an external module owning one section's data. The host
//! application creates and destroys providers; the engine only registers
//! references to them and issues capture/restore calls sequentially, one
//! at a time, from the orchestrating task.

use crate::snapshot::CapturedSection;
use anyhow::Result;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle under which providers are registered. Registration is
/// idempotent by reference identity (`Arc::ptr_eq`).
pub type SharedProvider = Arc<Mutex<dyn SectionProvider>>;

/// Anything that can be viewed as a [`SharedProvider`]. Lets the
/// registration APIs accept both a type-erased `Arc<Mutex<dyn
/// SectionProvider>>` and a concrete `Arc<Mutex<P>>` handle (as returned
/// by [`shared`]) without forcing callers to erase the type at the call
/// site. The produced handle shares the same allocation, so `Arc::ptr_eq`
/// identity is preserved.
pub trait AsSharedProvider {
    fn as_shared_provider(&self) -> SharedProvider;
}

impl AsSharedProvider for SharedProvider {
    fn as_shared_provider(&self) -> SharedProvider {
        Arc::clone(self)
    }
}

impl<P: SectionProvider + 'static> AsSharedProvider for Arc<Mutex<P>> {
    fn as_shared_provider(&self) -> SharedProvider {
        Arc::clone(self) as SharedProvider
    }
}

pub trait SectionProvider: Send {
    /// Whether the provider can capture or restore right now.
    fn ready(&self) -> bool {
        true
    }

    /// Explicit section key override. When absent, the declared schema tag
    /// doubles as the key.
    fn section_key(&self) -> Option<String> {
        None
    }

    /// The schema tag this provider expects its payload under.
    fn schema_tag(&self) -> Option<String> {
        None
    }

    /// Dirty tracking. `None` means the provider does not track dirtiness
    /// and is always captured in an incremental pass; `Some(flag)` opts in.
    fn dirty(&self) -> Option<bool> {
        None
    }

    /// Invoked exactly once after this provider is included in a
    /// successful capture pass.
    fn clear_dirty(&mut self) {}

    /// Full type name, matched against the include/exclude filters.
    /// The default resolves to the implementing type's path.
    fn provider_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capture the current state slice. `Ok(None)` means "nothing to
    /// persist this cycle": the section key is omitted from the new
    /// snapshot, not zero-filled.
    fn capture(&mut self) -> Result<Option<CapturedSection>>;

    /// Apply restored state. `None` means no saved data exists for this
    /// section: apply defaults.
    fn restore(&mut self, state: Option<Box<dyn Any + Send>>) -> Result<()>;
}

/// Derive the section key for a provider: its declared key, else its
/// declared schema tag.
pub fn effective_key(provider: &dyn SectionProvider) -> Option<String> {
    provider.section_key().or_else(|| provider.schema_tag())
}

/// Wrap a provider for registration. Returns a concrete handle so the
/// caller keeps access to the provider's own type; registration accepts it
/// through [`AsSharedProvider`].
pub fn shared<P: SectionProvider + 'static>(provider: P) -> Arc<Mutex<P>> {
    Arc::new(Mutex::new(provider))
}
