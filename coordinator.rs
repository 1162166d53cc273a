//! Deferred-restore coordination.
//!
//! Reconciles "a snapshot was loaded" with "the providers that should
//! consume it have not registered yet". State lives in a single
//! [`RestoreState`] enum; the decisions are pure functions
//! ([`plan_after_load`], [`plan_on_registration`]) so the whole transition
//! table is unit-testable without a filesystem or timer.

use crate::provider::{effective_key, AsSharedProvider, SectionProvider, SharedProvider};
use crate::registry::ProviderRegistry;
use crate::schema::SchemaRegistry;
use crate::snapshot::CompositeSnapshot;
use tracing::{debug, info, warn};

/// Where the engine stands between loading a snapshot and handing its
/// sections to providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    /// No usable snapshot has been loaded.
    NoSnapshot,
    /// A snapshot is in memory but has not been applied yet.
    Loaded,
    /// A snapshot with sections was loaded while zero providers were
    /// registered; restore runs as soon as one shows up. Distinct from
    /// "restored 0 of 0".
    DeferredPending,
    /// The snapshot has been applied to the providers present at the time.
    Restored,
}

/// Decision taken right after a snapshot lands in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// Providers exist: run a full batch restore now.
    BatchRestore,
    /// Sections exist but nobody consumes them yet: wait.
    Defer,
    /// Nothing to restore and nobody waiting: done trivially.
    MarkRestored,
}

pub fn plan_after_load(has_sections: bool, provider_count: usize) -> LoadAction {
    if provider_count > 0 {
        LoadAction::BatchRestore
    } else if has_sections {
        LoadAction::Defer
    } else {
        LoadAction::MarkRestored
    }
}

/// Decision taken when a provider registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationAction {
    /// First registration after a deferred load: restore everyone present.
    BatchRestore,
    /// Restore only the newcomer; earlier providers were already handled.
    SingleRestore,
    Nothing,
}

pub fn plan_on_registration(state: RestoreState) -> RegistrationAction {
    match state {
        RestoreState::DeferredPending => RegistrationAction::BatchRestore,
        RestoreState::Restored => RegistrationAction::SingleRestore,
        RestoreState::NoSnapshot | RestoreState::Loaded => RegistrationAction::Nothing,
    }
}

/// Outcome counters for one restore batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub attempted: usize,
    /// Providers that received real data.
    pub restored: usize,
    /// Providers with no matching section, told to apply defaults.
    pub defaults_applied: usize,
    /// Providers skipped because their section's schema tag is unknown.
    pub skipped: usize,
    /// Providers whose decode or restore call failed.
    pub failed: usize,
}

pub struct RestoreCoordinator {
    state: RestoreState,
}

impl Default for RestoreCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RestoreCoordinator {
    pub fn new() -> Self {
        Self {
            state: RestoreState::NoSnapshot,
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// A load attempt found no usable snapshot.
    pub fn note_no_snapshot(&mut self) {
        self.state = RestoreState::NoSnapshot;
    }

    /// Reset after a manual reload request; restore is re-attempted by the
    /// caller via [`snapshot_loaded`](Self::snapshot_loaded).
    pub fn reset_for_reload(&mut self, has_snapshot: bool) {
        self.state = if has_snapshot {
            RestoreState::Loaded
        } else {
            RestoreState::NoSnapshot
        };
    }

    /// A snapshot just landed in memory: apply it or start waiting.
    pub async fn snapshot_loaded(
        &mut self,
        snapshot: &CompositeSnapshot,
        registry: &ProviderRegistry,
        schemas: &SchemaRegistry,
    ) -> Option<RestoreReport> {
        self.state = RestoreState::Loaded;
        match plan_after_load(!snapshot.is_empty(), registry.count()) {
            LoadAction::BatchRestore => {
                let report = restore_all(snapshot, registry, schemas).await;
                self.state = RestoreState::Restored;
                info!(
                    restored = report.restored,
                    defaults = report.defaults_applied,
                    skipped = report.skipped,
                    failed = report.failed,
                    "snapshot restored"
                );
                Some(report)
            }
            LoadAction::Defer => {
                self.state = RestoreState::DeferredPending;
                info!(
                    sections = snapshot.sections.len(),
                    "snapshot loaded before any providers registered; restore deferred"
                );
                None
            }
            LoadAction::MarkRestored => {
                self.state = RestoreState::Restored;
                debug!("empty snapshot and no providers; nothing to restore");
                None
            }
        }
    }

    /// A provider just registered: finish a deferred restore, or restore
    /// the newcomer individually if the batch already ran.
    pub async fn provider_registered(
        &mut self,
        provider: &impl AsSharedProvider,
        snapshot: Option<&CompositeSnapshot>,
        registry: &ProviderRegistry,
        schemas: &SchemaRegistry,
    ) -> Option<RestoreReport> {
        let provider = provider.as_shared_provider();
        match plan_on_registration(self.state) {
            RegistrationAction::BatchRestore => {
                let snapshot = snapshot?;
                if registry.count() == 0 {
                    return None;
                }
                let report = restore_all(snapshot, registry, schemas).await;
                self.state = RestoreState::Restored;
                info!(
                    providers = registry.count(),
                    restored = report.restored,
                    "deferred restore completed"
                );
                Some(report)
            }
            RegistrationAction::SingleRestore => {
                let snapshot = snapshot?;
                let mut report = RestoreReport::default();
                restore_provider(&provider, snapshot, schemas, &mut report).await;
                Some(report)
            }
            RegistrationAction::Nothing => None,
        }
    }
}

/// Restore every registered provider from `snapshot`, sequentially.
pub async fn restore_all(
    snapshot: &CompositeSnapshot,
    registry: &ProviderRegistry,
    schemas: &SchemaRegistry,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    for provider in registry.providers() {
        restore_provider(provider, snapshot, schemas, &mut report).await;
    }
    report
}

/// Restore one provider. Failures are counted, logged, and contained: a
/// bad section or a panicking decode never aborts the remaining providers.
async fn restore_provider(
    provider: &SharedProvider,
    snapshot: &CompositeSnapshot,
    schemas: &SchemaRegistry,
    report: &mut RestoreReport,
) {
    let mut guard = provider.lock().await;
    let Some(key) = effective_key(&*guard) else {
        return;
    };
    report.attempted += 1;

    // Expected schema: explicit declaration, else the key doubles as a tag
    let expected = guard.schema_tag().unwrap_or_else(|| key.clone());

    let Some(blob) = snapshot.section(&key) else {
        debug!(key = %key, "no section for provider; applying defaults");
        match guard.restore(None) {
            Ok(()) => report.defaults_applied += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "provider failed applying defaults");
                report.failed += 1;
            }
        }
        return;
    };

    let Some(entry) = schemas.resolve(&blob.schema_tag) else {
        warn!(
            key = %key,
            tag = %blob.schema_tag,
            "stored schema tag is unknown; skipping provider"
        );
        report.skipped += 1;
        return;
    };

    if entry.tag() != expected {
        warn!(
            key = %key,
            stored = %entry.tag(),
            declared = %expected,
            "stored schema differs from provider's declared schema; restoring anyway"
        );
    }

    let value = match entry.decode(&blob.json) {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, error = %e, "section payload failed to decode");
            report.failed += 1;
            return;
        }
    };

    match guard.restore(Some(value)) {
        Ok(()) => {
            debug!(key = %key, "provider restored from data");
            report.restored += 1;
        }
        Err(e) => {
            warn!(key = %key, error = %e, "provider restore call failed");
            report.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{shared, SectionProvider};
    use crate::snapshot::{CapturedSection, SectionBlob};
    use anyhow::Result;
    use std::any::Any;

    #[test]
    fn load_plan_covers_every_case() {
        assert_eq!(plan_after_load(true, 0), LoadAction::Defer);
        assert_eq!(plan_after_load(true, 1), LoadAction::BatchRestore);
        assert_eq!(plan_after_load(true, 3), LoadAction::BatchRestore);
        assert_eq!(plan_after_load(false, 0), LoadAction::MarkRestored);
        assert_eq!(plan_after_load(false, 2), LoadAction::BatchRestore);
    }

    #[test]
    fn registration_plan_covers_every_state() {
        assert_eq!(
            plan_on_registration(RestoreState::NoSnapshot),
            RegistrationAction::Nothing
        );
        assert_eq!(
            plan_on_registration(RestoreState::Loaded),
            RegistrationAction::Nothing
        );
        assert_eq!(
            plan_on_registration(RestoreState::DeferredPending),
            RegistrationAction::BatchRestore
        );
        assert_eq!(
            plan_on_registration(RestoreState::Restored),
            RegistrationAction::SingleRestore
        );
    }

    struct Recorder {
        key: String,
        restores_with_data: u32,
        restores_with_none: u32,
        fail_restore: bool,
        last_value: Option<u32>,
    }

    impl Recorder {
        fn new(key: &str) -> Self {
            Self {
                key: key.to_string(),
                restores_with_data: 0,
                restores_with_none: 0,
                fail_restore: false,
                last_value: None,
            }
        }
    }

    impl SectionProvider for Recorder {
        fn schema_tag(&self) -> Option<String> {
            Some(self.key.clone())
        }

        fn capture(&mut self) -> Result<Option<CapturedSection>> {
            Ok(Some(CapturedSection::encode(
                self.key.clone(),
                &self.last_value.unwrap_or(0),
            )?))
        }

        fn restore(&mut self, state: Option<Box<dyn Any + Send>>) -> Result<()> {
            if self.fail_restore {
                anyhow::bail!("restore exploded");
            }
            match state {
                Some(value) => {
                    self.last_value = Some(*value.downcast::<u32>().expect("u32"));
                    self.restores_with_data += 1;
                }
                None => self.restores_with_none += 1,
            }
            Ok(())
        }
    }

    fn snapshot_with(keys: &[(&str, u32)]) -> CompositeSnapshot {
        CompositeSnapshot::new(
            0,
            keys.iter()
                .map(|(key, value)| SectionBlob {
                    key: key.to_string(),
                    schema_tag: key.to_string(),
                    json: value.to_string(),
                })
                .collect(),
        )
    }

    fn schemas_for(keys: &[&str]) -> SchemaRegistry {
        let mut schemas = SchemaRegistry::new();
        for key in keys {
            schemas.register::<u32>(*key);
        }
        schemas
    }

    #[tokio::test]
    async fn load_with_no_providers_defers() {
        let mut coordinator = RestoreCoordinator::new();
        let registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a"]);
        let snapshot = snapshot_with(&[("a", 1)]);

        let report = coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await;

        assert!(report.is_none());
        assert_eq!(coordinator.state(), RestoreState::DeferredPending);
    }

    #[tokio::test]
    async fn deferred_restore_runs_once_per_provider() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a", "b"]);
        let snapshot = snapshot_with(&[("a", 1), ("b", 2)]);

        coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await;
        assert_eq!(coordinator.state(), RestoreState::DeferredPending);

        // First registration flushes the deferred batch
        let a = shared(Recorder::new("a"));
        registry.register(&a).await;
        let report = coordinator
            .provider_registered(&a, Some(&snapshot), &registry, &schemas)
            .await
            .expect("batch ran");
        assert_eq!(report.restored, 1);
        assert_eq!(coordinator.state(), RestoreState::Restored);

        // Later registrations are restored individually, not re-batched
        let b = shared(Recorder::new("b"));
        registry.register(&b).await;
        let report = coordinator
            .provider_registered(&b, Some(&snapshot), &registry, &schemas)
            .await
            .expect("single restore ran");
        assert_eq!(report.restored, 1);

        assert_eq!(a.lock().await.restores_with_data, 1);
        assert_eq!(a.lock().await.last_value, Some(1));
        assert_eq!(b.lock().await.restores_with_data, 1);
        assert_eq!(b.lock().await.last_value, Some(2));
    }

    #[tokio::test]
    async fn load_with_providers_restores_immediately() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a"]);
        let snapshot = snapshot_with(&[("a", 5)]);

        let a = shared(Recorder::new("a"));
        registry.register(&a).await;

        let report = coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await
            .expect("batch ran");

        assert_eq!(report.restored, 1);
        assert_eq!(coordinator.state(), RestoreState::Restored);
        assert_eq!(a.lock().await.last_value, Some(5));
    }

    #[tokio::test]
    async fn missing_section_applies_defaults() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a"]);
        let snapshot = snapshot_with(&[("a", 5)]);

        let orphan = shared(Recorder::new("not-in-snapshot"));
        registry.register(&orphan).await;

        let report = coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await
            .expect("batch ran");

        assert_eq!(report.defaults_applied, 1);
        assert_eq!(orphan.lock().await.restores_with_none, 1);
    }

    #[tokio::test]
    async fn unknown_schema_tag_skips_provider() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        // Registry knows nothing about tag "a"
        let schemas = SchemaRegistry::new();
        let snapshot = snapshot_with(&[("a", 5)]);

        let a = shared(Recorder::new("a"));
        registry.register(&a).await;

        let report = coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await
            .expect("batch ran");

        assert_eq!(report.skipped, 1);
        assert_eq!(a.lock().await.restores_with_data, 0);
        assert_eq!(a.lock().await.restores_with_none, 0);
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_abort_the_batch() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["bad", "good"]);
        let snapshot = snapshot_with(&[("bad", 1), ("good", 2)]);

        let bad = shared({
            let mut p = Recorder::new("bad");
            p.fail_restore = true;
            p
        });
        let good = shared(Recorder::new("good"));
        registry.register(&bad).await;
        registry.register(&good).await;

        let report = coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await
            .expect("batch ran");

        assert_eq!(report.failed, 1);
        assert_eq!(report.restored, 1);
        assert_eq!(good.lock().await.last_value, Some(2));
    }

    #[tokio::test]
    async fn reload_reenters_the_deferred_path() {
        let mut coordinator = RestoreCoordinator::new();
        let registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a"]);
        let snapshot = snapshot_with(&[("a", 1)]);

        coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await;
        assert_eq!(coordinator.state(), RestoreState::DeferredPending);

        coordinator.reset_for_reload(true);
        assert_eq!(coordinator.state(), RestoreState::Loaded);

        coordinator
            .snapshot_loaded(&snapshot, &registry, &schemas)
            .await;
        assert_eq!(coordinator.state(), RestoreState::DeferredPending);
    }

    #[tokio::test]
    async fn registration_with_no_snapshot_does_nothing() {
        let mut coordinator = RestoreCoordinator::new();
        let mut registry = ProviderRegistry::new(vec![], vec![]);
        let schemas = schemas_for(&["a"]);

        let a = shared(Recorder::new("a"));
        registry.register(&a).await;

        let report = coordinator
            .provider_registered(&a, None, &registry, &schemas)
            .await;
        assert!(report.is_none());
        assert_eq!(coordinator.state(), RestoreState::NoSnapshot);
    }
}
