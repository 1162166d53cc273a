//! Save orchestration.
//!
//! [`SaveManager`] composes the store, provider registry, schema registry,
//! and restore coordinator into the save/load/restore entry points, the
//! autosave loop, and the host lifecycle hooks. Instances are constructed
//! explicitly (no global singleton) so several independent managers can
//! coexist under test.
//!
//! The snapshot is mutated only here, and provider capture/restore calls
//! are issued sequentially from the orchestrating task. Background saves
//! offload only the CPU-bound encode; the destructive file-replace
//! sequence always completes on the orchestrating task.

use crate::config::Config;
use crate::coordinator::{RestoreCoordinator, RestoreReport, RestoreState};
use crate::encryptor::XChaChaCipher;
use crate::integrity::Sha256Integrity;
use crate::provider::{AsSharedProvider, SharedProvider};
use crate::registry::ProviderRegistry;
use crate::schema::SchemaRegistry;
use crate::snapshot::CompositeSnapshot;
use crate::store::AtomicFileStore;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct Inner {
    registry: ProviderRegistry,
    coordinator: RestoreCoordinator,
    snapshot: Option<CompositeSnapshot>,
}

pub struct SaveManager {
    store: Arc<AtomicFileStore>,
    schemas: SchemaRegistry,
    inner: Mutex<Inner>,
    save_gate: AtomicBool,
    loaded_tx: watch::Sender<bool>,
    autosave: std::sync::Mutex<Option<JoinHandle<()>>>,
    autosave_interval: Duration,
}

impl SaveManager {
    /// Build a manager from configuration: SHA-256 integrity when enabled,
    /// XChaCha cipher when a key path is configured.
    pub async fn from_config(cfg: &Config, schemas: SchemaRegistry) -> Result<Self> {
        cfg.validate()?;

        let mut store = AtomicFileStore::new(cfg.save_path());
        if cfg.integrity {
            store = store.with_integrity(Box::new(Sha256Integrity));
        }
        if let Some(key_path) = &cfg.key_path {
            let cipher = XChaChaCipher::from_key_file(key_path)
                .await
                .with_context(|| format!("loading cipher key from {}", key_path))?;
            store = store.with_cipher(Box::new(cipher));
        }

        Ok(Self::new(
            store,
            schemas,
            Duration::from_secs(cfg.autosave_interval_secs),
            cfg.include_providers.clone(),
            cfg.exclude_providers.clone(),
        ))
    }

    /// Build a manager from explicit parts.
    pub fn new(
        store: AtomicFileStore,
        schemas: SchemaRegistry,
        autosave_interval: Duration,
        include_providers: Vec<String>,
        exclude_providers: Vec<String>,
    ) -> Self {
        let (loaded_tx, _) = watch::channel(false);
        Self {
            store: Arc::new(store),
            schemas,
            inner: Mutex::new(Inner {
                registry: ProviderRegistry::new(include_providers, exclude_providers),
                coordinator: RestoreCoordinator::new(),
                snapshot: None,
            }),
            save_gate: AtomicBool::new(false),
            loaded_tx,
            autosave: std::sync::Mutex::new(None),
            autosave_interval,
        }
    }

    /// Register a provider. Returns the restore report when registration
    /// triggered a deferred batch or an individual restore.
    pub async fn register_provider(&self, provider: SharedProvider) -> Option<RestoreReport> {
        let mut guard = self.inner.lock().await;
        let Inner {
            registry,
            coordinator,
            snapshot,
        } = &mut *guard;

        if !registry.register(&provider).await {
            return None;
        }
        coordinator
            .provider_registered(&provider, snapshot.as_ref(), registry, &self.schemas)
            .await
    }

    pub async fn unregister_provider(&self, provider: &impl AsSharedProvider) -> bool {
        let provider = provider.as_shared_provider();
        self.inner.lock().await.registry.unregister(&provider)
    }

    /// Full synchronous-style save: every ready provider is captured.
    pub async fn save(&self) -> Result<()> {
        self.run_save(true).await
    }

    /// Incremental save: dirty-tracking providers are captured only when
    /// dirty; everyone else's sections are carried forward.
    pub async fn save_incremental(&self) -> Result<()> {
        self.run_save(false).await
    }

    async fn run_save(&self, force_all: bool) -> Result<()> {
        let snapshot = self.build_snapshot(force_all).await;
        self.store.write(&snapshot).await?;
        let sections = snapshot.sections.len();
        self.inner.lock().await.snapshot = Some(snapshot);
        info!(sections, force_all, "state saved");
        Ok(())
    }

    async fn build_snapshot(&self, force_all: bool) -> CompositeSnapshot {
        let inner = self.inner.lock().await;
        let sections = inner
            .registry
            .capture_sections(inner.snapshot.as_ref(), force_all)
            .await;
        CompositeSnapshot::new(now_unix(), sections)
    }

    /// Full save with the CPU-bound encode offloaded to a blocking worker.
    ///
    /// Returns `Ok(false)` when another background save is still in
    /// flight: the request is dropped, not queued. The file-replace
    /// sequence itself runs on the calling task either way, so both save
    /// paths produce byte-identical files.
    pub async fn save_in_background(&self) -> Result<bool> {
        if self.save_gate.swap(true, Ordering::SeqCst) {
            warn!("a save is already in flight; dropping this request");
            return Ok(false);
        }

        let result = self.background_save_inner().await;
        self.save_gate.store(false, Ordering::SeqCst);
        result.map(|_| true)
    }

    async fn background_save_inner(&self) -> Result<()> {
        let snapshot = self.build_snapshot(true).await;

        let store = Arc::clone(&self.store);
        let snap = snapshot.clone();
        let payload = tokio::task::spawn_blocking(move || store.encode(&snap))
            .await
            .context("background encode task failed")??;

        self.store.commit(payload).await?;
        let sections = snapshot.sections.len();
        self.inner.lock().await.snapshot = Some(snapshot);
        info!(sections, "background save committed");
        Ok(())
    }

    /// Load the save file. Returns whether a usable snapshot was found;
    /// restoration (immediate or deferred) is handled by the coordinator.
    pub async fn load(&self) -> Result<bool> {
        let loaded = self.store.read().await?;

        let present = {
            let mut guard = self.inner.lock().await;
            let Inner {
                registry,
                coordinator,
                snapshot,
            } = &mut *guard;

            match loaded {
                None => {
                    *snapshot = None;
                    coordinator.note_no_snapshot();
                    false
                }
                Some(snap) => {
                    coordinator
                        .snapshot_loaded(&snap, registry, &self.schemas)
                        .await;
                    *snapshot = Some(snap);
                    true
                }
            }
        };

        // The autosave loop may begin ticking now that the first load
        // attempt has completed, whatever its outcome
        self.loaded_tx.send_replace(true);
        Ok(present)
    }

    /// Manual restore: reset to not-restored and re-apply the in-memory
    /// snapshot, re-entering the deferred path if no providers exist.
    pub async fn restore(&self) -> Option<RestoreReport> {
        let mut guard = self.inner.lock().await;
        let Inner {
            registry,
            coordinator,
            snapshot,
        } = &mut *guard;

        coordinator.reset_for_reload(snapshot.is_some());
        match snapshot.as_ref() {
            Some(snap) => {
                coordinator
                    .snapshot_loaded(snap, registry, &self.schemas)
                    .await
            }
            None => None,
        }
    }

    /// Delete the save file, its backup, and any stale temp file.
    pub async fn delete_save(&self) -> Result<()> {
        self.store.delete().await?;
        let mut guard = self.inner.lock().await;
        guard.snapshot = None;
        guard.coordinator.note_no_snapshot();
        info!("save data deleted");
        Ok(())
    }

    /// Start the autosave loop. It begins ticking only after the first
    /// load attempt has completed, then runs incremental saves.
    pub fn start(self: &Arc<Self>) {
        if self.autosave_interval.is_zero() {
            debug!("autosave disabled by configuration");
            return;
        }

        let weak = Arc::downgrade(self);
        let mut loaded_rx = self.loaded_tx.subscribe();
        let period = self.autosave_interval;

        let handle = tokio::spawn(async move {
            if loaded_rx.wait_for(|done| *done).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                if let Err(e) = manager.save_incremental().await {
                    warn!(error = %e, "autosave failed");
                }
            }
        });

        let mut slot = self
            .autosave
            .lock()
            .expect("autosave handle lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Stop the autosave loop, if running.
    pub fn stop(&self) {
        if let Some(handle) = self
            .autosave
            .lock()
            .expect("autosave handle lock poisoned")
            .take()
        {
            handle.abort();
            debug!("autosave loop stopped");
        }
    }

    /// Host signal: application paused. Saves immediately.
    pub async fn on_pause(&self) -> Result<()> {
        info!("pause signal; saving state");
        self.save().await
    }

    /// Host signal: window focus lost. Saves immediately.
    pub async fn on_focus_lost(&self) -> Result<()> {
        info!("focus lost; saving state");
        self.save().await
    }

    /// Host signal: application quitting. Stops autosave, then saves.
    pub async fn on_quit(&self) -> Result<()> {
        info!("quit signal; stopping autosave and saving state");
        self.stop();
        self.save().await
    }

    pub async fn restore_state(&self) -> RestoreState {
        self.inner.lock().await.coordinator.state()
    }

    pub async fn snapshot(&self) -> Option<CompositeSnapshot> {
        self.inner.lock().await.snapshot.clone()
    }

    pub async fn provider_count(&self) -> usize {
        self.inner.lock().await.registry.count()
    }
}

impl Drop for SaveManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
