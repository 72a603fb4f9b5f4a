//! Shared test helpers for engine integration tests
//!
//! Provides a temporary store wired to the real file store adapter, plus
//! doubles for the notification, confirmation and event handler ports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sidekeep_core::config::{Config, ConfigBuilder};
use sidekeep_core::domain::{OrphanBatch, StorePath};
use sidekeep_core::ports::{INotificationService, IOrphanConfirmation, Notification};
use sidekeep_core::{PathRules, RelationshipIndex, SharedIndex};
use sidekeep_sync::{EventOutcome, EventReconciler, IStoreEventHandler, LocalFileStore};
use tempfile::TempDir;

pub fn p(s: &str) -> StorePath {
    StorePath::new(s).unwrap()
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notification>>,
    refreshes: AtomicUsize,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notification> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, category: &str) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.category == category)
            .count()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl INotificationService for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.notices.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn refresh_view(&self) -> anyhow::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// ScriptedConfirmation
// ============================================================================

/// Approves a fixed answer and records every batch it was shown
pub struct ScriptedConfirmation {
    answer: Answer,
    batches: Mutex<Vec<OrphanBatch>>,
}

enum Answer {
    All,
    Nothing,
    These(Vec<StorePath>),
}

impl ScriptedConfirmation {
    pub fn approve_all() -> Self {
        Self::with(Answer::All)
    }

    pub fn decline_all() -> Self {
        Self::with(Answer::Nothing)
    }

    pub fn approve(paths: &[&str]) -> Self {
        Self::with(Answer::These(paths.iter().map(|s| p(s)).collect()))
    }

    fn with(answer: Answer) -> Self {
        Self {
            answer,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<OrphanBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IOrphanConfirmation for ScriptedConfirmation {
    async fn confirm_orphans(&self, batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(match &self.answer {
            Answer::All => batch.iter().map(|o| o.derivative.clone()).collect(),
            Answer::Nothing => Vec::new(),
            Answer::These(paths) => paths.clone(),
        })
    }
}

// ============================================================================
// RecordingHandler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Created(StorePath),
    Deleted(StorePath),
    Renamed(StorePath, StorePath),
}

/// Event handler that only records what it was given
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Handled>>,
    sweeps: AtomicUsize,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Handled> {
        self.events.lock().unwrap().clone()
    }

    pub fn renamed(&self) -> usize {
        self.count(|e| matches!(e, Handled::Renamed(..)))
    }

    pub fn created(&self) -> usize {
        self.count(|e| matches!(e, Handled::Created(_)))
    }

    pub fn deleted(&self) -> usize {
        self.count(|e| matches!(e, Handled::Deleted(_)))
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }

    fn count(&self, f: impl Fn(&Handled) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| f(e)).count()
    }
}

#[async_trait::async_trait]
impl IStoreEventHandler for RecordingHandler {
    async fn handle_created(&self, path: &StorePath) -> EventOutcome {
        self.events.lock().unwrap().push(Handled::Created(path.clone()));
        EventOutcome::default()
    }

    async fn handle_deleted(&self, path: &StorePath) -> EventOutcome {
        self.events.lock().unwrap().push(Handled::Deleted(path.clone()));
        EventOutcome::default()
    }

    async fn handle_renamed(&self, old: &StorePath, new: &StorePath) -> EventOutcome {
        self.events
            .lock()
            .unwrap()
            .push(Handled::Renamed(old.clone(), new.clone()));
        EventOutcome::default()
    }

    fn sweep(&self, _now: Instant) {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A temporary store with engine collaborators wired together
pub struct Harness {
    _dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
    pub store: Arc<LocalFileStore>,
    pub rules: Arc<PathRules>,
    pub index: SharedIndex,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Monitors `png` and `pdf`, previews as `png`
    pub fn new() -> Self {
        Self::with_config(|b| b)
    }

    pub fn with_config(customize: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(dir.path()).expect("canonicalize");
        let builder = ConfigBuilder::new()
            .store_root(root.clone())
            .extensions(["png", "pdf"])
            .preview_extensions(["png"])
            .refresh_debounce_ms(5)
            .correlation_window_ms(200);
        let config = customize(builder).build();

        Self {
            _dir: dir,
            store: Arc::new(LocalFileStore::new(root.clone())),
            rules: Arc::new(PathRules::from_config(&config)),
            index: RelationshipIndex::shared(),
            notifier: Arc::new(RecordingNotifier::default()),
            root,
            config,
        }
    }

    pub fn reconciler(&self) -> EventReconciler {
        EventReconciler::from_config(
            &self.config,
            self.store.clone(),
            self.rules.clone(),
            self.index.clone(),
            self.notifier.clone(),
        )
    }

    /// Index every derivative currently on disk
    pub async fn build_index(&self) {
        let files = sidekeep_core::ports::IFileStore::list_all_files(self.store.as_ref())
            .await
            .unwrap();
        self.index.write().await.build_initial(files.iter(), &self.rules);
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        p(rel).to_absolute(&self.root)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let abs = self.abs(rel);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(abs, content).unwrap();
    }

    pub fn mkdir(&self, rel: &str) {
        std::fs::create_dir_all(self.abs(rel)).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.abs(rel)).unwrap()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.abs(rel).exists()
    }

    /// Move on disk, as the host or the user would before an event fires
    pub fn mv(&self, from: &str, to: &str) {
        let target = self.abs(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::rename(self.abs(from), target).unwrap();
    }

    pub fn rm(&self, rel: &str) {
        std::fs::remove_file(self.abs(rel)).unwrap();
    }

    pub fn in_trash(&self, rel: &str) -> bool {
        self.root.join(".trash").join(rel).exists()
    }
}
