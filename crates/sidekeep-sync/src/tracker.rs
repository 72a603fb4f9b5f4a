//! External change tracker
//!
//! Turns raw add / unlink notifications from the OS watcher into the
//! Created / Deleted / Renamed events the reconciler understands.
//!
//! The OS reports a move as an unlink followed by an add. Every tracked file
//! is registered with its stable identity (inode); an unlink leaves a
//! [`PendingRenameTrace`] keyed by that identity, and an add with a matching
//! identity inside the correlation window becomes a single rename. Traces
//! that expire are delivered as deletes.
//!
//! Folder moves are correlated through the files they contain: an unlink of
//! an untracked path that has tracked children is remembered as a pending
//! folder, and a later add of a folder holding those children under the
//! same identities is forwarded as one folder rename.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sidekeep_core::config::Config;
use sidekeep_core::domain::StorePath;
use sidekeep_core::ports::{IFileStore, IIdentityRepository};
use sidekeep_core::PathRules;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::reconciler::IStoreEventHandler;
use crate::watcher::RawChange;
use crate::SyncError;

/// Shortest sweep interval
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// An unlinked file waiting to be matched by an add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRenameTrace {
    pub identity: u64,
    pub old_path: StorePath,
    pub recorded_at: Instant,
}

/// What the tracker made of one raw notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Filtered, unknown, or already up to date
    Ignored,
    /// A new file was registered
    Registered,
    /// Add matched a pending unlink; forwarded as a rename
    Renamed { from: StorePath, to: StorePath },
    /// Unlink recorded; delivered as rename or delete later
    Pending,
    /// An added folder matched no pending unlink; its files were registered
    FolderRegistered { files: usize },
}

/// Counts from [`ExternalChangeTracker::rebuild`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Entries whose persisted identity still matches
    pub kept: usize,
    /// Files not in the persisted map, or with a new identity
    pub added: usize,
    /// Persisted entries whose file is gone
    pub removed: usize,
}

pub struct ExternalChangeTracker {
    root: PathBuf,
    store: Arc<dyn IFileStore>,
    rules: Arc<PathRules>,
    repository: Arc<dyn IIdentityRepository>,
    handler: Arc<dyn IStoreEventHandler>,
    identities: DashMap<StorePath, u64>,
    by_identity: DashMap<u64, StorePath>,
    pending: DashMap<u64, PendingRenameTrace>,
    /// Untracked paths unlinked while holding tracked files
    pending_dirs: DashMap<StorePath, Instant>,
    correlation_window: Duration,
    forward_creates: bool,
}

impl ExternalChangeTracker {
    pub fn new(
        config: &Config,
        store: Arc<dyn IFileStore>,
        rules: Arc<PathRules>,
        repository: Arc<dyn IIdentityRepository>,
        handler: Arc<dyn IStoreEventHandler>,
    ) -> Self {
        Self {
            root: config.store.root.clone(),
            store,
            rules,
            repository,
            handler,
            identities: DashMap::new(),
            by_identity: DashMap::new(),
            pending: DashMap::new(),
            pending_dirs: DashMap::new(),
            correlation_window: config.timing.correlation_window(),
            forward_creates: config.external.forward_creates,
        }
    }

    /// Number of tracked files
    pub fn tracked(&self) -> usize {
        self.identities.len()
    }

    /// Identity registered for `path`
    pub fn identity_of(&self, path: &StorePath) -> Option<u64> {
        self.identities.get(path).map(|id| *id)
    }

    /// Number of unlinks waiting for a matching add
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Hidden and denied paths are never tracked
    fn is_filtered(&self, path: &StorePath) -> bool {
        path.is_hidden() || self.rules.is_denied(path)
    }

    // ========================================================================
    // Rebuild
    // ========================================================================

    /// Re-register every file in the store and persist the fresh map
    ///
    /// # Errors
    /// Fails if the store cannot be listed or the map cannot be persisted.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn rebuild(&self) -> Result<RebuildStats, SyncError> {
        let persisted = self.repository.load_all().await?;
        let files = self.store.list_all_files().await?;

        self.identities.clear();
        self.by_identity.clear();
        self.pending.clear();
        self.pending_dirs.clear();

        let mut current: HashMap<PathBuf, u64> = HashMap::with_capacity(files.len());
        for path in files.iter().filter(|p| !self.is_filtered(p)) {
            match self.store.stat(path).await {
                Ok(state) if state.is_regular_file() => {
                    if let Some(identity) = state.identity {
                        self.register(path, identity);
                        current.insert(self.store.absolute_path(path), identity);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path, error = %e, "Failed to stat file during rebuild"),
            }
        }

        let mut stats = RebuildStats::default();
        for (abs, identity) in &current {
            if persisted.get(abs) == Some(identity) {
                stats.kept += 1;
            } else {
                stats.added += 1;
            }
        }
        stats.removed = persisted
            .keys()
            .filter(|p| !current.contains_key(*p))
            .count();

        self.repository.replace_all(&current).await?;

        info!(
            tracked = current.len(),
            kept = stats.kept,
            added = stats.added,
            removed = stats.removed,
            "Identity map rebuilt"
        );
        Ok(stats)
    }

    // ========================================================================
    // Raw notifications
    // ========================================================================

    /// Route one raw notification, forwarding creates if configured
    pub async fn handle_change(&self, change: RawChange) -> TrackerOutcome {
        match change {
            RawChange::Added(path) => {
                let outcome = self.on_add(&path).await;
                if outcome == TrackerOutcome::Registered && self.forward_creates {
                    self.handler.handle_created(&path).await;
                }
                outcome
            }
            RawChange::Removed(path) => self.on_unlink(&path).await,
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    pub async fn on_add(&self, path: &StorePath) -> TrackerOutcome {
        if self.is_filtered(path) {
            return TrackerOutcome::Ignored;
        }

        let state = match self.store.stat(path).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Failed to stat added path");
                return TrackerOutcome::Ignored;
            }
        };
        if state.is_directory() {
            return self.on_add_folder(path).await;
        }
        let Some(identity) = state.identity.filter(|_| state.is_regular_file()) else {
            return TrackerOutcome::Ignored;
        };
        self.on_add_file(path, identity).await
    }

    /// Register an added file, correlating it with a pending unlink
    async fn on_add_file(&self, path: &StorePath, identity: u64) -> TrackerOutcome {
        if self.identities.get(path).is_some_and(|id| *id == identity) {
            return TrackerOutcome::Ignored;
        }

        let from = match self.pending.remove(&identity) {
            Some((_, trace)) if trace.recorded_at.elapsed() <= self.correlation_window => {
                Some(trace.old_path)
            }
            Some((_, trace)) => {
                debug!(old = %trace.old_path, "Trace expired before its add arrived");
                self.handler.handle_deleted(&trace.old_path).await;
                None
            }
            None => self.moved_registration(identity, path).await,
        };

        if let Some(old) = &from {
            if self.unregister(old).is_some() {
                self.forget(old).await;
            }
        }
        self.register(path, identity);
        self.persist(path, identity).await;

        match from {
            Some(old) if old != *path => {
                info!(from = %old, to = %path, "Correlated external rename");
                self.handler.handle_renamed(&old, path).await;
                TrackerOutcome::Renamed {
                    from: old,
                    to: path.clone(),
                }
            }
            _ => TrackerOutcome::Registered,
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    pub async fn on_unlink(&self, path: &StorePath) -> TrackerOutcome {
        if self.is_filtered(path) {
            return TrackerOutcome::Ignored;
        }

        if let Some(identity) = self.unregister(path) {
            self.forget(path).await;
            self.record_trace(path.clone(), identity);
            return TrackerOutcome::Pending;
        }

        let children: Vec<(StorePath, u64)> = self
            .identities
            .iter()
            .filter(|e| e.key().is_within(path.as_str()))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if children.is_empty() {
            return TrackerOutcome::Ignored;
        }

        debug!(children = children.len(), "Folder unlinked");
        for (child, identity) in children {
            self.unregister(&child);
            self.forget(&child).await;
            self.record_trace(child, identity);
        }
        self.pending_dirs.insert(path.clone(), Instant::now());
        TrackerOutcome::Pending
    }

    /// Match a newly added folder against pending folder unlinks, or
    /// register its files when nothing matches
    async fn on_add_folder(&self, new_dir: &StorePath) -> TrackerOutcome {
        let candidates: Vec<StorePath> = self
            .pending_dirs
            .iter()
            .filter(|e| e.value().elapsed() <= self.correlation_window)
            .map(|e| e.key().clone())
            .collect();

        for old_dir in candidates {
            let traces: Vec<PendingRenameTrace> = self
                .pending
                .iter()
                .filter(|e| e.value().old_path.is_within(old_dir.as_str()))
                .map(|e| e.value().clone())
                .collect();

            let mut matched = Vec::new();
            for trace in traces {
                let Some(moved) = trace.old_path.rebase(&old_dir, new_dir) else {
                    continue;
                };
                if let Ok(state) = self.store.stat(&moved).await {
                    if state.identity == Some(trace.identity) {
                        matched.push((trace.identity, moved));
                    }
                }
            }
            if matched.is_empty() {
                continue;
            }

            self.pending_dirs.remove(&old_dir);
            for (identity, moved) in matched {
                self.pending.remove(&identity);
                self.register(&moved, identity);
                self.persist(&moved, identity).await;
            }

            info!(from = %old_dir, to = %new_dir, "Correlated external folder rename");
            self.handler.handle_renamed(&old_dir, new_dir).await;
            self.register_folder_files(new_dir).await;
            return TrackerOutcome::Renamed {
                from: old_dir,
                to: new_dir.clone(),
            };
        }

        match self.register_folder_files(new_dir).await {
            0 => TrackerOutcome::Ignored,
            files => {
                info!(folder = %new_dir, files, "Registered files of added folder");
                TrackerOutcome::FolderRegistered { files }
            }
        }
    }

    /// Register every untracked file below `dir`
    ///
    /// Covers folders moved or copied in from outside the store, whose
    /// files get no add notification of their own. Returns the number of
    /// files registered or correlated.
    async fn register_folder_files(&self, dir: &StorePath) -> usize {
        let files = match self.store.list_files_in(dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(folder = %dir, error = %e, "Failed to list added folder");
                return 0;
            }
        };

        let mut count = 0;
        for path in files.iter().filter(|p| !self.is_filtered(p)) {
            let identity = match self.store.stat(path).await {
                Ok(state) if state.is_regular_file() => state.identity,
                _ => None,
            };
            let Some(identity) = identity else {
                continue;
            };
            match self.on_add_file(path, identity).await {
                TrackerOutcome::Registered => {
                    if self.forward_creates {
                        self.handler.handle_created(path).await;
                    }
                    count += 1;
                }
                TrackerOutcome::Renamed { .. } => count += 1,
                _ => {}
            }
        }
        count
    }

    /// An add whose identity is still registered elsewhere, with that path
    /// gone, is a rename whose unlink has not arrived yet
    async fn moved_registration(&self, identity: u64, path: &StorePath) -> Option<StorePath> {
        let other = self
            .by_identity
            .get(&identity)
            .map(|p| p.clone())
            .filter(|p| p != path)?;
        match self.store.stat(&other).await {
            Ok(state) if !state.exists => Some(other),
            _ => None,
        }
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    /// Deliver expired traces as deletes, then sweep the handler
    ///
    /// Returns the number of traces delivered.
    pub async fn sweep(&self, now: Instant) -> usize {
        let window = self.correlation_window;
        let expired: Vec<PendingRenameTrace> = self
            .pending
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().recorded_at) > window)
            .map(|e| e.value().clone())
            .collect();
        for trace in &expired {
            self.pending.remove(&trace.identity);
        }
        self.pending_dirs
            .retain(|_, at| now.saturating_duration_since(*at) <= window);

        for trace in &expired {
            debug!(path = %trace.old_path, "Unmatched unlink, delivering delete");
            self.handler.handle_deleted(&trace.old_path).await;
        }

        self.handler.sweep(now);
        expired.len()
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Consume raw notifications until cancelled or the channel closes
    pub async fn run(&self, mut rx: mpsc::Receiver<RawChange>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.correlation_window.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tracked = self.tracked(),
            window_ms = self.correlation_window.as_millis() as u64,
            "External change tracker started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping tracker");
                    break;
                }
                change = rx.recv() => {
                    match change {
                        Some(change) => {
                            self.handle_change(change).await;
                        }
                        None => {
                            warn!("Watcher channel closed, stopping tracker");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.sweep(Instant::now()).await;
                }
            }
        }
    }

    // ========================================================================
    // Registration helpers
    // ========================================================================

    fn register(&self, path: &StorePath, identity: u64) {
        if let Some(previous) = self.identities.insert(path.clone(), identity) {
            if previous != identity {
                self.by_identity.remove_if(&previous, |_, p| p == path);
            }
        }
        self.by_identity.insert(identity, path.clone());
    }

    fn unregister(&self, path: &StorePath) -> Option<u64> {
        let (_, identity) = self.identities.remove(path)?;
        self.by_identity.remove_if(&identity, |_, p| p == path);
        Some(identity)
    }

    fn record_trace(&self, old_path: StorePath, identity: u64) {
        self.pending.insert(
            identity,
            PendingRenameTrace {
                identity,
                old_path,
                recorded_at: Instant::now(),
            },
        );
    }

    async fn persist(&self, path: &StorePath, identity: u64) {
        let abs = self.store.absolute_path(path);
        if let Err(e) = self.repository.upsert(&abs, identity).await {
            warn!(path = %path, error = %e, "Failed to persist identity");
        }
    }

    async fn forget(&self, path: &StorePath) {
        let abs = self.store.absolute_path(path);
        if let Err(e) = self.repository.remove(&abs).await {
            warn!(path = %path, error = %e, "Failed to remove persisted identity");
        }
    }
}
