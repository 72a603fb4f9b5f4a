//! Event reconciler
//!
//! Consumes Created / Deleted / Renamed notifications for the store and
//! keeps derivative files in lockstep with their main files.
//!
//! ## Policy
//!
//! ```text
//! Created   derivative        -> index
//!           monitored main    -> create sidecar (template or empty), index
//! Deleted   recently moved    -> ignore once
//!           derivative        -> drop from index, no cascade
//!           monitored main    -> trash every derivative
//! Renamed   1. duplicate within window        -> ignore
//!           2. sidecar truncated to `<x>.md`  -> restore full name, then 3
//!           3. derivative renamed             -> re-index, move main along
//!           4. main / folder renamed          -> move derivatives along
//!           5. dir or stem changed            -> open bulk-move window
//! ```
//!
//! Every file operation re-checks the store immediately before acting and
//! never overwrites. Failures become notices; handlers never return errors.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sidekeep_core::config::Config;
use sidekeep_core::domain::{DerivativeInfo, DerivativeKind, Relationship, StorePath};
use sidekeep_core::ports::{
    FileSystemState, IFileStore, INotificationService, Notification, StoreError,
};
use sidekeep_core::{PathRules, SharedIndex};
use tracing::{debug, info, instrument, warn};

use crate::refresh::RefreshDebouncer;
use crate::sidecar::{SidecarCreation, SidecarWriter};

// ============================================================================
// Settings
// ============================================================================

/// Reconciler behaviour derived from configuration
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub auto_create_sidecar: bool,
    pub duplicate_rename_window: Duration,
    pub bulk_move_window: Duration,
    pub restore_suppression: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_create_sidecar: config.derivatives.auto_create_sidecar,
            duplicate_rename_window: config.timing.duplicate_rename_window(),
            bulk_move_window: config.timing.bulk_move_window(),
            restore_suppression: config.timing.restore_suppression(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// EventOutcome
// ============================================================================

/// One thing a handler did (or deliberately did not do)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Derivative added to (or re-keyed in) the index
    Indexed(StorePath),
    /// Derivative dropped from the index
    Unindexed(StorePath),
    /// New sidecar written
    Created(StorePath),
    /// File moved to follow its counterpart
    Moved { from: StorePath, to: StorePath },
    /// Truncated sidecar moved back to its full name
    Repaired { from: StorePath, to: StorePath },
    /// Derivative moved to the trash
    Trashed(StorePath),
    /// Index entries below a renamed folder re-keyed
    FolderRekeyed { count: usize },
    /// Target occupied; nothing moved
    Conflict { from: StorePath, to: StorePath },
    /// Store operation failed
    Failed { path: StorePath, error: String },
    /// Delete of a path the reconciler itself moved away
    Suppressed,
    /// Same rename seen within the duplicate window
    Duplicate,
    /// Rename opened the bulk-move window
    BulkWindowOpened,
    /// Derivative rename inside the bulk-move window; index only
    Coalesced,
}

/// Record of what a handler did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    actions: Vec<Action>,
}

impl EventOutcome {
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.actions.contains(action)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn created(&self) -> Vec<&StorePath> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Created(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn moved(&self) -> Vec<(&StorePath, &StorePath)> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Moved { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn trashed(&self) -> Vec<&StorePath> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Trashed(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn conflicts(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Conflict { .. }))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Failed { .. }))
            .count()
    }
}

// ============================================================================
// IStoreEventHandler trait
// ============================================================================

/// Consumer of store change notifications
///
/// Implemented by [`EventReconciler`]; the external change tracker forwards
/// correlated events through it.
#[async_trait::async_trait]
pub trait IStoreEventHandler: Send + Sync {
    async fn handle_created(&self, path: &StorePath) -> EventOutcome;

    async fn handle_deleted(&self, path: &StorePath) -> EventOutcome;

    async fn handle_renamed(&self, old: &StorePath, new: &StorePath) -> EventOutcome;

    /// Evict expired short-lived state
    fn sweep(&self, now: Instant);
}

// ============================================================================
// EventReconciler
// ============================================================================

pub struct EventReconciler {
    store: Arc<dyn IFileStore>,
    rules: Arc<PathRules>,
    index: SharedIndex,
    notifier: Arc<dyn INotificationService>,
    sidecars: SidecarWriter,
    refresh: RefreshDebouncer,
    settings: ReconcilerSettings,
    /// (old, new) → last seen
    recent_renames: DashMap<(StorePath, StorePath), Instant>,
    /// Paths the reconciler moved away whose delete notification is ignored once
    recently_restored: DashMap<StorePath, Instant>,
    bulk_until: Mutex<Option<Instant>>,
}

impl EventReconciler {
    pub fn new(
        store: Arc<dyn IFileStore>,
        rules: Arc<PathRules>,
        index: SharedIndex,
        notifier: Arc<dyn INotificationService>,
        sidecars: SidecarWriter,
        refresh: RefreshDebouncer,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            rules,
            index,
            notifier,
            sidecars,
            refresh,
            settings,
            recent_renames: DashMap::new(),
            recently_restored: DashMap::new(),
            bulk_until: Mutex::new(None),
        }
    }

    /// Wire a reconciler from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn IFileStore>,
        rules: Arc<PathRules>,
        index: SharedIndex,
        notifier: Arc<dyn INotificationService>,
    ) -> Self {
        let sidecars = SidecarWriter::from_config(Arc::clone(&store), Arc::clone(&rules), config);
        let refresh = RefreshDebouncer::new(Arc::clone(&notifier), config.timing.refresh_debounce());
        Self::new(
            store,
            rules,
            index,
            notifier,
            sidecars,
            refresh,
            ReconcilerSettings::from_config(config),
        )
    }

    // ------------------------------------------------------------------
    // Created
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(path = %path))]
    pub async fn handle_created(&self, path: &StorePath) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        if self.rules.is_derivative(path) {
            if self.reindex(None, path).await {
                outcome.push(Action::Indexed(path.clone()));
            }
            self.refresh.request();
            return outcome;
        }

        if !self.rules.is_monitored(path) {
            return outcome;
        }
        if !self.state(path).await.is_regular_file() {
            debug!("Not a regular file, ignoring");
            return outcome;
        }

        let has_sidecar = self
            .index
            .read()
            .await
            .has_kind(path, DerivativeKind::Sidecar);
        if self.settings.auto_create_sidecar && !has_sidecar {
            self.create_sidecar(path, &mut outcome).await;
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Deleted
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(path = %path))]
    pub async fn handle_deleted(&self, path: &StorePath) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        if self.take_suppressed(path) {
            debug!("Ignoring delete of a path moved by the reconciler");
            outcome.push(Action::Suppressed);
            return outcome;
        }

        let indexed = self.index.read().await.contains(path);
        if indexed || self.rules.is_derivative(path) {
            if self.unindex(path).await {
                outcome.push(Action::Unindexed(path.clone()));
                self.refresh.request();
            }
            return outcome;
        }

        if !self.rules.is_monitored(path) {
            return outcome;
        }
        if self.state(path).await.exists {
            debug!("Main file present again, skipping cascade");
            return outcome;
        }

        let mut targets: BTreeSet<StorePath> = self
            .index
            .read()
            .await
            .relationships_for(path)
            .into_iter()
            .map(|r| r.derivative)
            .collect();
        targets.extend(
            self.rules
                .candidate_derivatives(path)
                .into_iter()
                .map(|(_, _, derivative)| derivative),
        );

        for derivative in targets {
            let state = self.state(&derivative).await;
            if !state.exists {
                self.unindex(&derivative).await;
                continue;
            }
            if !state.is_file {
                continue;
            }

            match self.store.trash(&derivative).await {
                Ok(()) => {
                    self.unindex(&derivative).await;
                    outcome.push(Action::Trashed(derivative));
                }
                Err(e) if e.is_not_found() => {
                    self.unindex(&derivative).await;
                }
                Err(e) => {
                    self.report_failure(&mut outcome, &derivative, "Moving derivative to trash", e)
                        .await;
                }
            }
        }

        let trashed = outcome.trashed().len();
        if trashed > 0 {
            info!(trashed, "Moved derivatives of deleted file to trash");
            self.refresh.request();
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Renamed
    // ------------------------------------------------------------------

    #[instrument(skip(self), fields(old = %old, new = %new))]
    pub async fn handle_renamed(&self, old: &StorePath, new: &StorePath) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        if old == new {
            return outcome;
        }

        if self.is_duplicate_rename(old, new) {
            debug!("Duplicate rename notification");
            outcome.push(Action::Duplicate);
            return outcome;
        }

        if let Some(corrected) = self.rules.sidecar_repair_target(old, new) {
            self.repair_sidecar_name(old, new, &corrected, &mut outcome)
                .await;
            return outcome;
        }

        if let Some(info) = self.rules.parse(new) {
            self.derivative_renamed(old, new, info, true, &mut outcome)
                .await;
            return outcome;
        }

        let was_indexed = self.index.read().await.contains(old);
        if was_indexed || self.rules.is_derivative(old) {
            // Renamed to a plain name; it no longer belongs to any main file
            if self.unindex(old).await {
                outcome.push(Action::Unindexed(old.clone()));
            }
            self.refresh.request();
            return outcome;
        }

        let relevant = self.main_renamed(old, new, &mut outcome).await;

        if relevant && (old.parent() != new.parent() || old.stem() != new.stem()) {
            self.open_bulk_window();
            outcome.push(Action::BulkWindowOpened);
            self.refresh.request();
        }
        outcome
    }

    /// Restore a sidecar whose compound suffix was cut off by a plain rename
    async fn repair_sidecar_name(
        &self,
        old: &StorePath,
        truncated: &StorePath,
        corrected: &StorePath,
        outcome: &mut EventOutcome,
    ) {
        if !self.state(truncated).await.is_regular_file() {
            debug!(path = %truncated, "Truncated sidecar no longer present");
            return;
        }
        if self.state(corrected).await.exists {
            self.report_conflict(outcome, truncated, corrected).await;
            return;
        }

        match self.store.rename(truncated, corrected).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                self.report_conflict(outcome, truncated, corrected).await;
                return;
            }
            Err(e) => {
                self.report_failure(outcome, truncated, "Restoring sidecar name", e)
                    .await;
                return;
            }
        }

        info!(from = %truncated, to = %corrected, "Restored sidecar name");
        self.suppress(truncated);
        outcome.push(Action::Repaired {
            from: truncated.clone(),
            to: corrected.clone(),
        });
        self.send(Notification::sync(
            "Sidecar name restored",
            format!("{truncated} was renamed back to {corrected}"),
        ))
        .await;

        // A repaired sidecar always pulls its main file along, bulk window or not
        if let Some(info) = self.rules.parse(corrected) {
            self.derivative_renamed(old, corrected, info, false, outcome)
                .await;
        }
    }

    /// A derivative moved: re-index it and move its main file along
    ///
    /// With `dampen` set, a rename inside the bulk-move window only
    /// updates the index.
    async fn derivative_renamed(
        &self,
        old: &StorePath,
        new: &StorePath,
        info: DerivativeInfo,
        dampen: bool,
        outcome: &mut EventOutcome,
    ) {
        let new_main = info.main.clone();
        {
            let mut index = self.index.write().await;
            index.remove(old);
            index.insert(Relationship::from_info(new.clone(), info));
        }
        outcome.push(Action::Indexed(new.clone()));
        self.refresh.request();

        if dampen && self.in_bulk_window() {
            debug!("Inside bulk-move window, index updated only");
            outcome.push(Action::Coalesced);
            return;
        }

        let Some(old_info) = self.rules.parse(old) else {
            return;
        };
        let old_main = old_info.main;
        if old_main == new_main {
            return;
        }

        if !self.state(&old_main).await.is_regular_file() {
            debug!(main = %old_main, "Main file not at its old path, nothing to mirror");
            return;
        }
        if self.state(&new_main).await.exists {
            self.report_conflict(outcome, &old_main, &new_main).await;
            return;
        }

        match self.store.rename(&old_main, &new_main).await {
            Ok(()) => {
                info!(from = %old_main, to = %new_main, "Moved main file to follow its derivative");
                self.suppress(&old_main);
                outcome.push(Action::Moved {
                    from: old_main.clone(),
                    to: new_main.clone(),
                });
            }
            Err(e) if e.is_already_exists() => {
                self.report_conflict(outcome, &old_main, &new_main).await;
                return;
            }
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                self.report_failure(outcome, &old_main, "Moving main file", e)
                    .await;
                return;
            }
        }

        self.main_renamed(&old_main, &new_main, outcome).await;
    }

    /// A main file or folder moved: move derivatives along
    ///
    /// Returns false if neither path is of interest.
    async fn main_renamed(
        &self,
        old: &StorePath,
        new: &StorePath,
        outcome: &mut EventOutcome,
    ) -> bool {
        if self.state(new).await.is_directory() {
            let count = self
                .index
                .write()
                .await
                .rename_folder(old, new, &self.rules);
            outcome.push(Action::FolderRekeyed { count });
            self.refresh.request();
            return true;
        }

        let new_monitored = self.rules.is_monitored(new);
        if !self.rules.is_monitored(old) && !new_monitored {
            return false;
        }

        let mut slots: Vec<(DerivativeKind, Option<String>)> = vec![
            (DerivativeKind::Sidecar, None),
            (DerivativeKind::Redirect, None),
        ];
        let mut preview_exts: BTreeSet<String> = self
            .index
            .read()
            .await
            .preview_extensions_for(old)
            .into_iter()
            .collect();
        preview_exts.extend(self.rules.preview_extensions().iter().cloned());
        slots.extend(
            preview_exts
                .into_iter()
                .map(|ext| (DerivativeKind::Preview, Some(ext))),
        );

        for (kind, ext) in slots {
            let from = self.rules.derive(old, kind, ext.as_deref());
            let to = self.rules.derive(new, kind, ext.as_deref());
            let from_state = self.state(&from).await;
            let to_state = self.state(&to).await;

            if from_state.exists {
                if to_state.exists {
                    self.report_conflict(outcome, &from, &to).await;
                    continue;
                }
                match self.store.rename(&from, &to).await {
                    Ok(()) => {
                        self.reindex(Some(&from), &to).await;
                        debug!(from = %from, to = %to, kind = %kind, "Moved derivative");
                        outcome.push(Action::Moved { from, to });
                    }
                    Err(e) if e.is_already_exists() => {
                        self.report_conflict(outcome, &from, &to).await;
                    }
                    Err(e) if e.is_not_found() => {
                        self.unindex(&from).await;
                    }
                    Err(e) => {
                        self.report_failure(outcome, &from, "Moving derivative", e)
                            .await;
                    }
                }
            } else if to_state.exists {
                // Already relocated, e.g. by an ancestor folder rename
                self.reindex(Some(&from), &to).await;
            } else {
                self.unindex(&from).await;
                if kind == DerivativeKind::Sidecar
                    && new_monitored
                    && self.settings.auto_create_sidecar
                {
                    self.create_sidecar(new, outcome).await;
                }
            }
        }

        let moved = outcome.moved().len();
        if moved > 0 {
            info!(from = %old, to = %new, moved, "Moved derivatives with their main file");
        }
        self.refresh.request();
        true
    }

    // ------------------------------------------------------------------
    // Short-lived state
    // ------------------------------------------------------------------

    fn is_duplicate_rename(&self, old: &StorePath, new: &StorePath) -> bool {
        let now = Instant::now();
        match self.recent_renames.entry((old.clone(), new.clone())) {
            Entry::Occupied(mut entry) => {
                let duplicate =
                    now.saturating_duration_since(*entry.get()) < self.settings.duplicate_rename_window;
                entry.insert(now);
                duplicate
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    fn suppress(&self, path: &StorePath) {
        self.recently_restored.insert(path.clone(), Instant::now());
    }

    fn take_suppressed(&self, path: &StorePath) -> bool {
        self.recently_restored
            .remove(path)
            .is_some_and(|(_, at)| at.elapsed() < self.settings.restore_suppression)
    }

    fn open_bulk_window(&self) {
        let mut until = self.bulk_until.lock().unwrap_or_else(|e| e.into_inner());
        *until = Some(Instant::now() + self.settings.bulk_move_window);
    }

    fn in_bulk_window(&self) -> bool {
        let until = self.bulk_until.lock().unwrap_or_else(|e| e.into_inner());
        until.is_some_and(|deadline| Instant::now() < deadline)
    }

    /// Evict expired dedup and suppression entries
    pub fn sweep(&self, now: Instant) {
        let dedup = self.settings.duplicate_rename_window;
        self.recent_renames
            .retain(|_, at| now.saturating_duration_since(*at) < dedup);

        let ttl = self.settings.restore_suppression;
        self.recently_restored
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);

        let mut until = self.bulk_until.lock().unwrap_or_else(|e| e.into_inner());
        if until.is_some_and(|deadline| now >= deadline) {
            *until = None;
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn create_sidecar(&self, main: &StorePath, outcome: &mut EventOutcome) {
        match self.sidecars.ensure(main).await {
            Ok(creation) => {
                self.reindex(None, creation.path()).await;
                if let SidecarCreation::Created(path) = creation {
                    info!(main = %main, sidecar = %path, "Created sidecar");
                    outcome.push(Action::Created(path));
                    self.refresh.request();
                }
            }
            Err(e) => {
                let path = self.rules.derive(main, DerivativeKind::Sidecar, None);
                self.report_failure(outcome, &path, "Creating sidecar", e)
                    .await;
            }
        }
    }

    /// Stat, treating failures as absent
    ///
    /// Every mutation refuses to overwrite, so a wrong "absent" can only
    /// surface later as a conflict.
    async fn state(&self, path: &StorePath) -> FileSystemState {
        match self.store.stat(path).await {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path, error = %e, "Stat failed");
                FileSystemState::not_found()
            }
        }
    }

    async fn reindex(&self, old: Option<&StorePath>, new: &StorePath) -> bool {
        let mut index = self.index.write().await;
        if let Some(old) = old {
            index.remove(old);
        }
        index.index_if_derivative(new, &self.rules)
    }

    async fn unindex(&self, path: &StorePath) -> bool {
        self.index.write().await.remove(path).is_some()
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(title = %notification.title, error = %e, "Failed to deliver notification");
        }
    }

    async fn report_failure(
        &self,
        outcome: &mut EventOutcome,
        path: &StorePath,
        operation: &str,
        error: StoreError,
    ) {
        warn!(path = %path, error = %error, "{} failed", operation);
        self.send(Notification::error(
            format!("{operation} failed"),
            format!("{path}: {error}"),
        ))
        .await;
        outcome.push(Action::Failed {
            path: path.clone(),
            error: error.to_string(),
        });
    }

    async fn report_conflict(&self, outcome: &mut EventOutcome, from: &StorePath, to: &StorePath) {
        warn!(from = %from, to = %to, "Target already exists, leaving both files in place");
        self.send(Notification::conflict(
            "Target already exists",
            format!("{from} was not moved because {to} is occupied"),
        ))
        .await;
        outcome.push(Action::Conflict {
            from: from.clone(),
            to: to.clone(),
        });
    }
}

#[async_trait::async_trait]
impl IStoreEventHandler for EventReconciler {
    async fn handle_created(&self, path: &StorePath) -> EventOutcome {
        EventReconciler::handle_created(self, path).await
    }

    async fn handle_deleted(&self, path: &StorePath) -> EventOutcome {
        EventReconciler::handle_deleted(self, path).await
    }

    async fn handle_renamed(&self, old: &StorePath, new: &StorePath) -> EventOutcome {
        EventReconciler::handle_renamed(self, old, new).await
    }

    fn sweep(&self, now: Instant) {
        EventReconciler::sweep(self, now);
    }
}
