//! Startup revalidation
//!
//! Full-store pass run once the host is ready:
//!
//! 1. Reconcile the index with the file listing
//! 2. Create sidecars for monitored files lacking one
//! 3. Classify orphans, ask for confirmation, trash what was approved
//!
//! Running it twice in a row is a no-op the second time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sidekeep_core::config::Config;
use sidekeep_core::domain::{DerivativeKind, MainState, OrphanBatch, StorePath};
use sidekeep_core::ports::{IFileStore, INotificationService, IOrphanConfirmation, Notification};
use sidekeep_core::{PathRules, SharedIndex};
use tracing::{debug, info, instrument, warn};

use crate::sidecar::{SidecarCreation, SidecarWriter};
use crate::SyncError;

/// Summary of one revalidation pass
#[derive(Debug, Clone, Default)]
pub struct RevalidationReport {
    /// Sidecars created in phase 1
    pub created: Vec<StorePath>,
    /// Orphans found in phase 2
    pub orphans: OrphanBatch,
    /// Orphans moved to the trash after confirmation
    pub deleted: Vec<StorePath>,
    /// Paths whose creation or removal failed
    pub failed: Vec<StorePath>,
}

impl RevalidationReport {
    /// True if the pass changed nothing on disk
    pub fn is_clean(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.failed.is_empty()
    }
}

pub struct RevalidationScanner {
    store: Arc<dyn IFileStore>,
    rules: Arc<PathRules>,
    index: SharedIndex,
    notifier: Arc<dyn INotificationService>,
    confirmation: Arc<dyn IOrphanConfirmation>,
    sidecars: SidecarWriter,
    auto_create: bool,
}

impl RevalidationScanner {
    pub fn new(
        config: &Config,
        store: Arc<dyn IFileStore>,
        rules: Arc<PathRules>,
        index: SharedIndex,
        notifier: Arc<dyn INotificationService>,
        confirmation: Arc<dyn IOrphanConfirmation>,
    ) -> Self {
        let sidecars = SidecarWriter::from_config(Arc::clone(&store), Arc::clone(&rules), config);
        Self {
            store,
            rules,
            index,
            notifier,
            confirmation,
            sidecars,
            auto_create: config.derivatives.auto_create_sidecar,
        }
    }

    /// Run all phases
    ///
    /// # Errors
    /// Only a failed listing of the store aborts the pass; per-file failures
    /// are collected in [`RevalidationReport::failed`].
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RevalidationReport, SyncError> {
        let files = self.store.list_all_files().await?;
        let listed: HashSet<&StorePath> = files.iter().collect();
        self.sync_index(&files, &listed).await;

        let mut report = RevalidationReport::default();

        if self.auto_create {
            self.create_missing_sidecars(&files, &mut report).await;
        }

        report.orphans = self.classify_orphans(&listed).await;
        if !report.orphans.is_empty() {
            self.remove_orphans(&mut report).await;
        }

        info!(
            files = files.len(),
            created = report.created.len(),
            orphans = report.orphans.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Revalidation finished"
        );
        Ok(report)
    }

    /// Drop stale index entries and index every listed derivative
    async fn sync_index(&self, files: &[StorePath], listed: &HashSet<&StorePath>) {
        let mut index = self.index.write().await;
        let stale: Vec<StorePath> = index
            .derivatives()
            .filter(|d| !listed.contains(d))
            .cloned()
            .collect();
        for path in &stale {
            index.remove(path);
        }
        let mut indexed = 0;
        for file in files {
            if !index.contains(file) && index.index_if_derivative(file, &self.rules) {
                indexed += 1;
            }
        }
        debug!(stale = stale.len(), indexed, "Index reconciled with listing");
    }

    // ------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------

    async fn create_missing_sidecars(&self, files: &[StorePath], report: &mut RevalidationReport) {
        for main in files.iter().filter(|f| self.rules.is_monitored(f)) {
            let has_sidecar = self
                .index
                .read()
                .await
                .has_kind(main, DerivativeKind::Sidecar);
            if has_sidecar {
                continue;
            }

            match self.sidecars.ensure(main).await {
                Ok(creation) => {
                    self.index
                        .write()
                        .await
                        .index_if_derivative(creation.path(), &self.rules);
                    if let SidecarCreation::Created(path) = creation {
                        report.created.push(path);
                    }
                }
                Err(e) => {
                    warn!(main = %main, error = %e, "Failed to create sidecar");
                    report
                        .failed
                        .push(self.rules.derive(main, DerivativeKind::Sidecar, None));
                }
            }
        }

        if !report.created.is_empty() {
            info!(count = report.created.len(), "Created missing sidecars");
            self.send(Notification::sync(
                "Sidecars created",
                format!("{} sidecar(s) created for files that had none", report.created.len()),
            ))
            .await;
        }
    }

    // ------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------

    async fn classify_orphans(&self, listed: &HashSet<&StorePath>) -> OrphanBatch {
        let mains: Vec<StorePath> = {
            let index = self.index.read().await;
            index
                .derivatives()
                .filter_map(|d| index.main_for(d).cloned())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        };

        let mut states: HashMap<StorePath, MainState> = HashMap::with_capacity(mains.len());
        for main in mains {
            let state = if listed.contains(&main) {
                MainState::File
            } else {
                self.main_state(&main).await
            };
            states.insert(main, state);
        }

        let index = self.index.read().await;
        index.find_orphans(
            |main| states.get(main).copied().unwrap_or(MainState::Missing),
            &self.rules,
        )
    }

    async fn main_state(&self, main: &StorePath) -> MainState {
        match self.store.stat(main).await {
            Ok(state) if state.is_regular_file() => MainState::File,
            Ok(state) if state.is_directory() => MainState::Folder,
            Ok(_) => MainState::Missing,
            Err(e) => {
                warn!(path = %main, error = %e, "Stat failed, treating main file as missing");
                MainState::Missing
            }
        }
    }

    async fn remove_orphans(&self, report: &mut RevalidationReport) {
        let approved = match self.confirmation.confirm_orphans(&report.orphans).await {
            Ok(approved) => approved,
            Err(e) => {
                warn!(error = %e, "Orphan confirmation failed, keeping all orphans");
                return;
            }
        };

        for derivative in approved {
            if !report.orphans.contains(&derivative) {
                debug!(path = %derivative, "Ignoring approval for a path outside the batch");
                continue;
            }
            if !self.still_orphaned(&derivative).await {
                debug!(path = %derivative, "Orphan resolved since classification, keeping it");
                continue;
            }

            match self.store.trash(&derivative).await {
                Ok(()) => {
                    self.index.write().await.remove(&derivative);
                    report.deleted.push(derivative);
                }
                Err(e) if e.is_not_found() => {
                    self.index.write().await.remove(&derivative);
                }
                Err(e) => {
                    warn!(path = %derivative, error = %e, "Failed to trash orphan");
                    report.failed.push(derivative);
                }
            }
        }

        if !report.deleted.is_empty() {
            info!(count = report.deleted.len(), "Moved orphaned derivatives to trash");
            self.send(Notification::sync(
                "Orphans removed",
                format!("{} orphaned derivative(s) moved to trash", report.deleted.len()),
            ))
            .await;
        }
    }

    /// Re-check an approved orphan right before removing it
    async fn still_orphaned(&self, derivative: &StorePath) -> bool {
        match self.store.stat(derivative).await {
            Ok(state) if state.is_regular_file() => {}
            _ => return false,
        }
        let Some(info) = self.rules.parse(derivative) else {
            return true;
        };
        let main_resolved = self.main_state(&info.main).await == MainState::File
            && self.rules.is_monitored(&info.main);
        !main_resolved
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(title = %notification.title, error = %e, "Failed to deliver notification");
        }
    }
}
