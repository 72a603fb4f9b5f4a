//! SideKeep Sync - Derivative synchronization engine
//!
//! Provides:
//! - Event reconciliation keeping derivatives beside their main files
//! - Startup revalidation with confirmed orphan removal
//! - External change tracking that correlates unlink + add into renames
//! - A local filesystem adapter with a recoverable trash
//!
//! ## Modules
//!
//! - [`reconciler`] - Created / Deleted / Renamed handling
//! - [`revalidation`] - Full-store sidecar creation and orphan sweep
//! - [`tracker`] - Identity-based rename correlation for external changes
//! - [`watcher`] - OS watcher producing add / unlink notifications
//! - [`filesystem`] - `IFileStore` over a local directory
//! - [`sidecar`] - Sidecar creation from the configured template
//! - [`refresh`] - Debounced view refresh

pub mod filesystem;
pub mod reconciler;
pub mod refresh;
pub mod revalidation;
pub mod sidecar;
pub mod tracker;
pub mod watcher;

pub use filesystem::LocalFileStore;
pub use reconciler::{Action, EventOutcome, EventReconciler, IStoreEventHandler, ReconcilerSettings};
pub use refresh::RefreshDebouncer;
pub use revalidation::{RevalidationReport, RevalidationScanner};
pub use sidecar::{SidecarCreation, SidecarWriter};
pub use tracker::{ExternalChangeTracker, PendingRenameTrace, RebuildStats, TrackerOutcome};
pub use watcher::{FileWatcher, RawChange};

use sidekeep_core::domain::DomainError;
use sidekeep_core::ports::StoreError;
use thiserror::Error;

/// Errors that abort a whole engine operation
///
/// Per-file failures are reported as notices and never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The file store failed as a whole
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The identity map could not be loaded or saved
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    /// The OS watcher failed
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// A domain-level error propagated from sidekeep-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}
