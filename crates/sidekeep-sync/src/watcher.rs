//! OS file watcher
//!
//! Wraps the `notify` crate and reduces raw OS events to the two
//! notifications the [`ExternalChangeTracker`](crate::tracker::ExternalChangeTracker)
//! needs: something appeared at a path, or something disappeared.
//!
//! ```text
//! inotify / FSEvents / ReadDirectoryChanges
//!       │
//!       ▼
//!  FileWatcher  ──→  mpsc::channel<RawChange>  ──→  ExternalChangeTracker
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sidekeep_core::domain::StorePath;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Channel capacity between the OS callback and the tracker
const CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// RawChange
// ============================================================================

/// Add / unlink notification for a store path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Added(StorePath),
    Removed(StorePath),
}

impl RawChange {
    pub fn path(&self) -> &StorePath {
        match self {
            RawChange::Added(p) | RawChange::Removed(p) => p,
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Recursive watcher over the store root
///
/// ## Usage
///
/// ```ignore
/// let (mut watcher, rx) = FileWatcher::new(root)?;
/// watcher.watch()?;
/// tracker.run(rx, cancel).await;
/// ```
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Create a watcher for `root` and the receiver for its notifications
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new(root: impl Into<PathBuf>) -> Result<(Self, mpsc::Receiver<RawChange>)> {
        let root = root.into();
        let (tx, rx) = mpsc::channel::<RawChange>(CHANNEL_CAPACITY);
        let callback_root = root.clone();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in map_notify_event(&event, &callback_root) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Failed to send change (receiver dropped)");
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok((Self { watcher, root }, rx))
    }

    /// Start watching the store root recursively
    ///
    /// # Errors
    /// Returns an error if the root cannot be watched (missing, permissions,
    /// inotify watch limit)
    pub fn watch(&mut self) -> Result<()> {
        info!(root = %self.root.display(), "Starting recursive watch");
        self.watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", self.root.display()))
    }

    /// Stop watching the store root
    pub fn unwatch(&mut self) -> Result<()> {
        info!(root = %self.root.display(), "Stopping watch");
        self.watcher
            .unwatch(&self.root)
            .with_context(|| format!("Failed to unwatch path: {}", self.root.display()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// Event mapping - notify::Event → RawChange
// ============================================================================

/// Reduce a `notify::Event` to add / unlink notifications
///
/// - `Create(*)` and `Modify(Name(To))` → `Added`
/// - `Remove(*)` and `Modify(Name(From))` → `Removed`
/// - `Modify(Name(Both))` → `Removed(old)`, `Added(new)`
/// - `Modify(Name(Any | Other))` → `Added` if the path exists, else `Removed`
///
/// Content and metadata changes, access events and paths outside `root` are
/// dropped. Backends that report both halves of a rename and the combined
/// event produce duplicates; the tracker treats repeats as no-ops.
pub fn map_notify_event(event: &notify::Event, root: &Path) -> Vec<RawChange> {
    let to_store = |path: &PathBuf| -> Option<StorePath> {
        match StorePath::from_absolute(path, root) {
            Ok(p) => Some(p),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "Ignoring path outside store");
                None
            }
        }
    };
    let first = || event.paths.first().and_then(to_store);

    let changes: Vec<RawChange> = match &event.kind {
        EventKind::Create(_) => first().map(RawChange::Added).into_iter().collect(),

        EventKind::Remove(_) => first().map(RawChange::Removed).into_iter().collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            first().map(RawChange::Removed).into_iter().collect()
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            first().map(RawChange::Added).into_iter().collect()
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let old = event.paths.first().and_then(to_store);
            let new = event.paths.get(1).and_then(to_store);
            old.map(RawChange::Removed)
                .into_iter()
                .chain(new.map(RawChange::Added))
                .collect()
        }

        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .first()
            .and_then(|abs| {
                let path = to_store(abs)?;
                Some(if abs.exists() {
                    RawChange::Added(path)
                } else {
                    RawChange::Removed(path)
                })
            })
            .into_iter()
            .collect(),

        _ => Vec::new(),
    };

    if !changes.is_empty() {
        debug!(kind = ?event.kind, ?changes, "Mapped watcher event");
    }
    changes
}
