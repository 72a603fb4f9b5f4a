//! Local file store adapter (secondary/driven adapter)
//!
//! Implements [`IFileStore`] over a directory tree using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **No overwrite**: `create_file` opens with `create_new`; `rename`
//!   refuses an occupied target.
//! - **Trash**: files move to `<root>/.trash/<relative path>`; a timestamp
//!   suffix keeps earlier trashed copies intact.
//! - **Identity**: the inode number on Unix, `None` elsewhere.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sidekeep_core::domain::StorePath;
use sidekeep_core::ports::{FileSystemState, IFileStore, StoreError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Folder below the store root that receives trashed files
pub const TRASH_DIR: &str = ".trash";

// ============================================================================
// LocalFileStore struct
// ============================================================================

/// Adapter that bridges the [`IFileStore`] port to a local directory tree
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files below `start`, skipping the trash
    ///
    /// `on_start_error` maps a failure to read `start` itself; folders
    /// further down that cannot be read are logged and skipped.
    async fn walk(
        &self,
        start: PathBuf,
        on_start_error: impl FnOnce(std::io::Error) -> StoreError,
    ) -> Result<Vec<StorePath>, StoreError> {
        let trash = self.trash_root();
        let mut files = Vec::new();
        let mut stack = vec![start.clone()];
        let mut on_start_error = Some(on_start_error);

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == start => {
                    if let Some(map) = on_start_error.take() {
                        return Err(map(e));
                    }
                    continue;
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable folder");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Failed to read folder entry");
                        break;
                    }
                };
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    if path != trash {
                        stack.push(path);
                    }
                } else if file_type.is_file() {
                    match StorePath::from_absolute(&path, &self.root) {
                        Ok(p) => files.push(p),
                        Err(e) => debug!(path = %path.display(), error = %e, "Skipping path"),
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn trash_root(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    /// Pick a free location in the trash for `path`
    async fn trash_target(&self, path: &StorePath) -> PathBuf {
        let base = path.to_absolute(&self.trash_root());
        if !exists(&base).await {
            return base;
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let stamped = append_to_name(&base, &stamp.to_string());
        if !exists(&stamped).await {
            return stamped;
        }
        append_to_name(&base, &uuid::Uuid::new_v4().simple().to_string())
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

fn append_to_name(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn modified_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().and_then(|st| {
        st.duration_since(std::time::UNIX_EPOCH)
            .ok()
            .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
    })
}

#[cfg(unix)]
fn identity_of(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn identity_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

async fn ensure_parent(target: &Path, path: &StorePath) -> Result<(), StoreError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;
    }
    Ok(())
}

// ============================================================================
// IFileStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IFileStore for LocalFileStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list_all_files(&self) -> Result<Vec<StorePath>, StoreError> {
        let root = self.root.clone();
        let files = self
            .walk(root.clone(), |source| StoreError::RootUnavailable { root, source })
            .await?;
        debug!(count = files.len(), "Listed store");
        Ok(files)
    }

    #[instrument(skip(self), fields(dir = %dir))]
    async fn list_files_in(&self, dir: &StorePath) -> Result<Vec<StorePath>, StoreError> {
        let files = self
            .walk(self.absolute_path(dir), |e| StoreError::from_io(dir, e))
            .await?;
        debug!(count = files.len(), "Listed folder");
        Ok(files)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn stat(&self, path: &StorePath) -> Result<FileSystemState, StoreError> {
        let abs = self.absolute_path(path);
        let metadata = match tokio::fs::metadata(&abs).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(StoreError::from_io(path, e)),
        };

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: if metadata.is_file() { metadata.len() } else { 0 },
            modified: modified_time(&metadata),
            identity: identity_of(&metadata),
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn read_to_string(&self, path: &StorePath) -> Result<String, StoreError> {
        tokio::fs::read_to_string(self.absolute_path(path))
            .await
            .map_err(|e| StoreError::from_io(path, e))
    }

    #[instrument(skip(self, content), fields(path = %path, bytes = content.len()))]
    async fn create_file(&self, path: &StorePath, content: &str) -> Result<(), StoreError> {
        let target = self.absolute_path(path);
        ensure_parent(&target, path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StoreError::from_io(path, e))?;
        file.flush().await.map_err(|e| StoreError::from_io(path, e))?;

        debug!("file created");
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &StorePath, to: &StorePath) -> Result<(), StoreError> {
        let source = self.absolute_path(from);
        let target = self.absolute_path(to);

        if !exists(&source).await {
            return Err(StoreError::NotFound(from.clone()));
        }
        if exists(&target).await {
            return Err(StoreError::AlreadyExists(to.clone()));
        }
        ensure_parent(&target, to).await?;

        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| StoreError::from_io(from, e))?;

        debug!("renamed");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn trash(&self, path: &StorePath) -> Result<(), StoreError> {
        let source = self.absolute_path(path);
        if !exists(&source).await {
            return Err(StoreError::NotFound(path.clone()));
        }

        let target = self.trash_target(path).await;
        ensure_parent(&target, path).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| StoreError::from_io(path, e))?;

        debug!(trashed_to = %target.display(), "moved to trash");
        Ok(())
    }

    fn absolute_path(&self, path: &StorePath) -> PathBuf {
        path.to_absolute(&self.root)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
