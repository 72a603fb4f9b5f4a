//! File store port (driven/secondary port)
//!
//! This module defines the interface the engine uses to inspect and mutate
//! the hierarchical file store. All paths are [`StorePath`]s relative to the
//! store root.
//!
//! ## Design Notes
//!
//! - Uses a typed [`StoreError`] rather than `anyhow` because callers branch
//!   on "already exists" (race success or conflict) and "not found".
//! - `create_file` and `rename` never overwrite an existing entry.
//! - `trash` moves to a recoverable location; nothing is erased.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::StorePath;

// ============================================================================
// StoreError
// ============================================================================

/// Errors returned by file store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Target path is already occupied
    #[error("Path already exists: {0}")]
    AlreadyExists(StorePath),

    /// Source path does not exist
    #[error("Path not found: {0}")]
    NotFound(StorePath),

    /// Path exists but is not a regular file
    #[error("Not a regular file: {0}")]
    NotAFile(StorePath),

    /// The store root itself cannot be read
    #[error("Store root unavailable: {}: {source}", root.display())]
    RootUnavailable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: StorePath,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Map an I/O error for `path`, classifying common kinds
    pub fn from_io(path: &StorePath, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.clone()),
            std::io::ErrorKind::NotFound => StoreError::NotFound(path.clone()),
            _ => StoreError::Io {
                path: path.clone(),
                source,
            },
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

// ============================================================================
// FileSystemState
// ============================================================================

/// Snapshot of an entry in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    /// Whether anything exists at the path
    pub exists: bool,
    /// Whether this is a regular file (false for directories and other types)
    pub is_file: bool,
    /// Size in bytes (0 for directories or missing paths)
    pub size: u64,
    /// Last modification time, if available
    pub modified: Option<DateTime<Utc>>,
    /// Stable identity across renames (inode number on Unix)
    pub identity: Option<u64>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
            identity: None,
        }
    }

    /// Returns true if the entry exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// Returns true if the entry exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

// ============================================================================
// IFileStore trait
// ============================================================================

/// Port trait for file store operations
///
/// ## Implementation Notes
///
/// - `stat` returns [`FileSystemState::not_found`] for missing paths
///   instead of an error.
/// - `list_all_files` returns regular files only, excluding the trash.
/// - `create_file` creates missing parent folders.
/// - `rename` fails with [`StoreError::AlreadyExists`] if `to` is occupied
///   and creates missing parent folders of `to`.
#[async_trait::async_trait]
pub trait IFileStore: Send + Sync {
    /// Every regular file in the store
    async fn list_all_files(&self) -> Result<Vec<StorePath>, StoreError>;

    /// Every regular file below the folder `dir`
    async fn list_files_in(&self, dir: &StorePath) -> Result<Vec<StorePath>, StoreError>;

    /// Current state of a path
    async fn stat(&self, path: &StorePath) -> Result<FileSystemState, StoreError>;

    /// Read a file as UTF-8 text
    async fn read_to_string(&self, path: &StorePath) -> Result<String, StoreError>;

    /// Create a new file with `content`
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] if the path is occupied
    async fn create_file(&self, path: &StorePath, content: &str) -> Result<(), StoreError>;

    /// Move a file or folder
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] if `to` is occupied,
    /// [`StoreError::NotFound`] if `from` is missing
    async fn rename(&self, from: &StorePath, to: &StorePath) -> Result<(), StoreError>;

    /// Move a file to the recoverable trash
    async fn trash(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Resolve a store path on disk
    fn absolute_path(&self, path: &StorePath) -> PathBuf;
}
