//! Newtypes for validated domain values
//!
//! [`StorePath`] is the only path representation used by the engine. It is
//! relative to the store root and always uses `/` as separator, so derived
//! names and folder patterns behave the same on every platform.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A path inside the file store, relative to the store root
///
/// StorePath ensures the path is:
/// - Relative (a leading `/` is accepted and stripped)
/// - `/`-separated (backslashes are converted)
/// - Free of empty, `.` and `..` segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath(String);

impl StorePath {
    /// Create a new StorePath, normalizing separators
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is empty or escapes
    /// the store via `..`
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let raw: String = path.into();
        let unified = raw.replace('\\', "/");

        let mut segments: Vec<&str> = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path escapes store via ..: {raw}"
                    )));
                }
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            return Err(DomainError::InvalidPath(format!("Empty store path: '{raw}'")));
        }

        Ok(Self(segments.join("/")))
    }

    /// Wrap a string already known to be normalized
    pub(crate) fn from_normalized(path: String) -> Self {
        debug_assert!(Self::new(path.as_str()).map(|p| p.0 == path).unwrap_or(false));
        Self(path)
    }

    /// Create a StorePath from an absolute filesystem path under `root`
    ///
    /// # Errors
    /// Returns `DomainError::PathNotInStore` if `absolute` is not below `root`
    pub fn from_absolute(absolute: &Path, root: &Path) -> Result<Self, DomainError> {
        let relative = absolute.strip_prefix(root).map_err(|_| {
            DomainError::PathNotInStore(format!(
                "{} is not within {}",
                absolute.display(),
                root.display()
            ))
        })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(c) => segments.push(c.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "Unsupported path component in {}",
                        absolute.display()
                    )));
                }
            }
        }

        Self::new(segments.join("/"))
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Containing folder, `""` for entries at the store root
    #[must_use]
    pub fn parent(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// File name without its last extension
    ///
    /// A leading dot does not start an extension (`.hidden` has stem `.hidden`).
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Last extension without the dot, if any
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => Some(&name[idx + 1..]),
            _ => None,
        }
    }

    /// Everything after the first dot of the file name (`tar.gz` for
    /// `archive.tar.gz`), if any
    #[must_use]
    pub fn extension_chain(&self) -> Option<&str> {
        let name = self.file_name();
        let body = name.strip_prefix('.').unwrap_or(name);
        let offset = name.len() - body.len();
        match body.find('.') {
            Some(idx) if idx + 1 < body.len() => Some(&name[offset + idx + 1..]),
            _ => None,
        }
    }

    /// Replace the final segment
    ///
    /// # Errors
    /// Returns an error if `name` is empty or contains separators
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(DomainError::InvalidPath(format!(
                "Invalid file name component: '{name}'"
            )));
        }
        let parent = self.parent();
        if parent.is_empty() {
            Self::new(name)
        } else {
            Self::new(format!("{parent}/{name}"))
        }
    }

    /// Append a suffix to the full path string (`a/b.png` + `.side.md`)
    ///
    /// # Errors
    /// Returns an error if the resulting path is not valid
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, DomainError> {
        Self::new(format!("{}{}", self.0, suffix))
    }

    /// True if this path is `dir` itself or lies below it; the root `""`
    /// contains everything
    #[must_use]
    pub fn is_within(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return true;
        }
        self.0 == dir
            || (self.0.len() > dir.len()
                && self.0.starts_with(dir)
                && self.0.as_bytes()[dir.len()] == b'/')
    }

    /// Move this path from below `old_dir` to below `new_dir`
    ///
    /// Returns `None` if the path is not within `old_dir`.
    #[must_use]
    pub fn rebase(&self, old_dir: &StorePath, new_dir: &StorePath) -> Option<Self> {
        if self == old_dir {
            return Some(new_dir.clone());
        }
        if !self.is_within(old_dir.as_str()) {
            return None;
        }
        let rest = &self.0[old_dir.0.len() + 1..];
        Some(Self(format!("{}/{}", new_dir.0, rest)))
    }

    /// True if any segment is a dotfile or dot-directory
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.0.split('/').any(|segment| segment.starts_with('.'))
    }

    /// Resolve against a store root on disk
    #[must_use]
    pub fn to_absolute(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split('/') {
            path.push(segment);
        }
        path
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StorePath {
    type Error = DomainError;

    fn try_from(path: String) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl TryFrom<&str> for StorePath {
    type Error = DomainError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.0
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
