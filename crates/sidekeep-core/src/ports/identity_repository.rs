//! Identity repository port (driven/secondary port)
//!
//! Persists the absolute path → stable identity map the external change
//! tracker uses to recognize renames made outside the host application.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Keys are absolute paths so the map stays meaningful if the store root
//!   is reconfigured; entries outside the current root are dropped on the
//!   next rebuild.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[async_trait::async_trait]
pub trait IIdentityRepository: Send + Sync {
    /// Every persisted entry
    async fn load_all(&self) -> anyhow::Result<HashMap<PathBuf, u64>>;

    /// Insert or update one entry
    async fn upsert(&self, path: &Path, identity: u64) -> anyhow::Result<()>;

    /// Remove one entry; no-op if absent
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;

    /// Replace the whole map atomically
    async fn replace_all(&self, entries: &HashMap<PathBuf, u64>) -> anyhow::Result<()>;
}
