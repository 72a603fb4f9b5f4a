//! Orphan confirmation port (driven/secondary port)
//!
//! The revalidation scanner never deletes orphans on its own. It hands the
//! batch, with a reason per derivative, to this collaborator and trashes
//! only what comes back. The implementation owns any in-flight prompt, so
//! a second request while one is open is its concern, not the engine's.

use crate::domain::{OrphanBatch, StorePath};

#[async_trait::async_trait]
pub trait IOrphanConfirmation: Send + Sync {
    /// Ask the user which orphans to delete
    ///
    /// Returns the approved derivative paths. Paths not in `batch` are
    /// ignored by the caller.
    async fn confirm_orphans(&self, batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>>;
}
