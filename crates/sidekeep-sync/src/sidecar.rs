//! Sidecar creation shared by the reconciler and the revalidation scanner

use std::sync::Arc;

use sidekeep_core::config::Config;
use sidekeep_core::domain::{DerivativeKind, StorePath};
use sidekeep_core::ports::{IFileStore, StoreError};
use sidekeep_core::PathRules;
use tracing::{debug, warn};

/// Result of [`SidecarWriter::ensure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarCreation {
    /// A new sidecar was written
    Created(StorePath),
    /// A sidecar already existed, or another writer won the race
    AlreadyPresent(StorePath),
}

impl SidecarCreation {
    pub fn path(&self) -> &StorePath {
        match self {
            SidecarCreation::Created(p) | SidecarCreation::AlreadyPresent(p) => p,
        }
    }
}

/// Creates sidecars, seeding them from the configured template
pub struct SidecarWriter {
    store: Arc<dyn IFileStore>,
    rules: Arc<PathRules>,
    template: Option<StorePath>,
}

impl SidecarWriter {
    pub fn new(
        store: Arc<dyn IFileStore>,
        rules: Arc<PathRules>,
        template: Option<StorePath>,
    ) -> Self {
        Self {
            store,
            rules,
            template,
        }
    }

    /// Build from configuration; an invalid template path is ignored
    pub fn from_config(store: Arc<dyn IFileStore>, rules: Arc<PathRules>, config: &Config) -> Self {
        let template = config
            .derivatives
            .sidecar_template
            .as_deref()
            .and_then(|t| match StorePath::new(t) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(template = %t, error = %e, "Ignoring invalid sidecar template");
                    None
                }
            });
        Self::new(store, rules, template)
    }

    /// Content for a new sidecar: the template, or empty
    ///
    /// An unreadable template falls back to empty content.
    pub async fn seed_content(&self) -> String {
        let Some(template) = &self.template else {
            return String::new();
        };
        match self.store.read_to_string(template).await {
            Ok(content) => content,
            Err(e) => {
                warn!(template = %template, error = %e, "Sidecar template unreadable, using empty content");
                String::new()
            }
        }
    }

    /// Make sure `main` has a sidecar on disk
    ///
    /// # Errors
    /// Any store failure other than the target already existing
    pub async fn ensure(&self, main: &StorePath) -> Result<SidecarCreation, StoreError> {
        let path = self.rules.derive(main, DerivativeKind::Sidecar, None);

        let state = self.store.stat(&path).await?;
        if state.exists {
            if !state.is_file {
                return Err(StoreError::NotAFile(path));
            }
            return Ok(SidecarCreation::AlreadyPresent(path));
        }

        let content = self.seed_content().await;
        match self.store.create_file(&path, &content).await {
            Ok(()) => {
                debug!(main = %main, sidecar = %path, "Created sidecar");
                Ok(SidecarCreation::Created(path))
            }
            Err(e) if e.is_already_exists() => Ok(SidecarCreation::AlreadyPresent(path)),
            Err(e) => Err(e),
        }
    }
}
