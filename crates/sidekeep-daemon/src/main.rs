//! SideKeep Daemon - Background derivative synchronization
//!
//! This binary runs as a user service and:
//! - Revalidates the store on startup (missing sidecars, orphans)
//! - Watches the store for changes made by any application
//! - Keeps sidecars, redirects and previews beside their main files
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! ```text
//! FileWatcher ──→ ExternalChangeTracker ──→ EventReconciler ──→ LocalFileStore
//! ```
//!
//! The tracker loop is controlled by a `CancellationToken` that is
//! triggered on receipt of SIGTERM or SIGINT. The daemon never deletes
//! orphans on its own; they are logged and left for `sidekeep scan`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sidekeep_cache::{DatabasePool, SqliteIdentityRepository};
use sidekeep_core::config::Config;
use sidekeep_core::domain::{OrphanBatch, StorePath};
use sidekeep_core::ports::{
    IFileStore, INotificationService, IOrphanConfirmation, Notification,
};
use sidekeep_core::{PathRules, RelationshipIndex};
use sidekeep_sync::{
    EventReconciler, ExternalChangeTracker, FileWatcher, LocalFileStore, RevalidationScanner,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configuration file location
const CONFIG_ENV: &str = "SIDEKEEP_CONFIG";

// ============================================================================
// Adapters
// ============================================================================

/// Notices go to the log; there is no view to refresh
struct LogNotifier;

#[async_trait::async_trait]
impl INotificationService for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.category.as_str() {
            "error" => error!(title = %notification.title, "{}", notification.body),
            "conflict" => warn!(title = %notification.title, "{}", notification.body),
            _ => info!(title = %notification.title, "{}", notification.body),
        }
        Ok(())
    }

    async fn refresh_view(&self) -> anyhow::Result<()> {
        debug!("View refresh requested");
        Ok(())
    }
}

/// Unattended runs never approve orphan deletion
struct DeclineAllConfirmation;

#[async_trait::async_trait]
impl IOrphanConfirmation for DeclineAllConfirmation {
    async fn confirm_orphans(&self, batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>> {
        for orphan in batch.iter() {
            warn!(path = %orphan.derivative, kind = %orphan.kind, reason = %orphan.reason, "Orphaned derivative");
        }
        warn!(
            count = batch.len(),
            "Orphans kept; run 'sidekeep scan' to review and remove them"
        );
        Ok(Vec::new())
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Main daemon service wiring the engine to the local store
struct DaemonService {
    /// Application configuration loaded from YAML
    config: Config,
    /// Persisted path → identity map
    repository: Arc<SqliteIdentityRepository>,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the state database for an already loaded configuration
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            for e in &errors {
                error!(field = %e.field, "{}", e.message);
            }
            anyhow::bail!("Invalid configuration ({} error(s))", errors.len());
        }

        let db_path = &config.store.state_db;
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_pool = DatabasePool::new(db_path)
            .await
            .context("Failed to open state database")?;
        let repository = Arc::new(SqliteIdentityRepository::new(db_pool.pool().clone()));

        Ok(Self {
            config,
            repository,
            shutdown,
        })
    }

    /// Runs the daemon until shutdown
    ///
    /// 1. Builds the relationship index from the store listing
    /// 2. Starts the watcher and rebuilds the identity map
    /// 3. Runs the startup revalidation
    /// 4. Enters the tracker loop
    async fn run(&self) -> Result<()> {
        let root = std::fs::canonicalize(&self.config.store.root).with_context(|| {
            format!(
                "Store root not accessible: {}",
                self.config.store.root.display()
            )
        })?;
        let mut config = self.config.clone();
        config.store.root = root.clone();

        let store = Arc::new(LocalFileStore::new(root.clone()));
        let rules = Arc::new(PathRules::from_config(&config));
        let index = RelationshipIndex::shared();
        let notifier: Arc<dyn INotificationService> = Arc::new(LogNotifier);

        let files = store
            .list_all_files()
            .await
            .context("Failed to list store")?;
        let indexed = index.write().await.build_initial(files.iter(), &rules);
        info!(root = %root.display(), files = files.len(), indexed, "Relationship index built");

        let reconciler = Arc::new(EventReconciler::from_config(
            &config,
            store.clone(),
            rules.clone(),
            index.clone(),
            notifier.clone(),
        ));

        let scanner = RevalidationScanner::new(
            &config,
            store.clone(),
            rules.clone(),
            index.clone(),
            notifier,
            Arc::new(DeclineAllConfirmation),
        );

        if !config.external.enabled {
            self.revalidate(&scanner).await;
            info!("External change tracking disabled, idling until shutdown");
            self.shutdown.cancelled().await;
            return Ok(());
        }

        let tracker = ExternalChangeTracker::new(
            &config,
            store,
            rules,
            self.repository.clone(),
            reconciler,
        );

        // Watch first so changes made during the rebuild are queued
        let (mut watcher, rx) = FileWatcher::new(root)?;
        watcher.watch()?;

        tracker
            .rebuild()
            .await
            .context("Failed to rebuild identity map")?;

        self.revalidate(&scanner).await;

        tracker.run(rx, self.shutdown.clone()).await;

        if let Err(e) = watcher.unwatch() {
            debug!(error = %e, "Unwatch failed during shutdown");
        }
        Ok(())
    }

    async fn revalidate(&self, scanner: &RevalidationScanner) {
        match scanner.run().await {
            Ok(report) => info!(
                created = report.created.len(),
                orphans = report.orphans.len(),
                "Startup revalidation completed"
            ),
            Err(e) => error!(error = %e, "Startup revalidation failed"),
        }
    }
}

// ============================================================================
// Configuration and logging
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn load_config(path: &Path) -> Config {
    if path.exists() {
        Config::load_or_default(path)
    } else {
        Config::default()
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = load_config(&path);
    init_tracing(&config.logging.level);

    info!(config_path = %path.display(), "SideKeep daemon starting (sidekeepd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("SideKeep daemon shut down gracefully"),
        Err(e) => error!(error = %e, "SideKeep daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
