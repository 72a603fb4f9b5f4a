//! Scan command - Revalidate the store on demand
//!
//! Provides the `sidekeep scan` CLI command which:
//! 1. Creates missing sidecars for monitored files
//! 2. Lists orphaned derivatives with the reason for each
//! 3. Moves the orphans the user approves to the store trash
//!
//! This is the interactive counterpart of the daemon's startup scan,
//! which never deletes anything on its own.

use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use sidekeep_core::config::Config;
use sidekeep_core::domain::{OrphanBatch, StorePath};
use sidekeep_core::ports::{INotificationService, IOrphanConfirmation, Notification};
use sidekeep_core::{PathRules, RelationshipIndex};
use sidekeep_sync::{LocalFileStore, RevalidationReport, RevalidationScanner};
use tracing::{debug, info, warn};

use super::CommandContext;

/// Arguments for the scan subcommand
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Move every orphan to the trash without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Report orphans but never remove them
    #[arg(long, conflicts_with = "yes")]
    pub keep_orphans: bool,
}

impl ScanCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_valid_config()?;

        let confirmation: Arc<dyn IOrphanConfirmation> = if self.yes {
            Arc::new(ApproveAll)
        } else if self.keep_orphans || ctx.format.is_json() || !std::io::stdin().is_terminal() {
            Arc::new(KeepAll)
        } else {
            Arc::new(PromptConfirmation)
        };

        let notifier = Arc::new(CollectingNotifier::default());
        let report = run_scan(&config, notifier.clone(), confirmation).await?;

        if ctx.format.is_json() {
            formatter.print_json(&report_json(&report));
            return Ok(());
        }

        if report.is_clean() && report.orphans.is_empty() {
            formatter.success("Store is consistent, nothing to do");
            return Ok(());
        }

        formatter.success("Scan completed");
        formatter.list(
            "Created sidecars:",
            &report.created.iter().map(ToString::to_string).collect::<Vec<_>>(),
        );
        formatter.list("Orphans:", &describe_batch(&report.orphans));
        formatter.list(
            "Moved to trash:",
            &report.deleted.iter().map(ToString::to_string).collect::<Vec<_>>(),
        );
        for path in &report.failed {
            formatter.warn(&format!("Could not update {}", path));
        }
        for notice in notifier.take() {
            if notice.category == "error" {
                formatter.warn(&format!("{}: {}", notice.title, notice.body));
            }
        }

        let kept = report.orphans.len().saturating_sub(report.deleted.len());
        if kept > 0 {
            formatter.info("");
            formatter.info(&format!(
                "{} orphan(s) kept. Run 'sidekeep scan --yes' to move them to the trash.",
                kept
            ));
        }

        Ok(())
    }
}

/// Run one revalidation pass against the store named by `config`
pub async fn run_scan(
    config: &Config,
    notifier: Arc<dyn INotificationService>,
    confirmation: Arc<dyn IOrphanConfirmation>,
) -> Result<RevalidationReport> {
    let root = std::fs::canonicalize(&config.store.root).with_context(|| {
        format!(
            "Store root not accessible: {}",
            config.store.root.display()
        )
    })?;
    let mut config = config.clone();
    config.store.root = root.clone();

    info!(root = %root.display(), "Scanning store");

    let scanner = RevalidationScanner::new(
        &config,
        Arc::new(LocalFileStore::new(root)),
        Arc::new(PathRules::from_config(&config)),
        RelationshipIndex::shared(),
        notifier,
        confirmation,
    );

    scanner.run().await.context("Revalidation failed")
}

// ============================================================================
// Presentation
// ============================================================================

/// One line per orphan: path, kind and reason
fn describe_batch(batch: &OrphanBatch) -> Vec<String> {
    batch
        .iter()
        .map(|o| format!("{} ({}, {})", o.derivative, o.kind, o.reason))
        .collect()
}

fn report_json(report: &RevalidationReport) -> serde_json::Value {
    let orphans: Vec<serde_json::Value> = report
        .orphans
        .iter()
        .map(|o| {
            serde_json::json!({
                "path": o.derivative.as_str(),
                "kind": o.kind.to_string(),
                "main": o.main.as_ref().map(StorePath::as_str),
                "reason": o.reason.to_string(),
            })
        })
        .collect();

    serde_json::json!({
        "created": report.created.iter().map(StorePath::as_str).collect::<Vec<_>>(),
        "orphans": orphans,
        "deleted": report.deleted.iter().map(StorePath::as_str).collect::<Vec<_>>(),
        "failed": report.failed.iter().map(StorePath::as_str).collect::<Vec<_>>(),
        "clean": report.is_clean(),
    })
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ============================================================================
// Adapters
// ============================================================================

/// Keeps notices until the report is printed
#[derive(Default)]
struct CollectingNotifier {
    notices: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    fn take(&self) -> Vec<Notification> {
        self.notices
            .lock()
            .map(|mut n| std::mem::take(&mut *n))
            .unwrap_or_default()
    }
}

#[async_trait]
impl INotificationService for CollectingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        debug!(title = %notification.title, category = %notification.category, "Notice");
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notification.clone());
        }
        Ok(())
    }

    async fn refresh_view(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ApproveAll;

#[async_trait]
impl IOrphanConfirmation for ApproveAll {
    async fn confirm_orphans(&self, batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>> {
        Ok(batch.iter().map(|o| o.derivative.clone()).collect())
    }
}

struct KeepAll;

#[async_trait]
impl IOrphanConfirmation for KeepAll {
    async fn confirm_orphans(&self, _batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>> {
        Ok(Vec::new())
    }
}

/// Lists the batch on stderr and asks for one yes/no answer
struct PromptConfirmation;

#[async_trait]
impl IOrphanConfirmation for PromptConfirmation {
    async fn confirm_orphans(&self, batch: &OrphanBatch) -> anyhow::Result<Vec<StorePath>> {
        let lines = describe_batch(batch);
        let count = batch.len();

        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            eprintln!("Orphaned derivatives:");
            for line in &lines {
                eprintln!("  {}", line);
            }
            eprint!("Move {} file(s) to the trash? [y/N] ", count);
            let mut answer = String::new();
            std::io::stdin().read_line(&mut answer)?;
            Ok(answer)
        })
        .await
        .context("Prompt task failed")??;

        if is_affirmative(&answer) {
            Ok(batch.iter().map(|o| o.derivative.clone()).collect())
        } else {
            warn!(count, "Orphan removal declined");
            Ok(Vec::new())
        }
    }
}
