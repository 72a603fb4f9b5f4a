//! Check command - Explain how SideKeep treats a path
//!
//! Provides the `sidekeep check <path>` CLI command which reports whether
//! a path is a monitored main file, a derivative (and of which main file),
//! or ignored, together with the derivative slots and what occupies them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use sidekeep_core::domain::{DerivativeKind, OrphanReason, StorePath};
use sidekeep_core::ports::IFileStore;
use sidekeep_core::PathRules;
use sidekeep_sync::LocalFileStore;
use tracing::info;

use super::CommandContext;

/// Arguments for the check subcommand
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// File to check: absolute, relative to the current directory, or
    /// relative to the store root
    pub path: String,
}

/// What a path is under the current rules
#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Main,
    Derivative {
        main: StorePath,
        kind: DerivativeKind,
    },
    Ignored(&'static str),
}

/// One derivative slot of a main file
struct Slot {
    kind: DerivativeKind,
    path: StorePath,
    exists: bool,
}

impl CheckCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        let root = std::fs::canonicalize(&config.store.root).with_context(|| {
            format!(
                "Store root not accessible: {}",
                config.store.root.display()
            )
        })?;
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let path = resolve(&self.path, &root, &cwd)?;

        info!(path = %path, "Checking path");

        let rules = PathRules::from_config(&config);
        let store = LocalFileStore::new(root);
        let state = store.stat(&path).await?;
        let role = classify(&rules, &path);

        let mut slots = Vec::new();
        let mut orphan = None;
        match &role {
            Role::Main => {
                for (kind, _, candidate) in rules.candidate_derivatives(&path) {
                    let exists = store.stat(&candidate).await?.exists;
                    slots.push(Slot {
                        kind,
                        path: candidate,
                        exists,
                    });
                }
            }
            Role::Derivative { main, .. } => {
                let main_state = store.stat(main).await?;
                orphan = if !main_state.exists {
                    Some(OrphanReason::MainMissing)
                } else if main_state.is_directory() {
                    Some(OrphanReason::MainIsFolder)
                } else if !rules.is_monitored(main) {
                    Some(OrphanReason::NoLongerMonitored)
                } else {
                    None
                };
            }
            Role::Ignored(_) => {}
        }

        if ctx.format.is_json() {
            let (role_name, main, kind, reason) = match &role {
                Role::Main => ("main", None, None, None),
                Role::Derivative { main, kind } => (
                    "derivative",
                    Some(main.as_str()),
                    Some(kind.to_string()),
                    None,
                ),
                Role::Ignored(reason) => ("ignored", None, None, Some(*reason)),
            };
            let slots_json: Vec<serde_json::Value> = slots
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "kind": s.kind.to_string(),
                        "path": s.path.as_str(),
                        "exists": s.exists,
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "path": path.as_str(),
                "exists": state.exists,
                "role": role_name,
                "kind": kind,
                "main": main,
                "ignored_because": reason,
                "orphan_reason": orphan.map(|r| r.to_string()),
                "derivatives": slots_json,
            }));
            return Ok(());
        }

        if !state.exists {
            formatter.warn(&format!("{} does not exist", path));
        }
        match &role {
            Role::Main => {
                formatter.success(&format!("{} is a monitored file", path));
                let lines: Vec<String> = slots
                    .iter()
                    .map(|s| {
                        let mark = if s.exists { "present" } else { "absent" };
                        format!("{:<8} {} ({})", s.kind.to_string(), s.path, mark)
                    })
                    .collect();
                formatter.list("Derivatives:", &lines);
            }
            Role::Derivative { main, kind } => {
                formatter.success(&format!("{} is the {} of {}", path, kind, main));
                match orphan {
                    Some(reason) => formatter.warn(&format!("Orphaned: {}", reason)),
                    None => formatter.info("Main file present and monitored"),
                }
            }
            Role::Ignored(reason) => {
                formatter.info(&format!("{} is ignored: {}", path, reason));
            }
        }

        Ok(())
    }
}

/// Turn a command-line path into a store path
///
/// Absolute paths must lie under `root`. Relative paths are taken from
/// `cwd` when it is inside the store, otherwise from the store root.
fn resolve(arg: &str, root: &Path, cwd: &Path) -> Result<StorePath> {
    let raw = PathBuf::from(arg);
    if raw.is_absolute() {
        let absolute = std::fs::canonicalize(&raw).unwrap_or(raw);
        return StorePath::from_absolute(&absolute, root)
            .with_context(|| format!("{} is not inside the store", arg));
    }

    let cwd = std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    if cwd.starts_with(root) {
        if let Ok(path) = StorePath::from_absolute(&cwd.join(&raw), root) {
            return Ok(path);
        }
    }
    StorePath::new(arg).with_context(|| format!("Invalid store path: {}", arg))
}

fn classify(rules: &PathRules, path: &StorePath) -> Role {
    if let Some(info) = rules.parse(path) {
        return Role::Derivative {
            main: info.main,
            kind: info.kind,
        };
    }
    if path.is_hidden() {
        Role::Ignored("hidden path")
    } else if rules.is_denied(path) {
        Role::Ignored("folder is denied")
    } else if !rules.is_in_scope(path) {
        Role::Ignored("folder is not allowed")
    } else if !rules.is_monitored(path) {
        Role::Ignored("extension is not monitored")
    } else {
        Role::Main
    }
}
