//! Config command - View and manage SideKeep configuration
//!
//! Provides the `sidekeep config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors
//! 4. Prints the configuration file location

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use sidekeep_core::config::{Config, PatternMode};
use tracing::info;

use super::CommandContext;

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "timing.correlation_window_ms")
        key: String,
        /// New value; lists are comma-separated
        value: String,
    },
    /// Validate configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

/// Keys accepted by `config set`, with a short description
const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("store.root", "Store root directory"),
    ("store.state_db", "Identity database path"),
    ("monitoring.extensions", "Monitored extensions, comma-separated"),
    ("monitoring.pattern_mode", "wildcard|regex"),
    ("monitoring.allow_folders", "Allowed folder patterns, comma-separated"),
    ("monitoring.deny_folders", "Denied folder patterns, comma-separated"),
    ("derivatives.sidecar_suffix", "Sidecar token"),
    ("derivatives.redirect_suffix", "Redirect token"),
    ("derivatives.preview_suffix", "Preview token"),
    ("derivatives.preview_extensions", "Preview extensions, comma-separated"),
    ("derivatives.auto_create_sidecar", "true|false"),
    ("derivatives.sidecar_template", "Template store path, or 'none'"),
    ("timing.duplicate_rename_window_ms", "Milliseconds"),
    ("timing.correlation_window_ms", "Milliseconds"),
    ("timing.refresh_debounce_ms", "Milliseconds"),
    ("timing.bulk_move_window_ms", "Milliseconds"),
    ("timing.restore_suppression_ms", "Milliseconds"),
    ("external.enabled", "true|false"),
    ("external.forward_creates", "true|false"),
    ("logging.level", "trace|debug|info|warn|error"),
];

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx).await,
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value).await,
            ConfigCommand::Validate => self.execute_validate(ctx).await,
            ConfigCommand::Path => {
                let formatter = ctx.formatter();
                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "config_path": ctx.config_path.display().to_string(),
                        "exists": ctx.config_path.exists(),
                    }));
                } else {
                    println!("{}", ctx.config_path.display());
                }
                Ok(())
            }
        }
    }

    async fn execute_show(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.format.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
            formatter.info("");

            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    async fn execute_set(&self, ctx: &CommandContext, key: &str, value: &str) -> Result<()> {
        let formatter = ctx.formatter();
        let mut config = ctx.load_config()?;

        info!(key = %key, value = %value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "error": e.to_string(),
                }));
            } else {
                formatter.error(&format!("Failed to set '{}': {}", key, e));
                formatter.info("");
                formatter.info("Supported keys:");
                for (name, description) in SUPPORTED_KEYS {
                    formatter.info(&format!("  {:<36} - {}", name, description));
                }
            }
            return Ok(());
        }

        // The store root may be created after it is configured
        let errors: Vec<String> = config
            .validate()
            .iter()
            .filter(|e| e.field != "store.root")
            .map(ToString::to_string)
            .collect();

        if !errors.is_empty() {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "errors": errors,
                }));
            } else {
                formatter.error(&format!(
                    "Invalid value for '{}': {}",
                    key,
                    errors.join("; ")
                ));
            }
            return Ok(());
        }

        if let Some(parent) = ctx.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create configuration directory")?;
        }
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
        std::fs::write(&ctx.config_path, yaml).context("Failed to write configuration file")?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": ctx.config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {} = {}", key, value));
            formatter.info(&format!("Saved to {}", ctx.config_path.display()));
        }

        Ok(())
    }

    async fn execute_validate(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config_path = &ctx.config_path;

        if !config_path.exists() {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": ["Configuration file not found. Using defaults."],
                }));
            } else {
                formatter.info(&format!(
                    "Configuration file not found at {}",
                    config_path.display()
                ));
                formatter.info(
                    "Using default configuration. Run 'sidekeep config set <key> <value>' to create one.",
                );
            }
            return Ok(());
        }

        let config = match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                if ctx.format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {}", e)],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {}", e));
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");

        let errors = config.validate();

        if ctx.format.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => anyhow::bail!("Expected true or false for {}", key),
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("Expected a positive integer for {}", key))
}

/// Apply a dot-notation key/value pair to a Config struct
///
/// See [`SUPPORTED_KEYS`] for the accepted keys.
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- store ---
        "store.root" => config.store.root = PathBuf::from(value),
        "store.state_db" => config.store.state_db = PathBuf::from(value),

        // --- monitoring ---
        "monitoring.extensions" => config.monitoring.extensions = parse_list(value),
        "monitoring.pattern_mode" => {
            config.monitoring.pattern_mode = match value.to_lowercase().as_str() {
                "wildcard" => PatternMode::Wildcard,
                "regex" => PatternMode::Regex,
                _ => anyhow::bail!("Expected wildcard or regex for {}", key),
            };
        }
        "monitoring.allow_folders" => config.monitoring.allow_folders = parse_list(value),
        "monitoring.deny_folders" => config.monitoring.deny_folders = parse_list(value),

        // --- derivatives ---
        "derivatives.sidecar_suffix" => config.derivatives.sidecar_suffix = value.to_string(),
        "derivatives.redirect_suffix" => config.derivatives.redirect_suffix = value.to_string(),
        "derivatives.preview_suffix" => config.derivatives.preview_suffix = value.to_string(),
        "derivatives.preview_extensions" => {
            config.derivatives.preview_extensions = parse_list(value);
        }
        "derivatives.auto_create_sidecar" => {
            config.derivatives.auto_create_sidecar = parse_bool(key, value)?;
        }
        "derivatives.sidecar_template" => {
            config.derivatives.sidecar_template = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }

        // --- timing ---
        "timing.duplicate_rename_window_ms" => {
            config.timing.duplicate_rename_window_ms = parse_ms(key, value)?;
        }
        "timing.correlation_window_ms" => {
            config.timing.correlation_window_ms = parse_ms(key, value)?;
        }
        "timing.refresh_debounce_ms" => config.timing.refresh_debounce_ms = parse_ms(key, value)?,
        "timing.bulk_move_window_ms" => config.timing.bulk_move_window_ms = parse_ms(key, value)?,
        "timing.restore_suppression_ms" => {
            config.timing.restore_suppression_ms = parse_ms(key, value)?;
        }

        // --- external ---
        "external.enabled" => config.external.enabled = parse_bool(key, value)?,
        "external.forward_creates" => config.external.forward_creates = parse_bool(key, value)?,

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),

        _ => anyhow::bail!("Unknown configuration key: '{}'", key),
    }

    Ok(())
}
