pub mod check;
pub mod completions;
pub mod config;
pub mod scan;

use std::path::PathBuf;

use anyhow::{Context, Result};
use sidekeep_core::config::Config;
use tracing::debug;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl CommandContext {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    /// Load the configuration file; a missing file yields the defaults
    ///
    /// A file that exists but does not parse is an error, unlike the
    /// daemon which falls back silently.
    pub fn load_config(&self) -> Result<Config> {
        if !self.config_path.exists() {
            debug!(config_path = %self.config_path.display(), "No configuration file, using defaults");
            return Ok(Config::default());
        }
        Config::load(&self.config_path).with_context(|| {
            format!(
                "Failed to load configuration from {}",
                self.config_path.display()
            )
        })
    }

    /// Load the configuration and refuse to continue if it is invalid
    pub fn load_valid_config(&self) -> Result<Config> {
        let config = self.load_config()?;
        let errors = config.validate();
        if !errors.is_empty() {
            let formatter = self.formatter();
            for e in &errors {
                formatter.error(&e.to_string());
            }
            anyhow::bail!("Invalid configuration ({} error(s))", errors.len());
        }
        Ok(config)
    }
}
