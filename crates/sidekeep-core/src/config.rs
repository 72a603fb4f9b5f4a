//! Configuration module for SideKeep.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for SideKeep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub monitoring: MonitoringConfig,
    pub derivatives: DerivativesConfig,
    pub timing: TimingConfig,
    pub external: ExternalConfig,
    pub logging: LoggingConfig,
}

/// Location of the file store and local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the file store.
    pub root: PathBuf,
    /// SQLite database holding the persisted identity map.
    pub state_db: PathBuf,
}

/// How folder allow/deny patterns are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    /// `*` matches within one folder level, `**` across levels.
    #[default]
    Wildcard,
    /// Full regular expressions; a leading `/` anchors at the store root.
    Regex,
}

/// Which files count as main files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Monitored extensions (case-insensitive, leading dot optional).
    pub extensions: Vec<String>,
    pub pattern_mode: PatternMode,
    /// Folders whose files are monitored; empty means all folders.
    pub allow_folders: Vec<String>,
    /// Folders whose files are never monitored; overrides `allow_folders`.
    pub deny_folders: Vec<String>,
}

/// Naming and creation of derivative files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesConfig {
    pub sidecar_suffix: String,
    pub redirect_suffix: String,
    pub preview_suffix: String,
    /// Preview extensions followed when a main file moves.
    pub preview_extensions: Vec<String>,
    /// Create a sidecar automatically for every new main file.
    pub auto_create_sidecar: bool,
    /// Store path of a file whose content seeds new sidecars.
    pub sidecar_template: Option<String>,
}

/// Timing windows, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Identical renames within this window count as one.
    pub duplicate_rename_window_ms: u64,
    /// Delete + create with the same identity within this window is a rename.
    pub correlation_window_ms: u64,
    /// Quiet period before a view refresh is issued.
    pub refresh_debounce_ms: u64,
    /// Derivative renames after a bulk move are only re-indexed.
    pub bulk_move_window_ms: u64,
    /// How long a self-moved path ignores its delete notification.
    pub restore_suppression_ms: u64,
}

/// Watching the store for changes made by external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub enabled: bool,
    /// Forward genuine external creates to the reconciler.
    pub forward_creates: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/sidekeep/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("sidekeep")
            .join("config.yaml")
    }

    /// Monitored extensions normalized to lowercase without a leading dot.
    pub fn normalized_extensions(&self) -> HashSet<String> {
        self.monitoring
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect()
    }
}

/// Lowercase an extension and strip surrounding whitespace and a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl TimingConfig {
    pub fn duplicate_rename_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_rename_window_ms)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn bulk_move_window(&self) -> Duration {
        Duration::from_millis(self.bulk_move_window_ms)
    }

    pub fn restore_suppression(&self) -> Duration {
        Duration::from_millis(self.restore_suppression_ms)
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("sidekeep");
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Notes"),
            state_db: data_dir.join("state.db"),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "pdf".to_string(),
            ],
            pattern_mode: PatternMode::Wildcard,
            allow_folders: Vec::new(),
            deny_folders: Vec::new(),
        }
    }
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            sidecar_suffix: "side".to_string(),
            redirect_suffix: "redirect".to_string(),
            preview_suffix: "preview".to_string(),
            preview_extensions: vec!["png".to_string(), "svg".to_string()],
            auto_create_sidecar: true,
            sidecar_template: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            duplicate_rename_window_ms: 25,
            correlation_window_ms: 2000,
            refresh_debounce_ms: 50,
            bulk_move_window_ms: 500,
            restore_suppression_ms: 2000,
        }
    }
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forward_creates: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"derivatives.sidecar_suffix"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- store ---
        let root_str = self.store.root.to_string_lossy();
        if !root_str.starts_with('~') && !self.store.root.is_dir() {
            errors.push(ValidationError {
                field: "store.root".into(),
                message: format!("directory does not exist: {}", self.store.root.display()),
            });
        }

        // --- monitoring ---
        let extensions = self.normalized_extensions();
        if extensions.is_empty() {
            errors.push(ValidationError {
                field: "monitoring.extensions".into(),
                message: "at least one extension must be monitored".into(),
            });
        }

        for (field, patterns) in [
            ("monitoring.allow_folders", &self.monitoring.allow_folders),
            ("monitoring.deny_folders", &self.monitoring.deny_folders),
        ] {
            for pattern in patterns {
                if let Err(e) = crate::rules::compile_pattern(pattern, self.monitoring.pattern_mode)
                {
                    errors.push(ValidationError {
                        field: field.into(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // --- derivatives ---
        let suffixes = [
            ("derivatives.sidecar_suffix", &self.derivatives.sidecar_suffix),
            ("derivatives.redirect_suffix", &self.derivatives.redirect_suffix),
            ("derivatives.preview_suffix", &self.derivatives.preview_suffix),
        ];
        let mut seen = HashSet::new();
        for (field, suffix) in suffixes {
            if suffix.is_empty() {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must not be empty".into(),
                });
                continue;
            }
            if suffix.contains('.') || suffix.contains('/') || suffix.contains('\\') {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("'{suffix}' must not contain '.', '/' or '\\'"),
                });
            }
            if extensions.contains(&suffix.to_lowercase()) {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("'{suffix}' collides with a monitored extension"),
                });
            }
            if !seen.insert(suffix.to_lowercase()) {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("'{suffix}' is used by another derivative kind"),
                });
            }
        }

        if self
            .derivatives
            .preview_extensions
            .iter()
            .any(|e| normalize_extension(e).is_empty())
        {
            errors.push(ValidationError {
                field: "derivatives.preview_extensions".into(),
                message: "extensions must not be empty".into(),
            });
        }

        if let Some(template) = &self.derivatives.sidecar_template {
            if crate::domain::StorePath::new(template.as_str()).is_err() {
                errors.push(ValidationError {
                    field: "derivatives.sidecar_template".into(),
                    message: format!("not a valid store path: '{template}'"),
                });
            }
        }

        // --- timing ---
        for (field, value) in [
            (
                "timing.duplicate_rename_window_ms",
                self.timing.duplicate_rename_window_ms,
            ),
            ("timing.correlation_window_ms", self.timing.correlation_window_ms),
            ("timing.refresh_debounce_ms", self.timing.refresh_debounce_ms),
            ("timing.bulk_move_window_ms", self.timing.bulk_move_window_ms),
            ("timing.restore_suppression_ms", self.timing.restore_suppression_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use sidekeep_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .store_root(PathBuf::from("/home/user/Notes"))
///     .extensions(["png", "pdf"])
///     .sidecar_suffix("side")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- store ---

    pub fn store_root(mut self, root: PathBuf) -> Self {
        self.config.store.root = root;
        self
    }

    pub fn state_db(mut self, path: PathBuf) -> Self {
        self.config.store.state_db = path;
        self
    }

    // --- monitoring ---

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.monitoring.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn pattern_mode(mut self, mode: PatternMode) -> Self {
        self.config.monitoring.pattern_mode = mode;
        self
    }

    pub fn allow_folder(mut self, pattern: impl Into<String>) -> Self {
        self.config.monitoring.allow_folders.push(pattern.into());
        self
    }

    pub fn deny_folder(mut self, pattern: impl Into<String>) -> Self {
        self.config.monitoring.deny_folders.push(pattern.into());
        self
    }

    // --- derivatives ---

    pub fn sidecar_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.derivatives.sidecar_suffix = suffix.into();
        self
    }

    pub fn redirect_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.derivatives.redirect_suffix = suffix.into();
        self
    }

    pub fn preview_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.derivatives.preview_suffix = suffix.into();
        self
    }

    pub fn preview_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.derivatives.preview_extensions =
            extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn auto_create_sidecar(mut self, enabled: bool) -> Self {
        self.config.derivatives.auto_create_sidecar = enabled;
        self
    }

    pub fn sidecar_template(mut self, template: impl Into<String>) -> Self {
        self.config.derivatives.sidecar_template = Some(template.into());
        self
    }

    // --- timing ---

    pub fn duplicate_rename_window_ms(mut self, ms: u64) -> Self {
        self.config.timing.duplicate_rename_window_ms = ms;
        self
    }

    pub fn correlation_window_ms(mut self, ms: u64) -> Self {
        self.config.timing.correlation_window_ms = ms;
        self
    }

    pub fn refresh_debounce_ms(mut self, ms: u64) -> Self {
        self.config.timing.refresh_debounce_ms = ms;
        self
    }

    pub fn bulk_move_window_ms(mut self, ms: u64) -> Self {
        self.config.timing.bulk_move_window_ms = ms;
        self
    }

    pub fn restore_suppression_ms(mut self, ms: u64) -> Self {
        self.config.timing.restore_suppression_ms = ms;
        self
    }

    // --- external ---

    pub fn external_enabled(mut self, enabled: bool) -> Self {
        self.config.external.enabled = enabled;
        self
    }

    pub fn forward_creates(mut self, enabled: bool) -> Self {
        self.config.external.forward_creates = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
