//! Path rules: derivative naming and folder scope
//!
//! Pure, stateless functions mapping a main file path to its derivative
//! paths and back, plus folder allow/deny evaluation.
//!
//! ## Naming
//!
//! ```text
//! Sidecar   <main>.<sidecar_suffix>.md
//! Redirect  <main>.<redirect_suffix>.md
//! Preview   <main>.<preview_suffix>.<ext>
//! ```
//!
//! `parse` is the exact inverse of `derive` for every valid main path, as
//! long as the three suffix tokens are distinct and none is a monitored
//! extension (enforced by `Config::validate`).

use std::collections::HashSet;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use tracing::{trace, warn};

use crate::config::{normalize_extension, Config, PatternMode};
use crate::domain::{DerivativeInfo, DerivativeKind, DomainError, StorePath};

/// Fixed extension of sidecar and redirect files
pub const NOTE_EXTENSION: &str = "md";

/// Preview extension used when none is given
const FALLBACK_PREVIEW_EXTENSION: &str = "png";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// ============================================================================
// Folder patterns
// ============================================================================

/// A compiled folder allow/deny pattern
#[derive(Debug, Clone)]
pub enum ScopePattern {
    /// Wildcard pattern; `base` is set for `Folder/**` so that `Folder`
    /// itself matches too
    Glob {
        pattern: Pattern,
        base: Option<String>,
    },
    /// Regular expression tested against the folder path
    Regex(Regex),
}

impl ScopePattern {
    /// Test a folder path (`""` is the store root)
    pub fn matches(&self, folder: &str) -> bool {
        match self {
            ScopePattern::Glob { pattern, base } => {
                pattern.matches_with(folder, MATCH_OPTIONS)
                    || base.as_deref().is_some_and(|b| b == folder)
            }
            ScopePattern::Regex(re) => re.is_match(folder),
        }
    }
}

/// Compile a folder pattern in the given mode
///
/// # Errors
/// Returns `DomainError::InvalidPattern` if the pattern does not compile
pub fn compile_pattern(raw: &str, mode: PatternMode) -> Result<ScopePattern, DomainError> {
    let invalid = |reason: String| DomainError::InvalidPattern {
        pattern: raw.to_string(),
        reason,
    };

    match mode {
        PatternMode::Wildcard => {
            // Glob patterns always match the whole folder path, so a leading
            // `/` carries no extra meaning.
            let cleaned = raw.trim().trim_matches('/');
            let pattern = Pattern::new(cleaned).map_err(|e| invalid(e.to_string()))?;
            let base = cleaned
                .strip_suffix("/**")
                .filter(|b| !b.is_empty())
                .map(str::to_string);
            Ok(ScopePattern::Glob { pattern, base })
        }
        PatternMode::Regex => {
            let source = match raw.strip_prefix('/') {
                Some(rest) => format!("^{rest}"),
                None => raw.to_string(),
            };
            let re = Regex::new(&source).map_err(|e| invalid(e.to_string()))?;
            Ok(ScopePattern::Regex(re))
        }
    }
}

fn compile_all(patterns: &[String], mode: PatternMode) -> Vec<ScopePattern> {
    patterns
        .iter()
        .filter_map(|raw| match compile_pattern(raw, mode) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(pattern = %raw, error = %e, "Skipping invalid folder pattern");
                None
            }
        })
        .collect()
}

/// Strip characters that would change the shape of a derived path
fn sanitize_token(token: &str, fallback: &str) -> String {
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, '.' | '/' | '\\'))
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

fn sanitize_extension(ext: &str) -> String {
    normalize_extension(ext)
        .chars()
        .filter(|c| !matches!(c, '.' | '/' | '\\'))
        .collect()
}

// ============================================================================
// PathRules
// ============================================================================

/// Derivative naming and monitoring rules compiled from configuration
#[derive(Debug, Clone)]
pub struct PathRules {
    sidecar_token: String,
    redirect_token: String,
    preview_token: String,
    preview_extensions: Vec<String>,
    extensions: HashSet<String>,
    allow: Vec<ScopePattern>,
    deny: Vec<ScopePattern>,
}

impl PathRules {
    /// Compile rules from configuration
    ///
    /// Invalid folder patterns are logged and skipped.
    pub fn from_config(config: &Config) -> Self {
        let mode = config.monitoring.pattern_mode;
        let derivatives = &config.derivatives;

        let preview_extensions: Vec<String> = derivatives
            .preview_extensions
            .iter()
            .map(|e| sanitize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();

        Self {
            sidecar_token: sanitize_token(&derivatives.sidecar_suffix, "side"),
            redirect_token: sanitize_token(&derivatives.redirect_suffix, "redirect"),
            preview_token: sanitize_token(&derivatives.preview_suffix, "preview"),
            preview_extensions,
            extensions: config.normalized_extensions(),
            allow: compile_all(&config.monitoring.allow_folders, mode),
            deny: compile_all(&config.monitoring.deny_folders, mode),
        }
    }

    fn token(&self, kind: DerivativeKind) -> &str {
        match kind {
            DerivativeKind::Sidecar => &self.sidecar_token,
            DerivativeKind::Redirect => &self.redirect_token,
            DerivativeKind::Preview => &self.preview_token,
        }
    }

    /// Configured preview extensions (lowercase, no dot)
    pub fn preview_extensions(&self) -> &[String] {
        &self.preview_extensions
    }

    /// Compute the derivative path of `main` for `kind`
    ///
    /// `extension` is only used for previews; when absent the first
    /// configured preview extension is used.
    pub fn derive(
        &self,
        main: &StorePath,
        kind: DerivativeKind,
        extension: Option<&str>,
    ) -> StorePath {
        let ext = match kind {
            DerivativeKind::Sidecar | DerivativeKind::Redirect => NOTE_EXTENSION.to_string(),
            DerivativeKind::Preview => extension
                .map(sanitize_extension)
                .filter(|e| !e.is_empty())
                .or_else(|| self.preview_extensions.first().cloned())
                .unwrap_or_else(|| FALLBACK_PREVIEW_EXTENSION.to_string()),
        };
        StorePath::from_normalized(format!("{}.{}.{}", main, self.token(kind), ext))
    }

    /// Recover main path, kind and extension from a derivative path
    ///
    /// Returns `None` if `path` is not named like a derivative.
    pub fn parse(&self, path: &StorePath) -> Option<DerivativeInfo> {
        let ext = path.extension()?;
        let full = path.as_str();
        let without_ext = &full[..full.len() - ext.len() - 1];

        for kind in DerivativeKind::ALL {
            let Some(rest) = without_ext.strip_suffix(self.token(kind)) else {
                continue;
            };
            let Some(main_str) = rest.strip_suffix('.') else {
                continue;
            };
            if main_str.is_empty() || main_str.ends_with('/') {
                continue;
            }

            let extension = if kind.has_fixed_extension() {
                if !ext.eq_ignore_ascii_case(NOTE_EXTENSION) {
                    continue;
                }
                None
            } else {
                Some(ext.to_lowercase())
            };

            let main = StorePath::new(main_str).ok()?;
            trace!(path = %path, main = %main, kind = %kind, "Parsed derivative path");
            return Some(DerivativeInfo {
                main,
                kind,
                extension,
            });
        }

        None
    }

    /// True if `path` is named like a derivative of any kind
    pub fn is_derivative(&self, path: &StorePath) -> bool {
        self.parse(path).is_some()
    }

    /// True if `path` is named like a sidecar
    pub fn is_sidecar(&self, path: &StorePath) -> bool {
        matches!(self.parse(path), Some(info) if info.kind == DerivativeKind::Sidecar)
    }

    /// True if the folder containing `path` matches a deny pattern
    pub fn is_denied(&self, path: &StorePath) -> bool {
        let folder = path.parent();
        self.deny.iter().any(|p| p.matches(folder))
    }

    /// Folder scope check; deny always wins over allow
    pub fn is_in_scope(&self, path: &StorePath) -> bool {
        if self.is_denied(path) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        let folder = path.parent();
        self.allow.iter().any(|p| p.matches(folder))
    }

    /// True if `path` is a main file under the current rules
    ///
    /// Hidden paths are never monitored.
    pub fn is_monitored(&self, path: &StorePath) -> bool {
        if path.is_hidden() || self.is_derivative(path) || !self.is_in_scope(path) {
            return false;
        }
        path.extension()
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }

    /// Every derivative path `main` can have under the current rules
    ///
    /// Previews are listed once per configured preview extension.
    pub fn candidate_derivatives(
        &self,
        main: &StorePath,
    ) -> Vec<(DerivativeKind, Option<String>, StorePath)> {
        let mut out = vec![
            (
                DerivativeKind::Sidecar,
                None,
                self.derive(main, DerivativeKind::Sidecar, None),
            ),
            (
                DerivativeKind::Redirect,
                None,
                self.derive(main, DerivativeKind::Redirect, None),
            ),
        ];
        for ext in &self.preview_extensions {
            out.push((
                DerivativeKind::Preview,
                Some(ext.clone()),
                self.derive(main, DerivativeKind::Preview, Some(ext)),
            ));
        }
        out
    }

    /// Where a sidecar truncated by a plain rename should be moved back to
    ///
    /// `old` must be a sidecar path and `new` a non-derivative name with the
    /// sidecar file extension. The new stem is combined with the old main
    /// file's extension chain and the sidecar suffix, so `photo.png.side.md`
    /// renamed to `holiday.md` is repaired to `holiday.png.side.md`.
    pub fn sidecar_repair_target(&self, old: &StorePath, new: &StorePath) -> Option<StorePath> {
        let info = self.parse(old)?;
        if info.kind != DerivativeKind::Sidecar || self.is_derivative(new) {
            return None;
        }
        if !new
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(NOTE_EXTENSION))
        {
            return None;
        }

        let base = new.stem();
        let name = match info.main.extension_chain() {
            Some(chain) if !base.ends_with(&format!(".{chain}")) => format!("{base}.{chain}"),
            _ => base.to_string(),
        };
        let main = new.with_file_name(&name).ok()?;
        Some(self.derive(&main, DerivativeKind::Sidecar, None))
    }
}
