//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including store path validation and folder pattern compilation.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid store path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the configured store root
    #[error("Path not within store root: {0}")]
    PathNotInStore(String),

    /// A folder scope pattern failed to compile
    #[error("Invalid folder pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as written in the configuration
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
