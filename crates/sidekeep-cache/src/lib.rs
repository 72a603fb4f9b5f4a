//! SideKeep Cache - Local state persistence
//!
//! SQLite-based storage for the path → stable identity map the external
//! change tracker uses to correlate renames across restarts.
//!
//! ## Architecture
//!
//! This crate implements the `IIdentityRepository` port from `sidekeep-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteIdentityRepository`] - `IIdentityRepository` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use sidekeep_cache::{DatabasePool, SqliteIdentityRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/sidekeep/state.db")).await?;
//! let repo = SqliteIdentityRepository::new(pool.pool().clone());
//! // Use repo as IIdentityRepository...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteIdentityRepository;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
