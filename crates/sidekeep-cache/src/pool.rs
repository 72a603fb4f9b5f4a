//! Database connection pool management
//!
//! Wraps SQLx's SqlitePool with:
//! - Automatic directory creation for the state database
//! - WAL journal mode so the CLI can read while the daemon writes
//! - Schema migration on connect
//! - In-memory mode for testing

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Migrations applied in order on every connect; each is idempotent
const MIGRATIONS: &[(&str, &str)] = &[(
    "20261019_identities",
    include_str!("migrations/20261019_identities.sql"),
)];

/// Pool of SQLite connections to the SideKeep state database
///
/// - WAL journal mode
/// - 5 max connections for file-based databases
/// - 1 connection for in-memory databases (each connection is its own database)
/// - 5-second busy timeout to handle write contention
#[derive(Debug)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open (or create) the database at `db_path` and migrate it
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established,
    /// or `CacheError::MigrationFailed` if schema migrations fail.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "State database opened");

        Ok(Self { pool })
    }

    /// Creates an in-memory database pool for testing
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established,
    /// or `CacheError::MigrationFailed` if schema migrations fail.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory state database initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), CacheError> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql).execute(pool).await.map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to run migration {}: {}", name, e))
            })?;
            tracing::trace!(migration = name, "Applied migration");
        }

        tracing::debug!("Database migrations completed");
        Ok(())
    }
}
