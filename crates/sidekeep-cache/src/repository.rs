//! SQLite implementation of IIdentityRepository
//!
//! | Domain value   | SQL Type | Strategy                         |
//! |----------------|----------|----------------------------------|
//! | absolute path  | TEXT     | `to_string_lossy()` / `PathBuf::from` |
//! | identity (u64) | INTEGER  | bit-cast to `i64`                |
//! | updated_at     | TEXT     | RFC 3339                         |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use sidekeep_core::ports::IIdentityRepository;

/// SQLite-backed identity map
pub struct SqliteIdentityRepository {
    pool: SqlitePool,
}

impl SqliteIdentityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// Inode numbers use the full u64 range; SQLite integers are signed.
fn identity_to_sql(identity: u64) -> i64 {
    identity as i64
}

fn identity_from_sql(value: i64) -> u64 {
    value as u64
}

fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait::async_trait]
impl IIdentityRepository for SqliteIdentityRepository {
    async fn load_all(&self) -> anyhow::Result<HashMap<PathBuf, u64>> {
        let rows = sqlx::query("SELECT path, identity FROM file_identities")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = HashMap::with_capacity(rows.len());
        for row in &rows {
            let path: String = row.try_get("path")?;
            let identity: i64 = row.try_get("identity")?;
            entries.insert(PathBuf::from(path), identity_from_sql(identity));
        }

        tracing::trace!(count = entries.len(), "Loaded identity map");
        Ok(entries)
    }

    async fn upsert(&self, path: &Path, identity: u64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO file_identities (path, identity, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(path) DO UPDATE SET identity = excluded.identity, \
             updated_at = excluded.updated_at",
        )
        .bind(path_to_sql(path))
        .bind(identity_to_sql(identity))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(path = %path.display(), identity, "Saved identity");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM file_identities WHERE path = ?")
            .bind(path_to_sql(path))
            .execute(&self.pool)
            .await?;

        tracing::trace!(path = %path.display(), "Removed identity");
        Ok(())
    }

    async fn replace_all(&self, entries: &HashMap<PathBuf, u64>) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM file_identities")
            .execute(&mut *tx)
            .await?;
        for (path, identity) in entries {
            sqlx::query(
                "INSERT INTO file_identities (path, identity, updated_at) VALUES (?, ?, ?)",
            )
            .bind(path_to_sql(path))
            .bind(identity_to_sql(*identity))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(count = entries.len(), "Replaced identity map");
        Ok(())
    }
}
