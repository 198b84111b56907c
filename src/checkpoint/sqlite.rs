/*!
SQLite Checkpointer

Async implementation of the [`Checkpointer`](super::Checkpointer) trait over
a `sqlx` SQLite pool.

## Behavior

- Uses the serde persistence model (see `checkpoint::persistence`) for the
  full snapshot, stored as one JSON column; workflow name, sequence number
  and terminal flag are denormalized into columns for querying.
- `save` is an `INSERT OR REPLACE` keyed by instance id, guarded against
  sequence regressions, so idempotent re-saves of the same step are safe.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) run on connect; disabling
  the feature assumes external migration orchestration.

## Database Schema

- `checkpoints.instance_id` ← `checkpoint.instance_id` (primary key)
- `checkpoints.workflow`    ← `checkpoint.workflow`
- `checkpoints.seq`         ← `checkpoint.seq`
- `checkpoints.terminal`    ← `checkpoint.terminal.is_some()`
- `checkpoints.snapshot_json` ← serialized [`InstanceCheckpoint`]
*/

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::persistence::InstanceCheckpoint;
use super::{CheckpointError, Checkpointer, Result};
use crate::types::InstanceId;

/// SQLite-backed checkpointer.
///
/// Storage holds one row per instance (the latest checkpoint); terminal
/// instances keep their final row until [`delete`](Checkpointer::delete) so
/// their outcome stays queryable across restarts.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

/// Resolve the database URL the way the rest of the configuration stack
/// does: explicit URL, then `WARPLOOM_SQLITE_URL`, then a file name from
/// `SQLITE_DB_NAME` (via dotenv), defaulting to `warploom.db`. Ensures the
/// backing file exists so `SqlitePool::connect` does not refuse.
#[must_use]
pub fn resolve_database_url(explicit: Option<&str>) -> String {
    let url = explicit
        .map(str::to_string)
        .or_else(|| std::env::var("WARPLOOM_SQLITE_URL").ok())
        .unwrap_or_else(|| {
            dotenvy::dotenv().ok();
            let name =
                std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "warploom.db".to_string());
            format!("sqlite://{name}")
        });
    if let Some(path) = url.strip_prefix("sqlite://") {
        let path = path.trim();
        if !path.is_empty() && path != ":memory:" {
            let p = std::path::Path::new(path);
            if let Some(parent) = p.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if !p.exists() {
                // Ignore result; if it already exists or we lack permission
                // we proceed and let connect report the real error.
                let _ = std::fs::File::create_new(p);
            }
        }
    }
    url
}

impl SqliteCheckpointer {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `"sqlite://warploom.db"`.
    #[must_use = "checkpointer must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("connect error: {e}"),
            })?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(CheckpointError::Backend {
                    message: format!("migration failure: {e}"),
                });
            }
        }
        #[cfg(not(feature = "sqlite-migrations"))]
        {
            // Feature disabled: assume external migration orchestration
            // already applied the schema.
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait::async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, checkpoint), fields(instance = %checkpoint.instance_id, seq = checkpoint.seq), err)]
    async fn save(&self, checkpoint: InstanceCheckpoint) -> Result<()> {
        let snapshot_json = serde_json::to_string(&checkpoint)
            .map_err(|source| CheckpointError::Serde { source })?;

        // Replace the row unless a newer seq is already stored (recovery
        // racing a live coordinator must not roll state back).
        sqlx::query(
            r#"
            INSERT INTO checkpoints (instance_id, workflow, seq, terminal, snapshot_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(instance_id) DO UPDATE SET
                workflow = excluded.workflow,
                seq = excluded.seq,
                terminal = excluded.terminal,
                snapshot_json = excluded.snapshot_json,
                updated_at = datetime('now')
            WHERE excluded.seq >= checkpoints.seq
            "#,
        )
        .bind(checkpoint.instance_id.as_str())
        .bind(&checkpoint.workflow)
        .bind(checkpoint.seq as i64)
        .bind(i64::from(checkpoint.terminal.is_some()))
        .bind(&snapshot_json)
        .execute(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("save checkpoint: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, instance: &InstanceId) -> Result<Option<InstanceCheckpoint>> {
        let row = sqlx::query("SELECT snapshot_json FROM checkpoints WHERE instance_id = ?1")
            .bind(instance.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("load checkpoint: {e}"),
            })?;
        row.map(|row| {
            let json: String = row.get("snapshot_json");
            serde_json::from_str(&json).map_err(|source| CheckpointError::Serde { source })
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_non_terminal(&self) -> Result<Vec<InstanceCheckpoint>> {
        let rows = sqlx::query(
            "SELECT snapshot_json FROM checkpoints WHERE terminal = 0 ORDER BY updated_at",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("list non-terminal: {e}"),
        })?;
        rows.into_iter()
            .map(|row| {
                let json: String = row.get("snapshot_json");
                serde_json::from_str(&json).map_err(|source| CheckpointError::Serde { source })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, instance: &InstanceId) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE instance_id = ?1")
            .bind(instance.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("delete checkpoint: {e}"),
            })?;
        Ok(())
    }
}
