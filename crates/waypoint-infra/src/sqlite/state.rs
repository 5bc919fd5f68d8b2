//! SQLite workflow state repository (relational backend).
//!
//! Implements `StateRepository` from `waypoint-core` using sqlx with split
//! read/write pools. One row per run; `data` and `history` are JSON text
//! columns. Secondary indexes cover the two list queries and the expiry sweep.

use std::time::Duration;

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;
use waypoint_core::repository::state::StateRepository;
use waypoint_types::error::RepositoryError;
use waypoint_types::workflow::{HistoryEntry, WorkflowData, WorkflowState, WorkflowStatus};

use super::pool::DatabasePool;
use crate::timestamp::{format_timestamp, parse_timestamp};

/// SQLite-backed implementation of `StateRepository`.
pub struct SqliteStateRepository {
    pool: DatabasePool,
    table: String,
    retention_ttl: Duration,
}

impl SqliteStateRepository {
    /// Create a repository over `table_name`.
    ///
    /// The table name is interpolated into SQL, so it must be a plain
    /// identifier. Call [`ensure_schema`](Self::ensure_schema) before use.
    pub fn new(
        pool: DatabasePool,
        table_name: &str,
        retention_ttl: Duration,
    ) -> Result<Self, RepositoryError> {
        validate_identifier(table_name)?;
        Ok(Self {
            pool,
            table: table_name.to_string(),
            retention_ttl,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Create the table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let t = &self.table;
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS {t} (
                    run_id       TEXT PRIMARY KEY NOT NULL,
                    workflow_id  TEXT NOT NULL,
                    current_node TEXT,
                    status       TEXT NOT NULL,
                    data         TEXT NOT NULL,
                    history      TEXT NOT NULL,
                    pause_reason TEXT,
                    started_at   TEXT,
                    paused_at    TEXT,
                    completed_at TEXT,
                    created_at   TEXT NOT NULL,
                    updated_at   TEXT NOT NULL
                )"#
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_workflow_id ON {t} (workflow_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_status ON {t} (status)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_workflow_status ON {t} (workflow_id, status)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_status_updated ON {t} (status, updated_at)"
            ),
        ];

        for sql in &statements {
            sqlx::query(sql)
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tracing::debug!(table = %self.table, "ensured workflow state schema");
        Ok(())
    }

    async fn fetch_list(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY updated_at DESC, run_id DESC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                StateRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_state()
            })
            .collect()
    }
}

/// Reject anything that is not `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<(), RepositoryError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RepositoryError::Query(format!(
            "invalid table name '{name}': expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct StateRow {
    run_id: String,
    workflow_id: String,
    current_node: Option<String>,
    status: String,
    data: String,
    history: String,
    pause_reason: Option<String>,
    started_at: Option<String>,
    paused_at: Option<String>,
    completed_at: Option<String>,
}

impl StateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            workflow_id: row.try_get("workflow_id")?,
            current_node: row.try_get("current_node")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            history: row.try_get("history")?,
            pause_reason: row.try_get("pause_reason")?,
            started_at: row.try_get("started_at")?,
            paused_at: row.try_get("paused_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_state(self) -> Result<WorkflowState, RepositoryError> {
        let run_id = Uuid::parse_str(&self.run_id)
            .map_err(|e| RepositoryError::Query(format!("invalid run_id: {e}")))?;
        let status: WorkflowStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let data: WorkflowData = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Query(format!("invalid data JSON: {e}")))?;
        let history: Vec<HistoryEntry> = serde_json::from_str(&self.history)
            .map_err(|e| RepositoryError::Query(format!("invalid history JSON: {e}")))?;

        Ok(WorkflowState {
            workflow_id: self.workflow_id,
            run_id,
            current_node: self.current_node,
            status,
            data,
            history,
            pause_reason: self.pause_reason,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            paused_at: self.paused_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// StateRepository implementation
// ---------------------------------------------------------------------------

impl StateRepository for SqliteStateRepository {
    async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
        let now = format_timestamp(&Utc::now());
        let data = serde_json::to_string(&state.data)?;
        let history = serde_json::to_string(&state.history)?;

        let sql = format!(
            r#"INSERT INTO {} (run_id, workflow_id, current_node, status, data, history,
                   pause_reason, started_at, paused_at, completed_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (run_id) DO UPDATE SET
                   workflow_id = excluded.workflow_id,
                   current_node = excluded.current_node,
                   status = excluded.status,
                   data = excluded.data,
                   history = excluded.history,
                   pause_reason = excluded.pause_reason,
                   started_at = excluded.started_at,
                   paused_at = excluded.paused_at,
                   completed_at = excluded.completed_at,
                   updated_at = excluded.updated_at"#,
            self.table
        );

        sqlx::query(&sql)
            .bind(state.run_id.to_string())
            .bind(&state.workflow_id)
            .bind(&state.current_node)
            .bind(state.status.as_str())
            .bind(&data)
            .bind(&history)
            .bind(&state.pause_reason)
            .bind(state.started_at.as_ref().map(format_timestamp))
            .bind(state.paused_at.as_ref().map(format_timestamp))
            .bind(state.completed_at.as_ref().map(format_timestamp))
            .bind(&now)
            .bind(&now)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn find(&self, run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        let sql = format!("SELECT * FROM {} WHERE run_id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let state_row =
                    StateRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(state_row.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.fetch_list("workflow_id", workflow_id).await
    }

    async fn find_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.fetch_list("status", status.as_str()).await
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let sql = format!("DELETE FROM {} WHERE run_id = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self) -> Result<u64, RepositoryError> {
        let ttl = chrono::Duration::from_std(self.retention_ttl)
            .map_err(|e| RepositoryError::Query(format!("invalid retention ttl: {e}")))?;
        let cutoff = format_timestamp(&(Utc::now() - ttl));

        let sql = format!(
            "DELETE FROM {} WHERE status IN (?, ?, ?) AND updated_at < ?",
            self.table
        );
        let [a, b, c] = WorkflowStatus::TERMINAL;
        let result = sqlx::query(&sql)
            .bind(a.as_str())
            .bind(b.as_str())
            .bind(c.as_str())
            .bind(&cutoff)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(table = %self.table, removed, "deleted expired workflow states");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    async fn test_repo(ttl: StdDuration) -> SqliteStateRepository {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        let pool = DatabasePool::new(&url).await.unwrap();
        let repo = SqliteStateRepository::new(pool, "workflow_states", ttl).unwrap();
        repo.ensure_schema().await.unwrap();
        repo
    }

    fn sample_state(workflow_id: &str) -> WorkflowState {
        let mut data = WorkflowData::new();
        data.insert("order".to_string(), json!({"id": 42, "lines": [1.5, 2.25]}));
        WorkflowState::new(workflow_id, "a")
            .merge(&data)
            .add_history(HistoryEntry::success(
                "a",
                json!({"seed": true}),
                Some(json!({"ok": 1})),
                StdDuration::from_micros(1234),
            ))
            .advance_to("b")
            .unwrap()
    }

    async fn backdate(repo: &SqliteStateRepository, run_id: &Uuid, age: chrono::Duration) {
        let sql = format!("UPDATE {} SET updated_at = ? WHERE run_id = ?", repo.table_name());
        sqlx::query(&sql)
            .bind(format_timestamp(&(Utc::now() - age)))
            .bind(run_id.to_string())
            .execute(&repo.pool().writer)
            .await
            .unwrap();
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("workflow_states").is_ok());
        assert!(validate_identifier("_runs2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2runs").is_err());
        assert!(validate_identifier("runs; DROP TABLE x").is_err());
        assert!(validate_identifier("runs-table").is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_bad_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();

        let result = SqliteStateRepository::new(pool, "bad name", StdDuration::from_secs(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_find_roundtrip() {
        let repo = test_repo(StdDuration::from_secs(60)).await;
        let state = sample_state("wf-1");

        repo.save(&state).await.unwrap();
        let found = repo.find(&state.run_id).await.unwrap().unwrap();
        assert_eq!(found, state);
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let repo = test_repo(StdDuration::from_secs(60)).await;
        assert!(repo.find(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_idempotent_upsert() {
        let repo = test_repo(StdDuration::from_secs(60)).await;
        let state = sample_state("wf-1");

        repo.save(&state).await.unwrap();
        repo.save(&state).await.unwrap();
        assert_eq!(repo.find_by_workflow("wf-1").await.unwrap(), vec![state.clone()]);

        let paused = state.pause("waiting", None).unwrap();
        repo.save(&paused).await.unwrap();
        let found = repo.find(&state.run_id).await.unwrap().unwrap();
        assert_eq!(found.status, WorkflowStatus::Paused);
        assert_eq!(found, paused);
    }

    #[tokio::test]
    async fn test_list_queries_filter_and_order_newest_first() {
        let repo = test_repo(StdDuration::from_secs(60)).await;
        let first = sample_state("wf-1");
        let second = sample_state("wf-1");
        let other = sample_state("wf-2").complete().unwrap();

        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();
        repo.save(&other).await.unwrap();
        backdate(&repo, &first.run_id, chrono::Duration::seconds(30)).await;

        let runs: Vec<Uuid> = repo
            .find_by_workflow("wf-1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.run_id)
            .collect();
        assert_eq!(runs, vec![second.run_id, first.run_id]);

        let running = repo.find_by_status(WorkflowStatus::Running).await.unwrap();
        assert_eq!(running.len(), 2);
        let completed = repo.find_by_status(WorkflowStatus::Completed).await.unwrap();
        assert_eq!(completed, vec![other]);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = test_repo(StdDuration::from_secs(60)).await;
        let state = sample_state("wf-1");
        repo.save(&state).await.unwrap();

        assert!(repo.delete(&state.run_id).await.unwrap());
        assert!(!repo.delete(&state.run_id).await.unwrap());
        assert!(repo.find(&state.run_id).await.unwrap().is_none());
        assert!(repo.find_by_workflow("wf-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_expired_only_removes_old_terminal_runs() {
        let repo = test_repo(StdDuration::from_secs(1)).await;
        let old_done = sample_state("wf-1").complete().unwrap();
        let fresh_done = sample_state("wf-1").fail().unwrap();
        let old_running = sample_state("wf-1");

        for state in [&old_done, &fresh_done, &old_running] {
            repo.save(state).await.unwrap();
        }
        backdate(&repo, &old_done.run_id, chrono::Duration::seconds(10)).await;
        backdate(&repo, &old_running.run_id, chrono::Duration::seconds(10)).await;

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert!(repo.find(&old_done.run_id).await.unwrap().is_none());
        assert!(repo.find(&fresh_done.run_id).await.unwrap().is_some());
        assert!(repo.find(&old_running.run_id).await.unwrap().is_some());
        assert_eq!(repo.delete_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_custom_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let repo =
            SqliteStateRepository::new(pool.clone(), "billing_runs", StdDuration::from_secs(60))
                .unwrap();
        repo.ensure_schema().await.unwrap();
        repo.ensure_schema().await.unwrap();

        let state = sample_state("wf-bill");
        repo.save(&state).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM billing_runs")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
