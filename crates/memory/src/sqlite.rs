//! SQLite session persister.
//!
//! One row per session in `agent_sessions`. Scalar fields get their own
//! columns so listings can filter and order in SQL; the composite parts
//! (messages, tool calls, pending action, plan) are stored as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use weaver_core::error::StoreError;
use weaver_core::persist::SessionPersister;
use weaver_core::session::SessionSnapshot;

pub struct SqlitePersister {
    pool: SqlitePool,
}

impl SqlitePersister {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is pinned to a
    /// single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let ephemeral = path.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if ephemeral { 1 } else { 4 });
        if ephemeral {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let persister = Self { pool };
        persister.run_migrations().await?;
        info!("SQLite session persister initialized at {path}");
        Ok(persister)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let persister = Self { pool };
        persister.run_migrations().await?;
        Ok(persister)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_sessions (
                id              TEXT PRIMARY KEY,
                workspace_id    TEXT NOT NULL,
                user_id         TEXT NOT NULL,
                persona_id      TEXT,
                status          TEXT NOT NULL,
                phase           TEXT NOT NULL,
                complexity_hint TEXT NOT NULL DEFAULT 'unset',
                messages        TEXT NOT NULL DEFAULT '[]',
                tool_calls      TEXT NOT NULL DEFAULT '[]',
                pending_action  TEXT,
                plan            TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_sessions_workspace ON agent_sessions(workspace_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("workspace index: {e}")))?;

        debug!("SQLite session migrations complete");
        Ok(())
    }

    fn encode<T: serde::Serialize>(value: &T, column: &str) -> Result<String, StoreError> {
        serde_json::to_string(value)
            .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(text: &str, column: &str) -> Result<T, StoreError> {
        serde_json::from_str(text).map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
    }

    fn parse_time(text: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }

    /// Parse a `SessionSnapshot` from a SQLite row.
    fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<SessionSnapshot, StoreError> {
        let text = |column: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
        };
        let optional = |column: &str| -> Result<Option<String>, StoreError> {
            row.try_get::<Option<String>, _>(column)
                .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
        };

        // Scalar enums are stored as bare JSON strings without quotes.
        let quoted = |column: &str| -> Result<String, StoreError> {
            Ok(format!("\"{}\"", text(column)?))
        };

        Ok(SessionSnapshot {
            id: text("id")?,
            workspace_id: text("workspace_id")?,
            user_id: text("user_id")?,
            persona_id: optional("persona_id")?,
            status: Self::decode(&quoted("status")?, "status")?,
            phase: Self::decode(&quoted("phase")?, "phase")?,
            complexity_hint: Self::decode(&quoted("complexity_hint")?, "complexity_hint")?,
            messages: Self::decode(&text("messages")?, "messages")?,
            tool_calls: Self::decode(&text("tool_calls")?, "tool_calls")?,
            pending_action: optional("pending_action")?
                .map(|t| Self::decode(&t, "pending_action"))
                .transpose()?,
            plan: optional("plan")?
                .map(|t| Self::decode(&t, "plan"))
                .transpose()?,
            created_at: Self::parse_time(&text("created_at")?, "created_at")?,
            updated_at: Self::parse_time(&text("updated_at")?, "updated_at")?,
        })
    }

    fn bare(value: &impl serde::Serialize, column: &str) -> Result<String, StoreError> {
        Ok(Self::encode(value, column)?.trim_matches('"').to_string())
    }
}

#[async_trait]
impl SessionPersister for SqlitePersister {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let messages = Self::encode(&snapshot.messages, "messages")?;
        let tool_calls = Self::encode(&snapshot.tool_calls, "tool_calls")?;
        let pending_action = snapshot
            .pending_action
            .as_ref()
            .map(|p| Self::encode(p, "pending_action"))
            .transpose()?;
        let plan = snapshot
            .plan
            .as_ref()
            .map(|p| Self::encode(p, "plan"))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO agent_sessions (
                id, workspace_id, user_id, persona_id, status, phase, complexity_hint,
                messages, tool_calls, pending_action, plan, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                phase = excluded.phase,
                complexity_hint = excluded.complexity_hint,
                messages = excluded.messages,
                tool_calls = excluded.tool_calls,
                pending_action = excluded.pending_action,
                plan = excluded.plan,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.workspace_id)
        .bind(&snapshot.user_id)
        .bind(&snapshot.persona_id)
        .bind(Self::bare(&snapshot.status, "status")?)
        .bind(Self::bare(&snapshot.phase, "phase")?)
        .bind(Self::bare(&snapshot.complexity_hint, "complexity_hint")?)
        .bind(&messages)
        .bind(&tool_calls)
        .bind(&pending_action)
        .bind(&plan)
        .bind(snapshot.created_at.to_rfc3339())
        .bind(snapshot.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT failed: {e}")))?;

        debug!(session_id = %snapshot.id, "Saved session snapshot");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Load: {e}")))?;

        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<SessionSnapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM agent_sessions WHERE workspace_id = ?1 ORDER BY updated_at DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("List: {e}")))?;

        rows.iter().map(Self::row_to_snapshot).collect()
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM agent_sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
