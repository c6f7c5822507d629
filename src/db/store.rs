//! Session snapshots and the action audit log

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::session::Session;

/// One row of the append-only audit log
#[derive(Debug, Clone, Serialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub session_id: String,
    pub action_id: Option<String>,
    pub event: String,
    pub detail: serde_json::Value,
    pub created_at: String,
}

/// SQLite-backed session persistence
#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a session snapshot. A snapshot older than the stored one is ignored.
    pub async fn save(&self, session: &Session) -> Result<()> {
        let state = serde_json::to_string(session)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, state, revision, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            WHERE excluded.revision >= sessions.revision
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(&state)
        .bind(session.revision as i64)
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every stored session; unreadable rows are skipped
    pub async fn load_all(&self) -> Result<Vec<Session>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, state FROM sessions ORDER BY updated_at")
                .fetch_all(&self.pool)
                .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for (id, state) in rows {
            match serde_json::from_str::<Session>(&state) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session {}: {}", id, e),
            }
        }

        debug!("Loaded {} sessions", sessions.len());
        Ok(sessions)
    }

    /// Append an audit record
    pub async fn log_action(
        &self,
        session_id: &str,
        action_id: Option<&str>,
        event: &str,
        detail: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_log (session_id, action_id, event, detail) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(action_id)
        .bind(event)
        .bind(detail.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Audit records for a session, oldest first
    pub async fn action_history(&self, session_id: &str) -> Result<Vec<ActionLogEntry>, sqlx::Error> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(i64, String, Option<String>, String, String, String)> = sqlx::query_as(
            "SELECT id, session_id, action_id, event, detail, created_at FROM action_log WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, action_id, event, detail, created_at)| ActionLogEntry {
                    id,
                    session_id,
                    action_id,
                    event,
                    detail: serde_json::from_str(&detail)
                        .unwrap_or(serde_json::Value::String(detail)),
                    created_at,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{test_pool, test_store};
    use chrono::Utc;

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = test_store().await;
        let mut session = Session::new("Crypt", vec![], Utc::now()).unwrap();
        store.save(&session).await.unwrap();

        session.revision = 4;
        session.name = "Crypt, level 2".to_string();
        store.save(&session).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].revision, 4);
        assert_eq!(loaded[0].name, "Crypt, level 2");
    }

    #[tokio::test]
    async fn test_stale_snapshot_does_not_overwrite() {
        let store = test_store().await;
        let mut session = Session::new("Crypt", vec![], Utc::now()).unwrap();
        session.revision = 5;
        store.save(&session).await.unwrap();

        session.revision = 3;
        session.name = "Stale".to_string();
        store.save(&session).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].revision, 5);
        assert_eq!(loaded[0].name, "Crypt");
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO sessions (id, name, state, revision) VALUES ('bad', 'Bad', 'not json', 0)")
            .execute(&pool)
            .await
            .unwrap();

        let store = SessionStore::new(pool);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_log_is_ordered() {
        let store = test_store().await;
        let detail = serde_json::json!({"amount": 7});
        store
            .log_action("s1", Some("a1"), "propose_action", &detail)
            .await
            .unwrap();
        store
            .log_action("s1", Some("a1"), "confirm_action", &detail)
            .await
            .unwrap();
        store
            .log_action("s2", None, "advance_turn", &detail)
            .await
            .unwrap();

        let history = store.action_history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event, "propose_action");
        assert_eq!(history[1].event, "confirm_action");
        assert_eq!(history[1].detail["amount"], 7);
    }
}
