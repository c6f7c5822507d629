//! Shared test helpers for store tests

use sqlx::SqlitePool;

use super::{Database, SessionStore};

/// In-memory pool with the production schema applied
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}

/// Session store over a fresh in-memory database
pub async fn test_store() -> SessionStore {
    SessionStore::new(test_pool().await)
}
