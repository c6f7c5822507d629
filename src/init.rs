//! Database initialization module
//!
//! One-time setup for the skirmishd_init tool: create a fresh database and
//! seed it with sessions built from roster files.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::combat::EntitySeed;
use crate::db::Database;
use crate::session::Session;

/// A named encounter roster, as stored in a roster JSON file
#[derive(Debug, Clone, Deserialize)]
pub struct Roster {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntitySeed>,
}

impl Roster {
    /// Read a roster JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid roster file {}", path.display()))
    }
}

/// Create a new database and seed one session per roster
///
/// # Errors
/// * Database file already exists
/// * A roster has an invalid entity or duplicate ids
/// * Database creation fails
///
/// Returns the ids of the created sessions.
pub async fn init_database(path: &Path, rosters: Vec<Roster>) -> Result<Vec<String>> {
    // Fail if database already exists
    if path.exists() {
        bail!(
            "Database file already exists: {}. Remove it first or use a different path.",
            path.display()
        );
    }

    // Validate everything before touching the filesystem
    let now = Utc::now();
    let sessions = rosters
        .into_iter()
        .map(|roster| {
            Session::new(&roster.name, roster.entities, now)
                .with_context(|| format!("Invalid roster '{}'", roster.name))
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(path_str) = path.to_str() else {
        bail!("Database path is not valid UTF-8: {}", path.display());
    };

    info!("Creating new database at {}", path.display());
    let db = Database::new(Some(path_str)).await?;
    let store = db.sessions();

    let mut ids = Vec::with_capacity(sessions.len());
    for session in &sessions {
        store.save(session).await?;
        info!(
            "  {} -> {} ({} entities)",
            session.name,
            session.id,
            session.entities.len()
        );
        ids.push(session.id.clone());
    }

    info!("Database initialization complete");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roster(name: &str, json: serde_json::Value) -> Roster {
        serde_json::from_value(serde_json::json!({"name": name, "entities": json})).unwrap()
    }

    #[tokio::test]
    async fn test_init_database_creates_new() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        init_database(&db_path, vec![]).await.unwrap();

        // Verify file was created
        assert!(db_path.exists());

        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        assert!(db.sessions().load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_database_fails_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create first
        init_database(&db_path, vec![]).await.unwrap();

        // Try again - should fail
        let result = init_database(&db_path, vec![]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_init_database_seeds_rosters() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let rosters = vec![roster(
            "Goblin ambush",
            serde_json::json!([
                {"id": "hero", "name": "Hero", "category": "player", "max_hp": 24},
                {"id": "gob-1", "name": "Goblin", "category": "opposing", "max_hp": 7, "armor": 13}
            ]),
        )];
        let ids = init_database(&db_path, rosters).await.unwrap();
        assert_eq!(ids.len(), 1);

        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let sessions = db.sessions().load_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, ids[0]);
        assert_eq!(sessions[0].entities.get("gob-1").unwrap().armor, 13);
    }

    #[tokio::test]
    async fn test_invalid_roster_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let rosters = vec![roster(
            "Broken",
            serde_json::json!([
                {"id": "hero", "name": "Hero", "category": "player", "max_hp": 24},
                {"id": "hero", "name": "Twin", "category": "player", "max_hp": 24}
            ]),
        )];
        let result = init_database(&db_path, rosters).await;
        assert!(result.unwrap_err().to_string().contains("Broken"));
        assert!(!db_path.exists());
    }

    #[test]
    fn test_roster_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crypt.json");
        std::fs::write(
            &path,
            r#"{"name": "Crypt", "entities": [{"id": "lich", "name": "Lich", "category": "enemy", "max_hp": 60}]}"#,
        )
        .unwrap();

        let roster = Roster::from_file(&path).unwrap();
        assert_eq!(roster.name, "Crypt");
        assert_eq!(roster.entities.len(), 1);

        assert!(Roster::from_file(&temp_dir.path().join("missing.json")).is_err());
    }
}
