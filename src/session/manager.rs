//! Session manager
//!
//! Owns every live session. Mutations are applied one at a time under the
//! write lock against a draft copy, so a rejected mutation leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::mutation::{Mutation, MutationContext, MutationOutcome};
use super::state::{Session, SessionSummary};
use super::{SessionError, SessionResult};
use crate::combat::{EntitySeed, PendingAction};
use crate::db::{ActionLogEntry, SessionStore};

/// Tunables taken from the server config
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// How long the ritual sequence stays on display
    pub ritual_display_ms: u64,
    /// Broadcast buffer per subscriber
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ritual_display_ms: 3000,
            event_capacity: 256,
        }
    }
}

/// Change notification sent to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub revision: u64,
    pub op: String,
}

/// A committed mutation
#[derive(Debug, Clone, Serialize)]
pub struct Applied {
    pub session_id: String,
    pub revision: u64,
    pub outcome: MutationOutcome,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    store: Option<SessionStore>,
    events: broadcast::Sender<SessionEvent>,
    settings: SessionSettings,
}

impl SessionManager {
    /// In-memory only
    pub fn new(settings: SessionSettings) -> Self {
        Self::build(None, settings)
    }

    /// Persist snapshots and audit records through `store`
    pub fn with_store(store: SessionStore, settings: SessionSettings) -> Self {
        Self::build(Some(store), settings)
    }

    pub fn shared(settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn shared_with_store(store: SessionStore, settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self::with_store(store, settings))
    }

    fn build(store: Option<SessionStore>, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Load persisted sessions on startup
    pub async fn load_from_db(&self) -> anyhow::Result<usize> {
        let Some(ref store) = self.store else {
            return Ok(0);
        };

        let loaded = store.load_all().await?;
        let count = loaded.len();
        let mut sessions = self.sessions.write().await;
        for session in loaded {
            sessions.insert(session.id.clone(), session);
        }

        info!("Loaded {} sessions from database", count);
        Ok(count)
    }

    pub async fn create(&self, name: &str, seeds: Vec<EntitySeed>) -> SessionResult<Session> {
        let session = Session::new(name, seeds, Utc::now())?;
        self.persist(&session).await;

        info!(
            "Created session {} ({}) with {} entities",
            session.name,
            session.id,
            session.entities.len()
        );
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());

        self.notify(&session.id, session.revision, "create_session");
        Ok(session)
    }

    /// Snapshot of one session
    pub async fn get(&self, session_id: &str) -> SessionResult<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::summary)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Pending actions in proposal order
    pub async fn actions(&self, session_id: &str, open_only: bool) -> SessionResult<Vec<PendingAction>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        Ok(session
            .actions
            .iter()
            .filter(|a| !open_only || !a.resolved)
            .cloned()
            .collect())
    }

    /// Apply one mutation, persist, log and broadcast
    pub async fn apply(&self, session_id: &str, mutation: Mutation) -> SessionResult<Applied> {
        let op = mutation.name();
        let ctx = MutationContext::new(self.settings.ritual_display_ms);

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        let mut draft = session.clone();
        let outcome = match draft.apply(mutation, &ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Session {} rejected {}: {}", session_id, op, e);
                return Err(e.into());
            }
        };
        *session = draft;
        let revision = session.revision;
        let snapshot = self.store.is_some().then(|| session.clone());
        drop(sessions);

        // IO runs without the map lock; the store drops stale snapshots
        if let Some(snapshot) = snapshot {
            self.persist(&snapshot).await;
        }
        self.audit(session_id, op, &outcome).await;

        self.notify(session_id, revision, op);
        Ok(Applied {
            session_id: session_id.to_string(),
            revision,
            outcome,
        })
    }

    /// Audit trail for a session (empty without a store)
    pub async fn history(&self, session_id: &str) -> SessionResult<Vec<ActionLogEntry>> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        match &self.store {
            Some(store) => Ok(store.action_history(session_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn persist(&self, session: &Session) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save(session).await {
                warn!("Failed to persist session {}: {}", session.id, e);
            }
        }
    }

    async fn audit(&self, session_id: &str, op: &str, outcome: &MutationOutcome) {
        let Some(ref store) = self.store else {
            return;
        };
        let detail = match serde_json::to_value(outcome) {
            Ok(detail) => detail,
            Err(e) => {
                warn!("Failed to encode {} outcome: {}", op, e);
                serde_json::Value::Null
            }
        };
        if let Err(e) = store
            .log_action(session_id, outcome.action_id(), op, &detail)
            .await
        {
            warn!("Failed to log {} for session {}: {}", op, session_id, e);
        }
    }

    fn notify(&self, session_id: &str, revision: u64, op: &str) {
        // No subscribers is fine
        let _ = self.events.send(SessionEvent {
            session_id: session_id.to_string(),
            revision,
            op: op.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Category, CombatError, Position};
    use crate::db::test_utils::test_pool;
    use crate::session::InitiativeSlot;

    fn seeds() -> Vec<EntitySeed> {
        ["hero", "ogre"]
            .iter()
            .enumerate()
            .map(|(i, id)| EntitySeed {
                id: id.to_string(),
                name: id.to_string(),
                category: if i == 0 {
                    Category::Player
                } else {
                    Category::Opposing
                },
                position: Position::new(i as i32, 0),
                max_hp: 12,
                hp: None,
                armor: 10,
                profile_id: None,
            })
            .collect()
    }

    fn start() -> Mutation {
        Mutation::StartCombat {
            order: vec![
                InitiativeSlot {
                    entity_id: "hero".to_string(),
                    initiative: 12,
                },
                InitiativeSlot {
                    entity_id: "ogre".to_string(),
                    initiative: 8,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_apply_bumps_revision_and_broadcasts() {
        let manager = SessionManager::new(SessionSettings::default());
        let mut events = manager.subscribe();
        let session = manager.create("Arena", seeds()).await.unwrap();
        assert_eq!(events.recv().await.unwrap().op, "create_session");

        let applied = manager.apply(&session.id, start()).await.unwrap();
        assert_eq!(applied.revision, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.op, "start_combat");
        assert_eq!(event.revision, 1);
        assert_eq!(manager.get(&session.id).await.unwrap().round(), 1);
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_session_untouched() {
        let manager = SessionManager::new(SessionSettings::default());
        let session = manager.create("Arena", seeds()).await.unwrap();
        let before = manager.get(&session.id).await.unwrap();

        let err = manager
            .apply(&session.id, Mutation::AdvanceTurn)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Combat(CombatError::InvalidState(_))
        ));
        assert_eq!(manager.get(&session.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = SessionManager::new(SessionSettings::default());
        assert!(matches!(
            manager.apply("nope", Mutation::AdvanceTurn).await,
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(manager.get("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_survive_restart() {
        let pool = test_pool().await;
        let manager = SessionManager::with_store(
            SessionStore::new(pool.clone()),
            SessionSettings::default(),
        );
        let session = manager.create("Keep", seeds()).await.unwrap();
        manager.apply(&session.id, start()).await.unwrap();
        manager
            .apply(&session.id, Mutation::AdvanceTurn)
            .await
            .unwrap();

        let history = manager.history(&session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].event, "advance_turn");

        let restarted =
            SessionManager::with_store(SessionStore::new(pool), SessionSettings::default());
        assert_eq!(restarted.load_from_db().await.unwrap(), 1);
        let loaded = restarted.get(&session.id).await.unwrap();
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.turn.current().unwrap().entity_id, "ogre");
    }

    #[tokio::test]
    async fn test_concurrent_sessions_persist_latest() {
        let pool = test_pool().await;
        let manager = SessionManager::shared_with_store(
            SessionStore::new(pool.clone()),
            SessionSettings::default(),
        );
        let a = manager.create("A", seeds()).await.unwrap().id;
        let b = manager.create("B", seeds()).await.unwrap().id;

        let mut tasks = Vec::new();
        for id in [a.clone(), b.clone()] {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    manager
                        .apply(
                            &id,
                            Mutation::Heal {
                                entity_id: "hero".to_string(),
                                amount: 1,
                            },
                        )
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = SessionStore::new(pool).load_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|s| s.revision == 10));
        assert_eq!(manager.get(&a).await.unwrap().revision, 10);
        assert_eq!(manager.history(&b).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_open_actions_filter() {
        let manager = SessionManager::new(SessionSettings::default());
        let session = manager.create("Arena", seeds()).await.unwrap();
        manager.apply(&session.id, start()).await.unwrap();

        let proposal: crate::combat::Proposal = serde_json::from_value(serde_json::json!({
            "actor_id": "hero",
            "body": {"type": "attack", "target_id": "ogre"},
            "roll": 12
        }))
        .unwrap();
        for _ in 0..2 {
            manager
                .apply(
                    &session.id,
                    Mutation::ProposeAction {
                        action: proposal.clone(),
                    },
                )
                .await
                .unwrap();
        }
        let all = manager.actions(&session.id, false).await.unwrap();
        manager
            .apply(
                &session.id,
                Mutation::DismissAction {
                    action_id: all[0].id.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(manager.actions(&session.id, true).await.unwrap().len(), 1);
        assert_eq!(manager.actions(&session.id, false).await.unwrap().len(), 2);
    }
}
