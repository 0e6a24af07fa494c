use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use boifi_domain::{OptimizationSession, SearchSpaceConfig, SessionStatus, Trial};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RecommenderError;

/// One JSON document per session under `storage_dir`, written on every
/// status transition and on every completed trial. The sessions map is
/// guarded by a single reader-writer lock; mutation of an individual
/// session serializes on that session's own lock, so two sessions never
/// contend with each other.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<OptimizationSession>>>>,
    storage_dir: PathBuf,
}

impl SessionManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), storage_dir: storage_dir.into() }
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.storage_dir.join(format!("{id}.json"))
    }

    async fn persist(&self, session: &OptimizationSession) -> Result<(), RecommenderError> {
        tokio::fs::create_dir_all(&self.storage_dir).await?;
        let body = serde_json::to_vec_pretty(session)?;
        let path = self.session_path(session.id);
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    /// Loads every `*.json` file under `storage_dir`. Any session found
    /// `Running` is transitioned to `Failed` and re-persisted — resuming
    /// from the last trial isn't implemented (see DESIGN.md), so an
    /// in-flight session can't simply continue after a restart.
    pub async fn recover(&self) -> Result<(), RecommenderError> {
        if !Path::new(&self.storage_dir).exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;
        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<OptimizationSession>(&bytes) {
                Ok(session) => loaded.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
            }
        }

        let mut guard = self.sessions.write().await;
        for mut session in loaded {
            if session.status == SessionStatus::Running {
                warn!(session_id = %session.id, "marking session Failed on recovery: no resume support");
                let _ = session.transition_to(SessionStatus::Failed, Utc::now());
                self.persist(&session).await?;
            }
            guard.insert(session.id, Arc::new(Mutex::new(session)));
        }
        info!(count = guard.len(), "recommender sessions recovered from disk");
        Ok(())
    }

    pub async fn create(
        &self,
        service: impl Into<String>,
        search_space: SearchSpaceConfig,
        max_trials: u32,
        time_budget_secs: u64,
    ) -> Result<Uuid, RecommenderError> {
        let session = OptimizationSession::new(service, search_space, max_trials, time_budget_secs, Utc::now())?;
        let id = session.id;
        self.persist(&session).await?;
        self.sessions.write().await.insert(id, Arc::new(Mutex::new(session)));
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<OptimizationSession> {
        let handle = self.sessions.read().await.get(&id).cloned()?;
        Some(handle.lock().await.clone())
    }

    pub async fn list(&self) -> Vec<OptimizationSession> {
        let guard = self.sessions.read().await;
        let mut out = Vec::with_capacity(guard.len());
        for handle in guard.values() {
            out.push(handle.lock().await.clone());
        }
        out
    }

    fn handle(&self, guard: &HashMap<Uuid, Arc<Mutex<OptimizationSession>>>, id: Uuid) -> Result<Arc<Mutex<OptimizationSession>>, RecommenderError> {
        guard.get(&id).cloned().ok_or(RecommenderError::SessionNotFound(id))
    }

    /// Requests a `Running -> Stopping` transition; the owning Worker
    /// observes this between trials and winds down after the one in
    /// flight completes.
    pub async fn stop(&self, id: Uuid) -> Result<(), RecommenderError> {
        let handle = self.handle(&*self.sessions.read().await, id)?;
        let mut session = handle.lock().await;
        session.transition_to(SessionStatus::Stopping, Utc::now())?;
        self.persist(&session).await
    }

    pub async fn transition(&self, id: Uuid, next: SessionStatus) -> Result<(), RecommenderError> {
        let handle = self.handle(&*self.sessions.read().await, id)?;
        let mut session = handle.lock().await;
        session.transition_to(next, Utc::now())?;
        self.persist(&session).await
    }

    pub async fn record_trial(&self, id: Uuid, trial: Trial) -> Result<(), RecommenderError> {
        let handle = self.handle(&*self.sessions.read().await, id)?;
        let mut session = handle.lock().await;
        session.record_trial(trial);
        self.persist(&session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boifi_domain::SearchSpaceConfig;

    #[tokio::test]
    async fn create_persists_pending_session() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        let id = mgr.create("checkout", SearchSpaceConfig::default(), 10, 60).await.unwrap();
        let session = mgr.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(dir.path().join(format!("{id}.json")).exists());
    }

    #[tokio::test]
    async fn stop_transitions_running_to_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        let id = mgr.create("checkout", SearchSpaceConfig::default(), 10, 60).await.unwrap();
        mgr.transition(id, SessionStatus::Running).await.unwrap();
        mgr.stop(id).await.unwrap();
        let session = mgr.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopping);
    }

    #[tokio::test]
    async fn stop_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        let err = mgr.stop(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RecommenderError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn recover_marks_running_sessions_failed() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mgr = SessionManager::new(dir.path());
            let id = mgr.create("checkout", SearchSpaceConfig::default(), 10, 60).await.unwrap();
            mgr.transition(id, SessionStatus::Running).await.unwrap();
            id
        };

        let recovered = SessionManager::new(dir.path());
        recovered.recover().await.unwrap();
        let session = recovered.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }
}
