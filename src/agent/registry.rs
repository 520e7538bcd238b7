//! # Session Registry
//!
//! The set of running sessions keyed by session id, and the operations the
//! control surface exposes on them. A session is only registered once its
//! room join succeeded.

use super::actor::{self, SessionHandle, SessionInfo, SessionSpec};
use super::session::{SessionOptions, SessionSnapshot};
use crate::config::AppConfig;
use crate::error::{ConnectionError, SessionError};
use crate::metrics::{MetricsSummary, SessionMetrics};
use crate::providers::ProviderFactory;
use crate::room::RoomConnector;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSession {
    pub session_id: String,
    pub user_id: String,
    pub credential: String,
    /// Falls back to the configured room url.
    #[serde(default)]
    pub room_url: Option<String>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<SessionHandle>>,
    // Ids reserved while their room join is in progress.
    pending: HashSet<String>,
}

impl Inner {
    fn live_count(&self) -> usize {
        self.sessions.values().filter(|s| !s.is_finished()).count() + self.pending.len()
    }
}

pub struct SessionRegistry {
    connector: Arc<dyn RoomConnector>,
    providers: Arc<dyn ProviderFactory>,
    config: AppConfig,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn RoomConnector>,
        providers: Arc<dyn ProviderFactory>,
        config: AppConfig,
    ) -> Self {
        Self {
            connector,
            providers,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn create_session(&self, request: CreateSession) -> Result<SessionSnapshot, SessionError> {
        let session_id = request.session_id.trim().to_string();
        let user_id = request.user_id.trim().to_string();
        if session_id.is_empty() {
            return Err(ConnectionError::InvalidArgument("session_id is required".to_string()).into());
        }
        if user_id.is_empty() {
            return Err(ConnectionError::InvalidArgument("user_id is required".to_string()).into());
        }

        self.reserve(&session_id)?;
        let result = self.launch(&session_id, &user_id, &request).await;

        let handle = {
            let mut inner = self.inner.lock();
            inner.pending.remove(&session_id);
            match result {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    inner.sessions.insert(session_id.clone(), handle.clone());
                    handle
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Session creation failed");
                    return Err(err);
                }
            }
        };

        info!(session_id = %session_id, user_id = %user_id, "Session created");
        handle.snapshot().await
    }

    /// End a session and return its final metrics.
    pub async fn end_session(&self, session_id: &str) -> Result<MetricsSummary, SessionError> {
        let handle = self
            .inner
            .lock()
            .sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(handle.end().await)
    }

    pub fn get_metrics(&self, session_id: &str) -> Result<MetricsSummary, SessionError> {
        Ok(self.get(session_id)?.metrics())
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        self.get(session_id)?.snapshot().await
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.inner.lock().sessions.values().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Sessions that are running or joining.
    pub fn active_count(&self) -> usize {
        self.inner.lock().live_count()
    }

    pub fn max_sessions(&self) -> usize {
        self.config.performance.max_concurrent_sessions
    }

    /// Latest summary of every registered session.
    pub fn all_metrics(&self) -> Vec<MetricsSummary> {
        self.inner.lock().sessions.values().map(|s| s.metrics()).collect()
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<SessionHandle>> =
            self.inner.lock().sessions.drain().map(|(_, handle)| handle).collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "Ending all sessions");
        }
        for handle in handles {
            handle.end().await;
        }
    }

    fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn reserve(&self, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(session_id) || inner.pending.contains(session_id) {
            return Err(SessionError::AlreadyExists(session_id.to_string()));
        }
        let limit = self.max_sessions();
        if inner.live_count() >= limit {
            return Err(SessionError::LimitReached(limit));
        }
        inner.pending.insert(session_id.to_string());
        Ok(())
    }

    async fn launch(
        &self,
        session_id: &str,
        user_id: &str,
        request: &CreateSession,
    ) -> Result<SessionHandle, SessionError> {
        let providers = self.providers.build(session_id)?;
        let room_url = request
            .room_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.config.room.url.clone());

        let spec = SessionSpec {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            room_url,
            credential: request.credential.clone(),
            client: self.connector.client(),
            providers,
            metrics: Arc::new(SessionMetrics::new(
                session_id,
                user_id,
                self.config.metrics.targets.clone(),
            )),
            options: SessionOptions::from_config(&self.config),
        };
        Ok(actor::launch(spec).await?)
    }
}
