//! # Session Task
//!
//! Each session runs on its own tokio task. The task owns the
//! [`AgentSession`] and multiplexes three inputs in one loop:
//!
//! - control commands from the [`SessionHandle`] (checked first),
//! - room events, in arrival order,
//! - stage completions from provider tasks.
//!
//! Everything that touches session state happens on this task, between
//! await points, so the state needs no locking.

use super::orchestrator::StageCompletion;
use super::session::{AgentSession, SessionOptions, SessionSnapshot};
use crate::error::{ConnectionError, SessionError};
use crate::metrics::{MetricsSink, MetricsSummary};
use crate::providers::Providers;
use crate::room::{RoomClient, RoomEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, Instrument};

#[derive(Debug)]
pub enum SessionCommand {
    Snapshot(oneshot::Sender<SessionSnapshot>),
    End(oneshot::Sender<MetricsSummary>),
}

/// Everything needed to bring a session up.
pub struct SessionSpec {
    pub session_id: String,
    pub user_id: String,
    pub room_url: String,
    pub credential: String,
    pub client: Arc<dyn RoomClient>,
    pub providers: Providers,
    pub metrics: Arc<dyn MetricsSink>,
    pub options: SessionOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub finished: bool,
}

/// Cheap, shareable reference to a running session task.
pub struct SessionHandle {
    session_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    metrics: Arc<dyn MetricsSink>,
    finished: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// True once the session has ended, whether by request or because the
    /// room connection was lost for good.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            finished: self.is_finished(),
        }
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Snapshot(tx))
            .map_err(|_| SessionError::Closed(self.session_id.clone()))?;
        rx.await.map_err(|_| SessionError::Closed(self.session_id.clone()))
    }

    /// End the session and wait for the final summary. If the task is
    /// already gone the metrics are finalized here instead.
    pub async fn end(&self) -> MetricsSummary {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::End(tx)).is_err() {
            return self.metrics.finalize();
        }
        match rx.await {
            Ok(summary) => summary,
            Err(_) => self.metrics.finalize(),
        }
    }
}

/// Join the room and spawn the session task. Nothing is spawned when the
/// join fails.
pub async fn launch(spec: SessionSpec) -> Result<SessionHandle, ConnectionError> {
    let SessionSpec {
        session_id,
        user_id,
        room_url,
        credential,
        client,
        providers,
        metrics,
        options,
    } = spec;

    let (completion_tx, completions) = mpsc::unbounded_channel();
    let mut session = AgentSession::new(
        session_id.clone(),
        user_id.clone(),
        client,
        providers,
        metrics.clone(),
        options,
        completion_tx,
    );

    let events = session
        .start(&room_url, &credential)
        .await?
        .ok_or_else(|| ConnectionError::InvalidArgument("session already started".to_string()))?;

    let (commands_tx, commands) = mpsc::unbounded_channel();
    let finished = Arc::new(AtomicBool::new(false));

    let span = tracing::info_span!("session", session_id = %session_id);
    tokio::spawn(
        run(session, events, completions, commands, finished.clone()).instrument(span),
    );

    Ok(SessionHandle {
        session_id,
        user_id,
        created_at: Utc::now(),
        commands: commands_tx,
        metrics,
        finished,
    })
}

async fn run(
    mut session: AgentSession,
    events: mpsc::UnboundedReceiver<RoomEvent>,
    mut completions: mpsc::UnboundedReceiver<StageCompletion>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    finished: Arc<AtomicBool>,
) {
    let mut events = Some(events);

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(SessionCommand::Snapshot(reply)) => {
                    let _ = reply.send(session.snapshot());
                }
                Some(SessionCommand::End(reply)) => {
                    let summary = session.end().await;
                    finished.store(true, Ordering::SeqCst);
                    let _ = reply.send(summary);
                    break;
                }
                None => {
                    debug!("All handles dropped; ending session");
                    session.end().await;
                    finished.store(true, Ordering::SeqCst);
                    break;
                }
            },

            event = next_event(&mut events) => match event {
                Some(event) => session.handle_room_event(event).await,
                None => {
                    info!("Room connection closed; ending session");
                    events = None;
                    session.end().await;
                    finished.store(true, Ordering::SeqCst);
                }
            },

            Some(completion) = completions.recv() => {
                let disposition = session.handle_stage_completion(completion);
                debug!(?disposition, "Stage handled");
            }
        }
    }
}

/// Next room event, or pending forever once the stream has closed.
async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<RoomEvent>>) -> Option<RoomEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
