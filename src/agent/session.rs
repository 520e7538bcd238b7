//! # Agent Session
//!
//! One voice session: a room connection, a designated user and the turn
//! pipeline serving them. `AgentSession` is the single place room events and
//! stage completions are dispatched. It is driven by one task (see
//! [`super::actor`]) and never shared, so none of its state needs a lock.

use super::connection::ConnectionLifecycleManager;
use super::history::Turn;
use super::interruption::InterruptionMonitor;
use super::orchestrator::{StageCompletion, StageDisposition, TurnId, TurnOrchestrator};
use super::state::{ConnectionState, SessionState, TurnState};
use crate::config::AppConfig;
use crate::error::ConnectionError;
use crate::metrics::{MetricsSink, MetricsSummary};
use crate::providers::Providers;
use crate::room::{RemoteTrack, RoomClient, RoomEvent, TrackKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Per-session knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub track_name: String,
    pub auto_subscribe: bool,
    pub provider_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            track_name: config.room.agent_track_name.clone(),
            auto_subscribe: config.room.auto_subscribe,
            provider_timeout: Duration::from_millis(config.pipeline.provider_timeout_ms),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub connection_state: ConnectionState,
    pub turn_state: TurnState,
    pub active_turn: Option<TurnId>,
    pub outbound_track: Option<String>,
    pub history: Vec<Turn>,
}

pub struct AgentSession {
    session_id: String,
    user_id: String,
    state: SessionState,
    connection: ConnectionLifecycleManager,
    orchestrator: TurnOrchestrator,
    interruptions: InterruptionMonitor,
    metrics: Arc<dyn MetricsSink>,
}

impl AgentSession {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        client: Arc<dyn RoomClient>,
        providers: Providers,
        metrics: Arc<dyn MetricsSink>,
        options: SessionOptions,
        completions: mpsc::UnboundedSender<StageCompletion>,
    ) -> Self {
        let session_id = session_id.into();
        let user_id = user_id.into();

        Self {
            connection: ConnectionLifecycleManager::new(
                session_id.clone(),
                client,
                options.track_name,
                options.auto_subscribe,
            ),
            orchestrator: TurnOrchestrator::new(
                session_id.clone(),
                providers,
                metrics.clone(),
                options.provider_timeout,
                completions,
            ),
            interruptions: InterruptionMonitor::new(user_id.clone()),
            state: SessionState::new(),
            session_id,
            user_id,
            metrics,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    pub fn history(&self) -> &[Turn] {
        self.orchestrator.history().turns()
    }

    pub async fn start(
        &mut self,
        url: &str,
        credential: &str,
    ) -> Result<Option<mpsc::UnboundedReceiver<RoomEvent>>, ConnectionError> {
        self.connection.start(&mut self.state, url, credential).await
    }

    /// Dispatch one room event.
    pub async fn handle_room_event(&mut self, event: RoomEvent) {
        if self.state.is_ended() {
            debug!(session_id = %self.session_id, event = event.name(), "Session ended; ignoring room event");
            return;
        }

        match event {
            RoomEvent::ParticipantConnected { identity } => {
                info!(session_id = %self.session_id, participant = %identity, "Participant joined");
            }
            RoomEvent::ParticipantDisconnected { identity } => {
                info!(session_id = %self.session_id, participant = %identity, "Participant left");
            }
            RoomEvent::TrackSubscribed { track } | RoomEvent::UtteranceReady { track } => {
                self.on_user_audio(track);
            }
            RoomEvent::TrackUnsubscribed { track_sid, participant } => {
                debug!(session_id = %self.session_id, track_sid = %track_sid, participant = %participant, "Track unsubscribed");
            }
            RoomEvent::ActiveSpeakersChanged { speakers } => {
                if self.interruptions.should_interrupt(&speakers, self.state.turn()) {
                    self.orchestrator
                        .interrupt(&mut self.state, self.connection.outbound());
                }
            }
            RoomEvent::Disconnected { reason } => {
                self.connection.on_disconnected(&mut self.state, &reason);
            }
            RoomEvent::Reconnecting => self.connection.on_reconnecting(&mut self.state),
            RoomEvent::Reconnected => self.connection.on_reconnected(&mut self.state).await,
        }
    }

    pub fn handle_stage_completion(&mut self, completion: StageCompletion) -> StageDisposition {
        self.orchestrator
            .handle_completion(&mut self.state, self.connection.outbound(), completion)
    }

    /// Leave the room, move to `Ended` and return the final metrics.
    /// Repeated calls return the same summary.
    pub async fn end(&mut self) -> MetricsSummary {
        self.connection.stop(&mut self.state).await;
        self.orchestrator.end(&mut self.state);
        let summary = self.metrics.finalize();
        info!(
            session_id = %self.session_id,
            turns = summary.turns,
            interruptions = summary.interruptions,
            "Session ended"
        );
        summary
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            connection_state: self.state.connection(),
            turn_state: self.state.turn(),
            active_turn: self.orchestrator.active_turn(),
            outbound_track: self.connection.outbound().map(|track| track.sid().to_string()),
            history: self.history().to_vec(),
        }
    }

    fn on_user_audio(&mut self, track: Arc<RemoteTrack>) {
        if track.participant != self.user_id || track.kind != TrackKind::Audio {
            debug!(
                session_id = %self.session_id,
                participant = %track.participant,
                track_sid = %track.sid,
                "Ignoring track from non-designated participant"
            );
            return;
        }
        self.orchestrator.begin_turn(&mut self.state, &track);
    }
}
