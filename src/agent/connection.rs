//! # Connection Lifecycle
//!
//! Owns the room client and the agent's outbound track. Connection events
//! from the room become state transitions; a reconnect is a state change,
//! not a restart, so history and metrics carry across network blips.
//!
//! Failing to publish the outbound track is never fatal. The session keeps
//! listening and turns simply skip playback.

use super::state::{ConnectionState, SessionState, Transition};
use crate::error::ConnectionError;
use crate::room::{AudioSink, ConnectOptions, PublishOptions, RoomClient, RoomEvent, TrackSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct ConnectionLifecycleManager {
    session_id: String,
    client: Arc<dyn RoomClient>,
    track_name: String,
    auto_subscribe: bool,
    outbound: Option<Arc<dyn AudioSink>>,
    started: bool,
}

impl ConnectionLifecycleManager {
    pub fn new(
        session_id: impl Into<String>,
        client: Arc<dyn RoomClient>,
        track_name: impl Into<String>,
        auto_subscribe: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            client,
            track_name: track_name.into(),
            auto_subscribe,
            outbound: None,
            started: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn outbound(&self) -> Option<&Arc<dyn AudioSink>> {
        self.outbound.as_ref()
    }

    /// Join the room and publish the agent's track.
    ///
    /// Returns the room's event stream on the first successful call and
    /// `None` on later calls, which leave the existing connection alone.
    pub async fn start(
        &mut self,
        state: &mut SessionState,
        url: &str,
        credential: &str,
    ) -> Result<Option<mpsc::UnboundedReceiver<RoomEvent>>, ConnectionError> {
        if self.started {
            debug!(session_id = %self.session_id, "Session already started");
            return Ok(None);
        }
        if url.trim().is_empty() {
            return Err(ConnectionError::InvalidArgument("room url is required".to_string()));
        }
        if credential.trim().is_empty() {
            return Err(ConnectionError::InvalidArgument("room credential is required".to_string()));
        }
        state
            .apply(Transition::Connecting)
            .map_err(|err| ConnectionError::InvalidArgument(err.to_string()))?;

        let options = ConnectOptions {
            auto_subscribe: self.auto_subscribe,
        };
        let events = match self.client.connect(url, credential, options).await {
            Ok(events) => events,
            Err(err) => {
                let _ = state.apply(Transition::ConnectFailed);
                warn!(session_id = %self.session_id, error = %err, "Failed to join room");
                return Err(err);
            }
        };

        // Connecting -> Connected is always legal.
        let _ = state.apply(Transition::Connected);
        self.started = true;
        info!(session_id = %self.session_id, url = %url, "Joined room; listening");

        self.publish_outbound_track().await;
        Ok(Some(events))
    }

    pub fn on_disconnected(&mut self, state: &mut SessionState, reason: &str) {
        if let Err(err) = state.apply(Transition::Disconnected) {
            debug!(session_id = %self.session_id, error = %err, "Ignoring disconnect");
            return;
        }
        warn!(session_id = %self.session_id, reason = %reason, "Room disconnected; listening paused");
    }

    pub fn on_reconnecting(&mut self, state: &mut SessionState) {
        if let Err(err) = state.apply(Transition::Reconnecting) {
            debug!(session_id = %self.session_id, error = %err, "Ignoring reconnecting");
            return;
        }
        info!(session_id = %self.session_id, "Room reconnecting; listening paused");
    }

    /// Resume listening and republish the agent track if the room lost it.
    pub async fn on_reconnected(&mut self, state: &mut SessionState) {
        if let Err(err) = state.apply(Transition::Reconnected) {
            debug!(session_id = %self.session_id, error = %err, "Ignoring reconnected");
            return;
        }
        info!(session_id = %self.session_id, "Room reconnected; listening resumed");

        let needs_republish = self
            .outbound
            .as_ref()
            .map(|track| !self.client.is_published(track.sid()))
            .unwrap_or(false);
        if needs_republish {
            info!(session_id = %self.session_id, "Republishing agent track");
            self.publish_outbound_track().await;
        }
    }

    /// Leave the room and release the outbound track. Safe to call repeatedly.
    pub async fn stop(&mut self, state: &mut SessionState) {
        if !self.started {
            debug!(session_id = %self.session_id, "Session already stopped");
            return;
        }
        self.started = false;

        if let Some(track) = self.outbound.take() {
            track.stop();
        }
        self.client.disconnect().await;

        if state.connection() != ConnectionState::Disconnected {
            let _ = state.apply(Transition::Disconnected);
        }
        info!(session_id = %self.session_id, "Left room");
    }

    /// Create the outbound track on first use, then publish it. Errors are
    /// logged and swallowed.
    async fn publish_outbound_track(&mut self) {
        let track = match self.outbound.clone() {
            Some(track) => track,
            None => match self.client.create_local_audio_track(&self.track_name).await {
                Ok(track) => {
                    self.outbound = Some(track.clone());
                    track
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "Could not create agent track; playback disabled");
                    return;
                }
            },
        };

        let options = PublishOptions {
            source: TrackSource::Synthesized,
        };
        match self.client.publish_track(track.as_ref(), options).await {
            Ok(()) => info!(session_id = %self.session_id, track_sid = %track.sid(), "Agent track published"),
            Err(err) => warn!(session_id = %self.session_id, error = %err, "Could not publish agent track; playback disabled"),
        }
    }
}
