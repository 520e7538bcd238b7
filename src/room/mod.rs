//! # Media Room
//!
//! The agent's view of a real-time media room. A room client joins with a
//! credential, turns the room's signalling into a typed [`RoomEvent`] stream,
//! and lets the agent publish a single outbound audio track.
//!
//! The traits here are the seam between session logic and transport. The
//! production implementation is [`websocket::WsRoomClient`]; tests use an
//! in-memory fake.

pub mod signal;
pub mod websocket;

use crate::audio::AudioBuffer;
use crate::error::{ConnectionError, PublishError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use websocket::{WsRoomClient, WsRoomConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a published track's media comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Microphone,
    Synthesized,
}

/// A track published by another participant and subscribed by the agent.
///
/// The room client owns these. Session code only ever holds a `Weak`
/// reference while a transcription is in flight.
#[derive(Debug)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
    pub participant: String,
    pub buffer: AudioBuffer,
}

impl RemoteTrack {
    pub fn new(
        sid: impl Into<String>,
        kind: TrackKind,
        participant: impl Into<String>,
        buffer: AudioBuffer,
    ) -> Self {
        Self {
            sid: sid.into(),
            kind,
            participant: participant.into(),
            buffer,
        }
    }
}

/// Everything a room can tell the agent.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected { identity: String },
    ParticipantDisconnected { identity: String },
    TrackSubscribed { track: Arc<RemoteTrack> },
    TrackUnsubscribed { track_sid: String, participant: String },
    /// The gateway detected end of speech on a subscribed track.
    UtteranceReady { track: Arc<RemoteTrack> },
    ActiveSpeakersChanged { speakers: Vec<String> },
    Disconnected { reason: String },
    Reconnecting,
    Reconnected,
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::ParticipantConnected { .. } => "participant_connected",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::TrackSubscribed { .. } => "track_subscribed",
            RoomEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            RoomEvent::UtteranceReady { .. } => "utterance_ready",
            RoomEvent::ActiveSpeakersChanged { .. } => "active_speakers_changed",
            RoomEvent::Disconnected { .. } => "disconnected",
            RoomEvent::Reconnecting => "reconnecting",
            RoomEvent::Reconnected => "reconnected",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub auto_subscribe: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    pub source: TrackSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
}

/// The agent's outbound audio track.
#[async_trait]
pub trait AudioSink: Send + Sync {
    fn sid(&self) -> &str;

    fn name(&self) -> &str;

    /// Arm the track for the next [`AudioSink::play`]. A `stop()` issued after
    /// this call cancels that playback even if `play` has not started yet.
    fn prepare(&self);

    /// Play 16-bit PCM to the room. Resolves when all audio was sent or
    /// [`AudioSink::stop`] was called.
    async fn play(&self, pcm: &[u8]) -> Result<PlaybackOutcome, PublishError>;

    /// Ask in-progress playback to stop. Best-effort.
    fn stop(&self);
}

impl fmt::Debug for dyn AudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSink")
            .field("sid", &self.sid())
            .field("name", &self.name())
            .finish()
    }
}

/// A single connection to a media room.
#[async_trait]
pub trait RoomClient: Send + Sync {
    /// Join the room. Events are delivered on the returned channel, which
    /// closes when the connection is gone for good.
    async fn connect(
        &self,
        url: &str,
        credential: &str,
        options: ConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<RoomEvent>, ConnectionError>;

    async fn disconnect(&self);

    async fn create_local_audio_track(&self, name: &str) -> Result<Arc<dyn AudioSink>, PublishError>;

    async fn publish_track(
        &self,
        track: &dyn AudioSink,
        options: PublishOptions,
    ) -> Result<(), PublishError>;

    fn is_published(&self, track_sid: &str) -> bool;
}

/// Creates one room client per session.
pub trait RoomConnector: Send + Sync {
    fn client(&self) -> Arc<dyn RoomClient>;
}
