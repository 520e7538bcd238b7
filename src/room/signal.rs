//! JSON signalling messages exchanged with the room gateway.
//!
//! Every text frame is one message tagged by `type`. Audio travels separately
//! in binary frames (see `audio::codec`).

use super::{TrackKind, TrackSource};
use serde::{Deserialize, Serialize};

/// Gateway → agent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerSignal {
    ParticipantConnected {
        identity: String,
        #[serde(default)]
        sid: Option<String>,
    },
    ParticipantDisconnected {
        identity: String,
        #[serde(default)]
        sid: Option<String>,
    },
    TrackSubscribed {
        track_sid: String,
        kind: TrackKind,
        participant: String,
    },
    TrackUnsubscribed {
        track_sid: String,
        #[serde(default)]
        kind: Option<TrackKind>,
        participant: String,
    },
    UtteranceReady {
        track_sid: String,
        participant: String,
    },
    ActiveSpeakersChanged {
        speakers: Vec<String>,
    },
    TrackPublished {
        track_sid: String,
    },
    Ping {
        timestamp: i64,
    },
    Leave {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Agent → gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientSignal {
    PublishTrack {
        track_sid: String,
        name: String,
        kind: TrackKind,
        source: TrackSource,
    },
    UnpublishTrack {
        track_sid: String,
    },
    Pong {
        timestamp: i64,
    },
    Leave {},
}
