//! # WebSocket Room Client
//!
//! Connects to a room gateway over a WebSocket and speaks the JSON signalling
//! protocol in [`super::signal`] plus binary PCM frames.
//!
//! ## Connection task
//! A single driver task owns the socket. It:
//! - reads signalling and audio frames and turns them into [`RoomEvent`]s
//! - writes queued outbound signals and audio frames
//! - reconnects after an unexpected loss, with linear backoff
//!
//! ## Reconnection
//! On a lost socket the driver emits `Reconnecting`, clears publications and
//! subscriptions, then retries `max_reconnect_attempts` times. Success emits
//! `Reconnected`. Giving up emits `Disconnected` and closes the event channel.
//! A gateway `leave` or a local `disconnect()` never triggers reconnection.
//! Every handshake is bounded by `connect_timeout_ms`.

use super::signal::{ClientSignal, ServerSignal};
use super::{
    AudioSink, ConnectOptions, PlaybackOutcome, PublishOptions, RemoteTrack, RoomClient,
    RoomConnector, RoomEvent, TrackKind,
};
use crate::audio::{codec, AudioBuffer};
use crate::config::RoomConfig;
use crate::error::{ConnectionError, PublishError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, http::StatusCode, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

enum Outbound {
    Signal(ClientSignal),
    Audio(Vec<u8>),
    Close,
}

enum SocketEnd {
    /// `disconnect()` was called.
    Local,
    /// The gateway asked us to leave.
    Left(String),
    /// The socket failed or closed unexpectedly.
    Lost(String),
}

#[derive(Default)]
struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    tracks: Mutex<HashMap<String, Arc<RemoteTrack>>>,
    published: Mutex<HashSet<String>>,
    closing: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn send(&self, message: Outbound) -> Result<(), PublishError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(PublishError::NotConnected)?;
        tx.send(message).map_err(|_| PublishError::NotConnected)
    }

    fn reset_room_state(&self) {
        self.published.lock().clear();
        self.tracks.lock().clear();
    }
}

/// Room client backed by a WebSocket connection to a gateway.
pub struct WsRoomClient {
    config: RoomConfig,
    shared: Arc<Shared>,
}

impl WsRoomClient {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
        }
    }
}

#[async_trait]
impl RoomClient for WsRoomClient {
    async fn connect(
        &self,
        url: &str,
        credential: &str,
        options: ConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<RoomEvent>, ConnectionError> {
        if url.trim().is_empty() {
            return Err(ConnectionError::InvalidArgument("room url is required".to_string()));
        }
        if credential.trim().is_empty() {
            return Err(ConnectionError::InvalidArgument("room credential is required".to_string()));
        }
        if self.shared.outbound.lock().is_some() {
            return Err(ConnectionError::InvalidArgument("client is already connected".to_string()));
        }

        let request_url = join_url(url, credential, options.auto_subscribe)?;
        let ws = handshake(&self.config, &request_url).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.shared.closing.store(false, Ordering::SeqCst);
        *self.shared.outbound.lock() = Some(out_tx);

        let driver = tokio::spawn(drive(
            self.shared.clone(),
            self.config.clone(),
            request_url,
            ws,
            out_rx,
            events_tx,
        ));
        *self.shared.driver.lock() = Some(driver);

        info!(url = %url, auto_subscribe = options.auto_subscribe, "Connected to room gateway");
        Ok(events_rx)
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let published: Vec<String> = self.shared.published.lock().iter().cloned().collect();
        for track_sid in published {
            let _ = self.shared.send(Outbound::Signal(ClientSignal::UnpublishTrack { track_sid }));
        }
        let _ = self.shared.send(Outbound::Signal(ClientSignal::Leave {}));
        let _ = self.shared.send(Outbound::Close);

        let driver = self.shared.driver.lock().take();
        if let Some(mut driver) = driver {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
                warn!("Room driver did not stop in time; aborting");
                driver.abort();
            }
        }

        self.shared.outbound.lock().take();
        self.shared.reset_room_state();
    }

    async fn create_local_audio_track(&self, name: &str) -> Result<Arc<dyn AudioSink>, PublishError> {
        if name.trim().is_empty() {
            return Err(PublishError::TrackCreation("track name is required".to_string()));
        }

        Ok(Arc::new(LocalWsTrack {
            sid: format!("TR_{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            shared: self.shared.clone(),
            chunk_bytes: self.config.playback_chunk_bytes.max(2),
            sample_rate: self.config.sample_rate,
            stopped: AtomicBool::new(false),
        }))
    }

    async fn publish_track(
        &self,
        track: &dyn AudioSink,
        options: PublishOptions,
    ) -> Result<(), PublishError> {
        self.shared.send(Outbound::Signal(ClientSignal::PublishTrack {
            track_sid: track.sid().to_string(),
            name: track.name().to_string(),
            kind: TrackKind::Audio,
            source: options.source,
        }))?;

        self.shared.published.lock().insert(track.sid().to_string());
        Ok(())
    }

    fn is_published(&self, track_sid: &str) -> bool {
        self.shared.published.lock().contains(track_sid)
    }
}

/// Creates a fresh [`WsRoomClient`] per session.
pub struct WsRoomConnector {
    config: RoomConfig,
}

impl WsRoomConnector {
    pub fn new(config: RoomConfig) -> Self {
        Self { config }
    }
}

impl RoomConnector for WsRoomConnector {
    fn client(&self) -> Arc<dyn RoomClient> {
        Arc::new(WsRoomClient::new(self.config.clone()))
    }
}

/// The agent's published track. Audio is sent in fixed-size frames, paced
/// at real time so that `stop()` takes effect mid-utterance.
struct LocalWsTrack {
    sid: String,
    name: String,
    shared: Arc<Shared>,
    chunk_bytes: usize,
    sample_rate: u32,
    stopped: AtomicBool,
}

#[async_trait]
impl AudioSink for LocalWsTrack {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    async fn play(&self, pcm: &[u8]) -> Result<PlaybackOutcome, PublishError> {
        if !self.shared.published.lock().contains(&self.sid) {
            return Err(PublishError::Playback("agent track is not published".to_string()));
        }

        let bytes_per_second = self.sample_rate as f64 * 2.0;
        for chunk in pcm.chunks(self.chunk_bytes) {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(PlaybackOutcome::Stopped);
            }
            let frame = codec::encode_frame(&self.sid, chunk)
                .map_err(|e| PublishError::Playback(e.to_string()))?;
            self.shared.send(Outbound::Audio(frame))?;
            tokio::time::sleep(Duration::from_secs_f64(chunk.len() as f64 / bytes_per_second)).await;
        }

        Ok(PlaybackOutcome::Completed)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Gateway URL with the join parameters appended as query pairs.
fn join_url(url: &str, credential: &str, auto_subscribe: bool) -> Result<String, ConnectionError> {
    let mut url = Url::parse(url.trim())
        .map_err(|e| ConnectionError::InvalidArgument(format!("invalid room url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("access_token", credential)
        .append_pair("auto_subscribe", if auto_subscribe { "true" } else { "false" });
    Ok(url.into())
}

async fn handshake(config: &RoomConfig, request_url: &str) -> Result<WsStream, ConnectionError> {
    let limit = Duration::from_millis(config.connect_timeout_ms);
    match tokio::time::timeout(limit, connect_async(request_url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(err)) => Err(classify_connect_error(err)),
        Err(_) => Err(ConnectionError::Unreachable(format!(
            "no handshake within {}ms",
            config.connect_timeout_ms
        ))),
    }
}

fn classify_connect_error(err: tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectionError::CredentialRejected(format!("gateway answered {}", status))
            } else {
                ConnectionError::Unreachable(format!("gateway answered {}", status))
            }
        }
        tungstenite::Error::Url(err) => ConnectionError::InvalidArgument(err.to_string()),
        other => ConnectionError::Unreachable(other.to_string()),
    }
}

async fn drive(
    shared: Arc<Shared>,
    config: RoomConfig,
    request_url: String,
    mut ws: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<RoomEvent>,
) {
    loop {
        match pump(&shared, &config, &mut ws, &mut out_rx, &events).await {
            SocketEnd::Local => {
                debug!("Room connection closed locally");
                break;
            }
            SocketEnd::Left(reason) => {
                info!(reason = %reason, "Gateway closed the room session");
                let _ = events.send(RoomEvent::Disconnected { reason });
                break;
            }
            SocketEnd::Lost(reason) => {
                if shared.closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!(reason = %reason, "Room connection lost; reconnecting");
                shared.reset_room_state();
                let _ = events.send(RoomEvent::Reconnecting);

                match reconnect(&shared, &config, &request_url).await {
                    Some(fresh) => {
                        ws = fresh;
                        let _ = events.send(RoomEvent::Reconnected);
                    }
                    None => {
                        let _ = events.send(RoomEvent::Disconnected { reason });
                        break;
                    }
                }
            }
        }
    }

    shared.outbound.lock().take();
}

async fn pump(
    shared: &Shared,
    config: &RoomConfig,
    ws: &mut WsStream,
    out_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<RoomEvent>,
) -> SocketEnd {
    loop {
        tokio::select! {
            incoming = ws.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return SocketEnd::Lost(err.to_string()),
                    None => return SocketEnd::Lost("socket closed".to_string()),
                };

                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerSignal>(&text) {
                        Ok(ServerSignal::Leave { reason }) => {
                            return SocketEnd::Left(reason.unwrap_or_else(|| "left by gateway".to_string()));
                        }
                        Ok(ServerSignal::Ping { timestamp }) => {
                            if let Err(err) = send_signal(ws, &ClientSignal::Pong { timestamp }).await {
                                return SocketEnd::Lost(err.to_string());
                            }
                        }
                        Ok(signal) => apply_signal(shared, config, signal, events),
                        Err(err) => warn!(error = %err, "Ignoring malformed signal"),
                    },
                    Message::Binary(frame) => ingest_audio(shared, &frame),
                    Message::Close(frame) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by gateway".to_string());
                        return SocketEnd::Lost(reason);
                    }
                    _ => {}
                }
            }
            outgoing = out_rx.recv() => {
                let result = match outgoing {
                    Some(Outbound::Signal(signal)) => send_signal(ws, &signal).await,
                    Some(Outbound::Audio(frame)) => ws.send(Message::Binary(frame)).await,
                    Some(Outbound::Close) | None => {
                        let _ = ws.close(None).await;
                        return SocketEnd::Local;
                    }
                };
                if let Err(err) = result {
                    return SocketEnd::Lost(err.to_string());
                }
            }
        }
    }
}

async fn send_signal(ws: &mut WsStream, signal: &ClientSignal) -> Result<(), tungstenite::Error> {
    match serde_json::to_string(signal) {
        Ok(text) => ws.send(Message::Text(text)).await,
        Err(err) => {
            warn!(error = %err, "Failed to encode signal");
            Ok(())
        }
    }
}

fn apply_signal(
    shared: &Shared,
    config: &RoomConfig,
    signal: ServerSignal,
    events: &mpsc::UnboundedSender<RoomEvent>,
) {
    let event = match signal {
        ServerSignal::ParticipantConnected { identity, .. } => {
            Some(RoomEvent::ParticipantConnected { identity })
        }
        ServerSignal::ParticipantDisconnected { identity, .. } => {
            shared.tracks.lock().retain(|_, track| track.participant != identity);
            Some(RoomEvent::ParticipantDisconnected { identity })
        }
        ServerSignal::TrackSubscribed { track_sid, kind, participant } => {
            let buffer = AudioBuffer::new(config.sample_rate, config.max_buffered_seconds);
            let track = Arc::new(RemoteTrack::new(track_sid.clone(), kind, participant, buffer));
            shared.tracks.lock().insert(track_sid, track.clone());
            Some(RoomEvent::TrackSubscribed { track })
        }
        ServerSignal::TrackUnsubscribed { track_sid, participant, .. } => {
            shared.tracks.lock().remove(&track_sid);
            Some(RoomEvent::TrackUnsubscribed { track_sid, participant })
        }
        ServerSignal::UtteranceReady { track_sid, participant } => {
            let track = shared.tracks.lock().get(&track_sid).cloned();
            match track {
                Some(track) => Some(RoomEvent::UtteranceReady { track }),
                None => {
                    debug!(track_sid = %track_sid, participant = %participant, "Utterance for unknown track");
                    None
                }
            }
        }
        ServerSignal::ActiveSpeakersChanged { speakers } => {
            Some(RoomEvent::ActiveSpeakersChanged { speakers })
        }
        ServerSignal::TrackPublished { track_sid } => {
            shared.published.lock().insert(track_sid);
            None
        }
        ServerSignal::Ping { .. } | ServerSignal::Leave { .. } => None,
    };

    if let Some(event) = event {
        let _ = events.send(event);
    }
}

fn ingest_audio(shared: &Shared, frame: &[u8]) {
    let (sid, pcm) = match codec::decode_frame(frame) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(error = %err, "Dropping malformed audio frame");
            return;
        }
    };

    let track = shared.tracks.lock().get(&sid).cloned();
    match track {
        Some(track) => {
            if let Err(err) = track.buffer.append_pcm_data(pcm) {
                warn!(track_sid = %sid, error = %err, "Dropping audio frame");
            }
        }
        None => debug!(track_sid = %sid, "Audio for unsubscribed track"),
    }
}

async fn reconnect(shared: &Shared, config: &RoomConfig, request_url: &str) -> Option<WsStream> {
    for attempt in 1..=config.max_reconnect_attempts {
        let backoff = config.reconnect_backoff_ms.saturating_mul(attempt as u64);
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        if shared.closing.load(Ordering::SeqCst) {
            return None;
        }

        match handshake(config, request_url).await {
            Ok(ws) => {
                info!(attempt, "Reconnected to room gateway");
                return Some(ws);
            }
            Err(err) => warn!(attempt, error = %err, "Reconnect attempt failed"),
        }
    }

    None
}
