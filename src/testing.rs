//! In-memory stand-ins for the room and the providers, used by unit tests.

use crate::agent::history::Turn;
use crate::agent::SessionRegistry;
use crate::config::AppConfig;
use crate::audio::AudioBuffer;
use crate::error::{ConnectionError, ProviderError, PublishError};
use crate::providers::{ConfiguredProviders, Providers, ResponseGenerator, Synthesizer, Transcriber};
use crate::room::{
    AudioSink, ConnectOptions, PlaybackOutcome, PublishOptions, RemoteTrack, RoomClient,
    RoomConnector, RoomEvent, TrackKind,
};
use crate::state::AppState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};

pub fn remote_track(participant: &str) -> Arc<RemoteTrack> {
    Arc::new(RemoteTrack::new(
        format!("TR_{}", participant),
        TrackKind::Audio,
        participant,
        AudioBuffer::new(16000, 1),
    ))
}

/// A reply queue where the next call can be made to wait on a gate.
struct Script<T> {
    replies: Mutex<VecDeque<Result<T, ProviderError>>>,
    fallback: T,
    next_gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(replies: Vec<Result<T, ProviderError>>, fallback: T) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            next_gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.next_gate.lock() = Some(gate.clone());
        gate
    }

    async fn next(&self) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        let gate = self.next_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        reply
    }
}

pub struct ScriptedTranscriber {
    script: Script<String>,
}

impl ScriptedTranscriber {
    pub fn new(replies: Vec<&str>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(replies, String::new()),
        })
    }

    /// Make the next call wait until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        self.script.hold()
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, _track: Weak<RemoteTrack>) -> Result<String, ProviderError> {
        self.script.next().await
    }
}

pub struct ScriptedGenerator {
    script: Script<String>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<&str>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(replies, "ok".to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn hold(&self) -> Arc<Notify> {
        self.script.hold()
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Histories passed to each call, in order.
    pub fn seen(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, history: &[Turn]) -> Result<String, ProviderError> {
        self.seen.lock().push(history.to_vec());
        self.script.next().await
    }
}

pub struct ScriptedSynthesizer {
    script: Script<Vec<u8>>,
    texts: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    /// Returns four bytes of audio for every call.
    pub fn new() -> Arc<Self> {
        Self::with_results(Vec::new())
    }

    pub fn with_results(replies: Vec<Result<Vec<u8>, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(replies, vec![1, 0, 2, 0]),
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        self.texts.lock().push(text.to_string());
        self.script.next().await
    }
}

pub struct ScriptedProviders {
    pub stt: Arc<ScriptedTranscriber>,
    pub llm: Arc<ScriptedGenerator>,
    pub tts: Arc<ScriptedSynthesizer>,
}

impl ScriptedProviders {
    pub fn new(
        stt: Arc<ScriptedTranscriber>,
        llm: Arc<ScriptedGenerator>,
        tts: Arc<ScriptedSynthesizer>,
    ) -> Self {
        Self { stt, llm, tts }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            transcriber: self.stt.clone(),
            generator: self.llm.clone(),
            synthesizer: self.tts.clone(),
        }
    }
}

/// Outbound track that records what it was asked to play.
pub struct FakeSink {
    sid: String,
    name: String,
    played: Mutex<Vec<Vec<u8>>>,
    stops: AtomicUsize,
    stopped: AtomicBool,
    hold: AtomicBool,
    fail: AtomicBool,
    stop_signal: Notify,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Self::named("TR_agent", "agent-tts-output")
    }

    pub fn named(sid: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.to_string(),
            name: name.to_string(),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            stop_signal: Notify::new(),
        })
    }

    /// Keep playback running until `stop()` is called.
    pub fn hold_playback(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn fail_playback(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for FakeSink {
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
        if self.fail.load(Ordering::SeqCst) {
            self.played.lock().push(pcm.to_vec());
            return Err(PublishError::Playback("speaker unplugged".to_string()));
        }

        let stopped = self.stop_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(PlaybackOutcome::Stopped);
        }

        self.played.lock().push(pcm.to_vec());
        if self.hold.load(Ordering::SeqCst) {
            stopped.await;
            return Ok(PlaybackOutcome::Stopped);
        }
        Ok(PlaybackOutcome::Completed)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }
}

/// Room client whose events are pushed by the test.
pub struct FakeRoom {
    events: Mutex<Option<mpsc::UnboundedSender<RoomEvent>>>,
    connect_error: Mutex<Option<ConnectionError>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    publishes: AtomicUsize,
    fail_publish: AtomicBool,
    published: Mutex<HashSet<String>>,
    sink: Arc<FakeSink>,
}

impl FakeRoom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            connect_error: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
            published: Mutex::new(HashSet::new()),
            sink: FakeSink::new(),
        })
    }

    pub fn sink(&self) -> Arc<FakeSink> {
        self.sink.clone()
    }

    pub fn emit(&self, event: RoomEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Close the event stream, as a room does when the connection is gone for good.
    pub fn close(&self) {
        self.events.lock().take();
    }

    pub fn fail_next_connect(&self, err: ConnectionError) {
        *self.connect_error.lock() = Some(err);
    }

    pub fn fail_publishing(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn drop_publications(&self) {
        self.published.lock().clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomClient for FakeRoom {
    async fn connect(
        &self,
        _url: &str,
        _credential: &str,
        _options: ConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<RoomEvent>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.connect_error.lock().take() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.events.lock().take();
        self.published.lock().clear();
    }

    async fn create_local_audio_track(&self, _name: &str) -> Result<Arc<dyn AudioSink>, PublishError> {
        Ok(self.sink.clone())
    }

    async fn publish_track(
        &self,
        track: &dyn AudioSink,
        _options: PublishOptions,
    ) -> Result<(), PublishError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PublishError::Publish("permission denied".to_string()));
        }
        self.published.lock().insert(track.sid().to_string());
        Ok(())
    }

    fn is_published(&self, track_sid: &str) -> bool {
        self.published.lock().contains(track_sid)
    }
}

/// Hands out pre-built fake rooms in order, then fresh ones.
pub struct FakeRoomConnector {
    rooms: Mutex<VecDeque<Arc<FakeRoom>>>,
    handed_out: Mutex<Vec<Arc<FakeRoom>>>,
}

impl FakeRoomConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(VecDeque::new()),
            handed_out: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, room: Arc<FakeRoom>) {
        self.rooms.lock().push_back(room);
    }

    pub fn rooms(&self) -> Vec<Arc<FakeRoom>> {
        self.handed_out.lock().clone()
    }
}

impl RoomConnector for FakeRoomConnector {
    fn client(&self) -> Arc<dyn RoomClient> {
        let room = self.rooms.lock().pop_front().unwrap_or_else(FakeRoom::new);
        self.handed_out.lock().push(room.clone());
        room
    }
}

/// Application state backed by fake rooms and simulated providers.
pub fn app_state() -> AppState {
    app_state_with(AppConfig::default(), FakeRoomConnector::new())
}

pub fn app_state_with(config: AppConfig, connector: Arc<FakeRoomConnector>) -> AppState {
    let providers = ConfiguredProviders::new(config.providers.clone(), config.room.sample_rate);
    let registry = SessionRegistry::new(connector, Arc::new(providers), config.clone());
    AppState::new(config, Arc::new(registry))
}
