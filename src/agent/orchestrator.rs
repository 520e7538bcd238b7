//! # Turn Orchestrator
//!
//! Runs one conversational turn at a time:
//!
//! ```text
//! transcribe ─► commit user turn ─► generate ─► commit reply ─► synthesize ─► play
//! ```
//!
//! Every provider call runs on its own task and reports back through a
//! [`StageCompletion`] tagged with the turn id. The session loop feeds each
//! completion to [`TurnOrchestrator::handle_completion`], which records metrics,
//! commits history and launches the next stage. Nothing here blocks the loop,
//! so room events (interruptions in particular) are handled while a provider
//! is still working.
//!
//! Interrupted turns are *abandoned*, not cancelled: the provider task keeps
//! running and its late result is discarded when it arrives, before it can
//! touch history or start another stage.

use super::history::{ConversationHistory, Role, Turn};
use super::state::{SessionState, Transition, TurnState};
use crate::error::{ProviderError, PublishError};
use crate::metrics::{LatencyMetric, MetricsSink};
use crate::providers::{Providers, Stage};
use crate::room::{AudioSink, PlaybackOutcome, RemoteTrack};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type TurnId = u64;

/// Start and end of one provider call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageSpan {
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
}

impl StageSpan {
    fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    fn finish(&mut self) -> Duration {
        let now = Instant::now();
        self.ended = Some(now);
        self.started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.ended?.saturating_duration_since(self.started?))
    }
}

/// Bookkeeping for the turn in flight.
#[derive(Debug)]
pub struct TurnExecution {
    pub id: TurnId,
    pub started_at: Instant,
    pub stt: StageSpan,
    pub llm: StageSpan,
    pub tts: StageSpan,
    pub abandoned: bool,
}

impl TurnExecution {
    fn new(id: TurnId) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            stt: StageSpan::default(),
            llm: StageSpan::default(),
            tts: StageSpan::default(),
            abandoned: false,
        }
    }
}

#[derive(Debug)]
pub enum StageOutput {
    Transcript(String),
    Reply(String),
    Audio(Vec<u8>),
    Played(Result<PlaybackOutcome, PublishError>),
}

/// A finished stage task, delivered back to the session loop.
#[derive(Debug)]
pub struct StageCompletion {
    pub turn: TurnId,
    pub stage: Stage,
    pub result: Result<StageOutput, ProviderError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    SilentTranscript,
    EmptyReply,
    ProviderFailed(Stage),
}

/// What handling a completion did to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDisposition {
    /// The next stage was launched.
    Advanced(Stage),
    Completed,
    Aborted(AbortReason),
    /// The completion belonged to an abandoned or unknown turn.
    Discarded,
}

pub struct TurnOrchestrator {
    session_id: String,
    providers: Providers,
    metrics: Arc<dyn MetricsSink>,
    history: ConversationHistory,
    current: Option<TurnExecution>,
    last_turn_id: TurnId,
    provider_timeout: Duration,
    completions: mpsc::UnboundedSender<StageCompletion>,
}

impl TurnOrchestrator {
    pub fn new(
        session_id: impl Into<String>,
        providers: Providers,
        metrics: Arc<dyn MetricsSink>,
        provider_timeout: Duration,
        completions: mpsc::UnboundedSender<StageCompletion>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            providers,
            metrics,
            history: ConversationHistory::new(),
            current: None,
            last_turn_id: 0,
            provider_timeout,
            completions,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// The live (not abandoned) turn, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        self.current.as_ref().filter(|exec| !exec.abandoned).map(|exec| exec.id)
    }

    /// Start a turn for `track` if the session is listening. Signals that
    /// arrive while not listening are dropped, not queued.
    pub fn begin_turn(&mut self, state: &mut SessionState, track: &Arc<RemoteTrack>) -> Option<TurnId> {
        if !state.can_begin_turn() || self.active_turn().is_some() {
            debug!(
                session_id = %self.session_id,
                connection = %state.connection(),
                turn_state = %state.turn(),
                track_sid = %track.sid,
                "Dropping audio signal; not listening"
            );
            return None;
        }
        if let Err(err) = state.apply(Transition::BeginTurn) {
            warn!(session_id = %self.session_id, error = %err, "Could not begin turn");
            return None;
        }

        self.last_turn_id += 1;
        let id = self.last_turn_id;
        self.metrics.start_turn();

        let mut exec = TurnExecution::new(id);
        exec.stt.begin();

        let transcriber = self.providers.transcriber.clone();
        let weak_track = Arc::downgrade(track);
        self.spawn_provider_call(id, Stage::Transcription, async move {
            transcriber.transcribe(weak_track).await.map(StageOutput::Transcript)
        });

        info!(session_id = %self.session_id, turn = id, track_sid = %track.sid, "Turn started");
        self.current = Some(exec);
        Some(id)
    }

    /// Advance the turn with a finished stage.
    pub fn handle_completion(
        &mut self,
        state: &mut SessionState,
        outbound: Option<&Arc<dyn AudioSink>>,
        completion: StageCompletion,
    ) -> StageDisposition {
        let StageCompletion { turn, stage, result } = completion;

        let exec = match self.current.take() {
            Some(exec) if exec.id == turn && !exec.abandoned => exec,
            other => {
                self.current = other;
                debug!(session_id = %self.session_id, turn, stage = %stage, "Discarding result of abandoned turn");
                return StageDisposition::Discarded;
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                error!(session_id = %self.session_id, turn, stage = %stage, error = %err, "Provider call failed");
                return self.abort(state, AbortReason::ProviderFailed(stage));
            }
        };

        match (stage, output) {
            (Stage::Transcription, StageOutput::Transcript(text)) => self.on_transcript(state, exec, text),
            (Stage::Generation, StageOutput::Reply(text)) => self.on_reply(state, exec, text),
            (Stage::Synthesis, StageOutput::Audio(audio)) => self.on_audio(state, exec, audio, outbound),
            (Stage::Playback, StageOutput::Played(outcome)) => {
                match outcome {
                    Ok(PlaybackOutcome::Completed) => debug!(session_id = %self.session_id, turn, "Playback finished"),
                    Ok(PlaybackOutcome::Stopped) => debug!(session_id = %self.session_id, turn, "Playback stopped early"),
                    Err(err) => warn!(session_id = %self.session_id, turn, error = %err, "Playback failed"),
                }
                self.complete(state, exec)
            }
            (stage, _) => {
                error!(session_id = %self.session_id, turn, stage = %stage, "Stage produced unexpected output");
                self.abort(state, AbortReason::ProviderFailed(stage))
            }
        }
    }

    /// Abandon the turn in flight because the user started talking.
    /// Returns false when there was nothing to interrupt.
    pub fn interrupt(&mut self, state: &mut SessionState, outbound: Option<&Arc<dyn AudioSink>>) -> bool {
        if state.turn() != TurnState::Processing {
            return false;
        }
        if let Err(err) = state.apply(Transition::Interrupt) {
            warn!(session_id = %self.session_id, error = %err, "Could not interrupt turn");
            return false;
        }

        if let Some(exec) = self.current.as_mut() {
            exec.abandoned = true;
            info!(session_id = %self.session_id, turn = exec.id, "User interrupted; abandoning turn");
        }
        if let Some(sink) = outbound {
            sink.stop();
        }
        self.metrics.record_interruption();

        if let Err(err) = state.apply(Transition::ResumeListening) {
            warn!(session_id = %self.session_id, error = %err, "Could not resume listening");
        }
        true
    }

    /// Drop whatever is in flight and move to `Ended`.
    pub fn end(&mut self, state: &mut SessionState) {
        if let Some(exec) = self.current.as_mut() {
            exec.abandoned = true;
        }
        // End is accepted from every state.
        let _ = state.apply(Transition::End);
    }

    fn on_transcript(&mut self, state: &mut SessionState, mut exec: TurnExecution, text: String) -> StageDisposition {
        self.metrics.record_latency(LatencyMetric::Stt, exec.stt.finish());

        if text.trim().is_empty() {
            info!(session_id = %self.session_id, turn = exec.id, "Empty transcript; skipping response");
            return self.abort(state, AbortReason::SilentTranscript);
        }

        self.metrics.record_latency(LatencyMetric::EouDelay, exec.started_at.elapsed());
        info!(session_id = %self.session_id, turn = exec.id, transcript = %text, "User turn committed");
        self.history.append(Role::User, text);

        exec.llm.begin();
        let generator = self.providers.generator.clone();
        let history: Vec<Turn> = self.history.turns().to_vec();
        self.spawn_provider_call(exec.id, Stage::Generation, async move {
            generator.generate(&history).await.map(StageOutput::Reply)
        });

        self.current = Some(exec);
        StageDisposition::Advanced(Stage::Generation)
    }

    fn on_reply(&mut self, state: &mut SessionState, mut exec: TurnExecution, text: String) -> StageDisposition {
        self.metrics.record_latency(LatencyMetric::Llm, exec.llm.finish());
        self.metrics.record_latency(LatencyMetric::Ttfb, exec.started_at.elapsed());

        if text.trim().is_empty() {
            info!(session_id = %self.session_id, turn = exec.id, "Empty reply; skipping synthesis");
            return self.abort(state, AbortReason::EmptyReply);
        }

        self.history.append(Role::Assistant, text.clone());

        exec.tts.begin();
        let synthesizer = self.providers.synthesizer.clone();
        let reply = text;
        self.spawn_provider_call(exec.id, Stage::Synthesis, async move {
            synthesizer.synthesize(&reply).await.map(StageOutput::Audio)
        });

        self.current = Some(exec);
        StageDisposition::Advanced(Stage::Synthesis)
    }

    fn on_audio(
        &mut self,
        state: &mut SessionState,
        mut exec: TurnExecution,
        audio: Vec<u8>,
        outbound: Option<&Arc<dyn AudioSink>>,
    ) -> StageDisposition {
        self.metrics.record_latency(LatencyMetric::Tts, exec.tts.finish());

        if audio.is_empty() {
            info!(session_id = %self.session_id, turn = exec.id, "Synthesizer produced no audio");
            return self.complete(state, exec);
        }
        let Some(sink) = outbound.cloned() else {
            warn!(session_id = %self.session_id, turn = exec.id, "No outbound track; skipping playback");
            return self.complete(state, exec);
        };

        sink.prepare();
        let tx = self.completions.clone();
        let turn = exec.id;
        tokio::spawn(async move {
            let outcome = sink.play(&audio).await;
            let _ = tx.send(StageCompletion {
                turn,
                stage: Stage::Playback,
                result: Ok(StageOutput::Played(outcome)),
            });
        });

        self.current = Some(exec);
        StageDisposition::Advanced(Stage::Playback)
    }

    fn complete(&mut self, state: &mut SessionState, exec: TurnExecution) -> StageDisposition {
        let total = exec.started_at.elapsed();
        self.metrics.record_latency(LatencyMetric::Total, total);
        self.metrics.record_latency(LatencyMetric::Ttft, total);

        if let Err(err) = state.apply(Transition::FinishTurn) {
            warn!(session_id = %self.session_id, error = %err, "Could not finish turn");
        }
        info!(
            session_id = %self.session_id,
            turn = exec.id,
            total_ms = total.as_millis() as u64,
            "Turn completed"
        );
        StageDisposition::Completed
    }

    fn abort(&mut self, state: &mut SessionState, reason: AbortReason) -> StageDisposition {
        if let Err(err) = state.apply(Transition::FinishTurn) {
            warn!(session_id = %self.session_id, error = %err, "Could not finish turn");
        }
        StageDisposition::Aborted(reason)
    }

    /// Run `call` on its own task, bounded by the provider timeout, and
    /// report the result as a completion for `turn`.
    fn spawn_provider_call<F>(&self, turn: TurnId, stage: Stage, call: F)
    where
        F: Future<Output = Result<StageOutput, ProviderError>> + Send + 'static,
    {
        let tx = self.completions.clone();
        let timeout = self.provider_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    stage,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = tx.send(StageCompletion { turn, stage, result });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LatencyTargets;
    use crate::metrics::SessionMetrics;
    use crate::testing::{
        remote_track, FakeSink, ScriptedGenerator, ScriptedSynthesizer, ScriptedTranscriber,
    };

    struct Fixture {
        state: SessionState,
        orchestrator: TurnOrchestrator,
        completions: mpsc::UnboundedReceiver<StageCompletion>,
        stt: Arc<ScriptedTranscriber>,
        llm: Arc<ScriptedGenerator>,
        metrics: Arc<SessionMetrics>,
    }

    fn fixture(stt: Arc<ScriptedTranscriber>, timeout: Duration) -> Fixture {
        let llm = ScriptedGenerator::new(vec!["hi there"]);
        let tts = ScriptedSynthesizer::new();
        let providers = Providers {
            transcriber: stt.clone(),
            generator: llm.clone(),
            synthesizer: tts,
        };
        let metrics = Arc::new(SessionMetrics::new("s1", "alice", LatencyTargets::default()));
        let (tx, completions) = mpsc::unbounded_channel();

        let mut state = SessionState::new();
        state.apply(Transition::Connecting).unwrap();
        state.apply(Transition::Connected).unwrap();

        Fixture {
            state,
            orchestrator: TurnOrchestrator::new("s1", providers, metrics.clone(), timeout, tx),
            completions,
            stt,
            llm,
            metrics,
        }
    }

    impl Fixture {
        async fn step(&mut self, outbound: Option<&Arc<dyn AudioSink>>) -> StageDisposition {
            let completion = tokio::time::timeout(Duration::from_secs(5), self.completions.recv())
                .await
                .expect("timed out waiting for stage")
                .expect("completion channel closed");
            self.orchestrator.handle_completion(&mut self.state, outbound, completion)
        }
    }

    #[tokio::test]
    async fn test_full_turn_without_outbound_track() {
        let mut f = fixture(ScriptedTranscriber::new(vec!["hello"]), Duration::from_secs(5));
        let track = remote_track("alice");

        assert_eq!(f.orchestrator.begin_turn(&mut f.state, &track), Some(1));
        assert_eq!(f.step(None).await, StageDisposition::Advanced(Stage::Generation));
        assert_eq!(f.step(None).await, StageDisposition::Advanced(Stage::Synthesis));
        assert_eq!(f.step(None).await, StageDisposition::Completed);

        assert_eq!(f.state.turn(), TurnState::Listening);
        assert_eq!(f.orchestrator.history().len(), 2);
        assert_eq!(f.llm.calls(), 1);
        let summary = f.metrics.summary();
        assert_eq!(summary.sample_count(LatencyMetric::Total), 1);
        assert_eq!(summary.sample_count(LatencyMetric::Ttfb), 1);
    }

    #[tokio::test]
    async fn test_playback_is_last_stage() {
        let mut f = fixture(ScriptedTranscriber::new(vec!["hello"]), Duration::from_secs(5));
        let sink = FakeSink::new();
        let outbound: Arc<dyn AudioSink> = sink.clone();
        let track = remote_track("alice");

        f.orchestrator.begin_turn(&mut f.state, &track);
        f.step(Some(&outbound)).await;
        f.step(Some(&outbound)).await;
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Advanced(Stage::Playback));
        assert_eq!(f.state.turn(), TurnState::Processing);
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Completed);

        assert_eq!(sink.played().len(), 1);
        assert_eq!(f.state.turn(), TurnState::Listening);
    }

    #[tokio::test]
    async fn test_interrupt_before_playback_starts_sends_nothing() {
        let mut f = fixture(ScriptedTranscriber::new(vec!["hello"]), Duration::from_secs(5));
        let sink = FakeSink::new();
        let outbound: Arc<dyn AudioSink> = sink.clone();
        let track = remote_track("alice");

        f.orchestrator.begin_turn(&mut f.state, &track);
        f.step(Some(&outbound)).await;
        f.step(Some(&outbound)).await;
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Advanced(Stage::Playback));

        // The playback task has been spawned but not polled yet.
        assert!(f.orchestrator.interrupt(&mut f.state, Some(&outbound)));
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Discarded);
        assert!(sink.played().is_empty());
        assert_eq!(f.state.turn(), TurnState::Listening);
    }

    #[tokio::test]
    async fn test_earlier_stop_does_not_cancel_next_playback() {
        let stt = ScriptedTranscriber::new(vec!["first", "second"]);
        let _gate = stt.hold();
        let mut f = fixture(stt, Duration::from_secs(5));
        let sink = FakeSink::new();
        let outbound: Arc<dyn AudioSink> = sink.clone();
        let track = remote_track("alice");

        // Interrupted while transcribing, so the stop reaches an idle track.
        f.orchestrator.begin_turn(&mut f.state, &track);
        assert!(f.orchestrator.interrupt(&mut f.state, Some(&outbound)));
        assert_eq!(sink.stop_count(), 1);

        assert_eq!(f.orchestrator.begin_turn(&mut f.state, &track), Some(2));
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Advanced(Stage::Generation));
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Advanced(Stage::Synthesis));
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Advanced(Stage::Playback));
        assert_eq!(f.step(Some(&outbound)).await, StageDisposition::Completed);
        assert_eq!(sink.played().len(), 1);
    }

    #[tokio::test]
    async fn test_history_keeps_provider_text() {
        let mut f = fixture(ScriptedTranscriber::new(vec![" hello there "]), Duration::from_secs(5));
        let track = remote_track("alice");

        f.orchestrator.begin_turn(&mut f.state, &track);
        assert_eq!(f.step(None).await, StageDisposition::Advanced(Stage::Generation));
        assert_eq!(f.orchestrator.history().turns()[0].content, " hello there ");
    }

    #[tokio::test]
    async fn test_second_signal_dropped_while_processing() {
        let mut f = fixture(ScriptedTranscriber::new(vec!["hello"]), Duration::from_secs(5));
        let track = remote_track("alice");

        assert!(f.orchestrator.begin_turn(&mut f.state, &track).is_some());
        assert!(f.orchestrator.begin_turn(&mut f.state, &track).is_none());
        assert_eq!(f.metrics.summary().turns, 1);
        assert_eq!(f.orchestrator.active_turn(), Some(1));
    }

    #[tokio::test]
    async fn test_provider_timeout_returns_to_listening() {
        let stt = ScriptedTranscriber::new(vec!["never delivered"]);
        let _gate = stt.hold();
        let mut f = fixture(stt, Duration::from_millis(50));
        let track = remote_track("alice");

        f.orchestrator.begin_turn(&mut f.state, &track);
        assert_eq!(
            f.step(None).await,
            StageDisposition::Aborted(AbortReason::ProviderFailed(Stage::Transcription))
        );
        assert_eq!(f.state.turn(), TurnState::Listening);
        assert!(f.orchestrator.history().is_empty());
        assert_eq!(f.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_result_cannot_touch_newer_turn() {
        let stt = ScriptedTranscriber::new(vec!["stale words", "fresh words"]);
        let gate = stt.hold();
        let mut f = fixture(stt, Duration::from_secs(5));
        let track = remote_track("alice");

        f.orchestrator.begin_turn(&mut f.state, &track);
        assert!(f.orchestrator.interrupt(&mut f.state, None));
        assert_eq!(f.state.turn(), TurnState::Listening);

        // Second turn starts while the first transcription is still pending.
        assert_eq!(f.orchestrator.begin_turn(&mut f.state, &track), Some(2));
        gate.notify_one();

        assert_eq!(f.step(None).await, StageDisposition::Discarded);
        assert_eq!(f.step(None).await, StageDisposition::Advanced(Stage::Generation));
        assert_eq!(f.orchestrator.history().turns()[0].content, "fresh words");
        assert_eq!(f.stt.calls(), 2);
        assert_eq!(f.metrics.summary().interruptions, 1);
    }
}
