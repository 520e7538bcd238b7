//! # Provider Adapters
//!
//! The three external capabilities a turn depends on, each a single async call:
//!
//! - [`Transcriber`]: utterance audio → text
//! - [`ResponseGenerator`]: conversation history → reply text
//! - [`Synthesizer`]: reply text → 16-bit PCM (empty means "no audio")
//!
//! Adapters are selected by name in configuration. Every session gets its own
//! [`Providers`] set so per-session state (like the simulated transcriber's
//! counter) is not shared.

pub mod llm;
pub mod stt;
pub mod tts;

use crate::agent::history::Turn;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::room::RemoteTrack;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// A step of the turn pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    Generation,
    Synthesis,
    Playback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::Generation => "generation",
            Stage::Synthesis => "synthesis",
            Stage::Playback => "playback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transcribe the track's pending utterance. The track is borrowed
    /// weakly; if the room has already dropped it the call fails with
    /// [`ProviderError::TrackUnavailable`].
    async fn transcribe(&self, track: Weak<RemoteTrack>) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, history: &[Turn]) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// The adapters used by one session.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("transcriber", &self.transcriber.name())
            .field("generator", &self.generator.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}

impl Providers {
    /// Build the adapters named in configuration.
    pub fn from_config(config: &ProvidersConfig, sample_rate: u32) -> Result<Self, ProviderError> {
        let transcriber: Arc<dyn Transcriber> = match config.stt.provider.as_str() {
            "simulated" => Arc::new(stt::SimulatedTranscriber::new(config.stt.simulated_delay_ms)),
            "whisper_api" => Arc::new(stt::WhisperApiTranscriber::new(&config.stt)?),
            other => return Err(ProviderError::Config(format!("unknown stt provider '{}'", other))),
        };

        let generator: Arc<dyn ResponseGenerator> = match config.llm.provider.as_str() {
            "simulated" => Arc::new(llm::SimulatedGenerator),
            "groq" => Arc::new(llm::GroqGenerator::new(&config.llm)?),
            other => return Err(ProviderError::Config(format!("unknown llm provider '{}'", other))),
        };

        let synthesizer: Arc<dyn Synthesizer> = match config.tts.provider.as_str() {
            "simulated" => Arc::new(tts::SimulatedSynthesizer::new(sample_rate)),
            "elevenlabs" => Arc::new(tts::ElevenLabsSynthesizer::new(&config.tts)?),
            other => return Err(ProviderError::Config(format!("unknown tts provider '{}'", other))),
        };

        Ok(Self {
            transcriber,
            generator,
            synthesizer,
        })
    }
}

/// Builds a fresh [`Providers`] set for each new session.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, session_id: &str) -> Result<Providers, ProviderError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str) -> Result<Providers, ProviderError> + Send + Sync,
{
    fn build(&self, session_id: &str) -> Result<Providers, ProviderError> {
        self(session_id)
    }
}

/// Factory driven by the `providers` configuration section.
pub struct ConfiguredProviders {
    config: ProvidersConfig,
    sample_rate: u32,
}

impl ConfiguredProviders {
    pub fn new(config: ProvidersConfig, sample_rate: u32) -> Self {
        Self { config, sample_rate }
    }
}

impl ProviderFactory for ConfiguredProviders {
    fn build(&self, _session_id: &str) -> Result<Providers, ProviderError> {
        Providers::from_config(&self.config, self.sample_rate)
    }
}

/// Pull a usable API key out of configuration.
fn require_key(kind: &str, key: &Option<String>) -> Result<String, ProviderError> {
    key.as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Config(format!("{} provider requires an api key", kind)))
}
