//! # Configuration Management
//!
//! Settings are layered from several sources. Later sources override earlier ones:
//!
//! 1. Built-in defaults (the `Default` impl)
//! 2. `config.toml` in the working directory, if present
//! 3. `APP_`-prefixed environment variables, nested with `__`
//!    (e.g. `APP_PROVIDERS__LLM__MODEL=llama3-8b-8192`)
//! 4. Conventional variables used by deployment platforms and provider SDKs
//!    (`HOST`, `PORT`, `LIVEKIT_WS_URL`, `GROQ_API_KEY`, ...)
//!
//! The defaults run entirely on simulated providers, so the service starts
//! without any API keys. Selecting a network provider without its key fails
//! validation at startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

pub const STT_PROVIDERS: &[&str] = &["simulated", "whisper_api"];
pub const LLM_PROVIDERS: &[&str] = &["simulated", "groq"];
pub const TTS_PROVIDERS: &[&str] = &["simulated", "elevenlabs"];

/// Environment variables that map straight onto a config key.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("LIVEKIT_WS_URL", "room.url"),
    ("STT_API_KEY", "providers.stt.api_key"),
    ("GROQ_API_KEY", "providers.llm.api_key"),
    ("ELEVENLABS_API_KEY", "providers.tts.api_key"),
    ("ELEVENLABS_VOICE_ID", "providers.tts.voice_id"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub room: RoomConfig,
    pub providers: ProvidersConfig,
    pub pipeline: PipelineConfig,
    pub performance: PerformanceConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Media room connection settings.
///
/// ## Fields:
/// - `url`: default gateway URL used when a session request does not carry one
/// - `auto_subscribe`: ask the gateway to subscribe to remote tracks on join
/// - `agent_track_name`: name of the agent's published audio track
/// - `connect_timeout_ms`: bound on each join or reconnect handshake
/// - `max_reconnect_attempts` / `reconnect_backoff_ms`: bounded linear backoff
///   after an unexpected socket loss
/// - `playback_chunk_bytes`: size of each outbound PCM frame
/// - `sample_rate`: PCM sample rate on both directions (16-bit mono)
/// - `max_buffered_seconds`: cap on buffered inbound audio per remote track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub url: String,
    pub auto_subscribe: bool,
    pub agent_track_name: String,
    pub connect_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub playback_chunk_bytes: usize,
    pub sample_rate: u32,
    pub max_buffered_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Artificial latency of the simulated transcriber.
    pub simulated_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: String,
    pub model: String,
    /// Requested audio encoding. Must be raw PCM matching `room.sample_rate`.
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on any single provider call.
    pub provider_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub targets: LatencyTargets,
}

/// Latency goals, in milliseconds, that session averages are judged against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencyTargets {
    pub stt_ms: u64,
    pub llm_ms: u64,
    pub tts_ms: u64,
    pub total_ms: u64,
    pub eou_ms: u64,
    pub ttft_ms: u64,
    pub ttfb_ms: u64,
}

impl Default for LatencyTargets {
    fn default() -> Self {
        Self {
            stt_ms: 500,
            llm_ms: 800,
            tts_ms: 500,
            total_ms: 2000,
            eou_ms: 300,
            ttft_ms: 2000,
            ttfb_ms: 1000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            room: RoomConfig {
                url: "ws://127.0.0.1:7880/agent".to_string(),
                auto_subscribe: true,
                agent_track_name: "agent-tts-output".to_string(),
                connect_timeout_ms: 10_000,
                max_reconnect_attempts: 5,
                reconnect_backoff_ms: 500,
                playback_chunk_bytes: 3200, // 100ms of 16kHz 16-bit mono
                sample_rate: 16000,
                max_buffered_seconds: 30,
            },
            providers: ProvidersConfig {
                stt: SttConfig {
                    provider: "simulated".to_string(),
                    api_key: None,
                    base_url: "https://api.openai.com/v1".to_string(),
                    model: "whisper-1".to_string(),
                    simulated_delay_ms: 300,
                },
                llm: LlmConfig {
                    provider: "simulated".to_string(),
                    api_key: None,
                    base_url: "https://api.groq.com/openai/v1".to_string(),
                    model: "llama3-70b-8192".to_string(),
                    temperature: 0.7,
                    max_tokens: 800,
                    top_p: 0.9,
                    system_prompt: None,
                },
                tts: TtsConfig {
                    provider: "simulated".to_string(),
                    api_key: None,
                    base_url: "https://api.elevenlabs.io".to_string(),
                    voice_id: "EXAVITQu4vr4xnSDxMaL".to_string(),
                    model: "eleven_turbo_v2".to_string(),
                    output_format: "pcm_16000".to_string(),
                    stability: 0.5,
                    similarity_boost: 0.75,
                    style: 0.0,
                    use_speaker_boost: true,
                },
            },
            pipeline: PipelineConfig {
                provider_timeout_ms: 15_000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
            metrics: MetricsConfig {
                targets: LatencyTargets::default(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_ROOM__MAX_RECONNECT_ATTEMPTS=10`
    /// - `APP_PROVIDERS__LLM__PROVIDER=groq` together with `GROQ_API_KEY=...`
    /// - `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.pipeline.provider_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Provider timeout must be greater than 0"));
        }

        if self.room.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Room connect timeout must be greater than 0"));
        }

        if self.room.playback_chunk_bytes == 0 || self.room.playback_chunk_bytes % 2 != 0 {
            return Err(anyhow::anyhow!(
                "Playback chunk size must be a positive, even number of bytes"
            ));
        }

        if self.room.sample_rate == 0 {
            return Err(anyhow::anyhow!("Room sample rate must be greater than 0"));
        }

        let providers = &self.providers;
        check_provider("stt", &providers.stt.provider, STT_PROVIDERS, &providers.stt.api_key)?;
        check_provider("llm", &providers.llm.provider, LLM_PROVIDERS, &providers.llm.api_key)?;
        check_provider("tts", &providers.tts.provider, TTS_PROVIDERS, &providers.tts.api_key)?;

        Ok(())
    }
}

fn check_provider(
    kind: &str,
    provider: &str,
    known: &[&str],
    api_key: &Option<String>,
) -> Result<()> {
    if !known.contains(&provider) {
        return Err(anyhow::anyhow!(
            "Unknown {} provider '{}' (expected one of: {})",
            kind,
            provider,
            known.join(", ")
        ));
    }

    let has_key = api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false);
    if provider != "simulated" && !has_key {
        return Err(anyhow::anyhow!(
            "The {} provider '{}' requires an API key",
            kind,
            provider
        ));
    }

    Ok(())
}
