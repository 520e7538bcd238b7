//! Speech-to-text adapters.

use super::{require_key, Transcriber};
use crate::audio::codec;
use crate::config::SttConfig;
use crate::error::ProviderError;
use crate::room::RemoteTrack;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tracing::debug;

/// Stand-in transcriber that waits a fixed delay and returns numbered
/// placeholder text. The inbound audio is discarded.
pub struct SimulatedTranscriber {
    delay: Duration,
    counter: AtomicU64,
}

impl SimulatedTranscriber {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for SimulatedTranscriber {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn transcribe(&self, track: Weak<RemoteTrack>) -> Result<String, ProviderError> {
        if let Some(track) = track.upgrade() {
            track.buffer.clear();
        }
        tokio::time::sleep(self.delay).await;

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("This is simulated transcription #{}. User spoke.", n))
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client (Whisper and friends).
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperApiTranscriber {
    pub fn new(config: &SttConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: require_key("stt", &config.api_key)?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    fn name(&self) -> &'static str {
        "whisper_api"
    }

    async fn transcribe(&self, track: Weak<RemoteTrack>) -> Result<String, ProviderError> {
        let (samples, sample_rate) = {
            let track = track.upgrade().ok_or(ProviderError::TrackUnavailable)?;
            (track.buffer.take_utterance(), track.buffer.sample_rate())
        };

        if samples.is_empty() {
            debug!("No buffered audio; treating utterance as silent");
            return Ok(String::new());
        }

        let wav = codec::pcm_to_wav(&samples, sample_rate)
            .map_err(|e| ProviderError::Transcription(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transcription(format!("{}: {}", status, body)));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::config::AppConfig;
    use crate::room::TrackKind;
    use std::sync::Arc;

    fn track() -> Arc<RemoteTrack> {
        Arc::new(RemoteTrack::new("TR_1", TrackKind::Audio, "alice", AudioBuffer::new(16000, 1)))
    }

    #[tokio::test]
    async fn test_simulated_transcripts_are_numbered() {
        let stt = SimulatedTranscriber::new(0);
        let track = track();
        track.buffer.append_pcm_data(&[1, 0, 2, 0]).unwrap();

        let first = stt.transcribe(Arc::downgrade(&track)).await.unwrap();
        let second = stt.transcribe(Arc::downgrade(&track)).await.unwrap();

        assert_eq!(first, "This is simulated transcription #1. User spoke.");
        assert_eq!(second, "This is simulated transcription #2. User spoke.");
        assert!(track.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_whisper_reports_dropped_track() {
        let mut config = AppConfig::default().providers.stt;
        config.api_key = Some("sk-test".to_string());
        let stt = WhisperApiTranscriber::new(&config).unwrap();

        let weak = Arc::downgrade(&track());
        let result = stt.transcribe(weak).await;
        assert!(matches!(result, Err(ProviderError::TrackUnavailable)));
    }

    #[tokio::test]
    async fn test_whisper_empty_buffer_is_silent() {
        let mut config = AppConfig::default().providers.stt;
        config.api_key = Some("sk-test".to_string());
        let stt = WhisperApiTranscriber::new(&config).unwrap();

        let track = track();
        assert_eq!(stt.transcribe(Arc::downgrade(&track)).await.unwrap(), "");
    }
}
