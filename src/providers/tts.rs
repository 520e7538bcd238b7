//! Text-to-speech adapters. Both produce raw 16-bit mono PCM at the room's
//! sample rate so audio can be framed straight onto the outbound track.

use super::{require_key, Synthesizer};
use crate::audio::codec;
use crate::config::TtsConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Serialize;

/// Simulated speech length per character of text.
const SIMULATED_MS_PER_CHAR: u64 = 50;
const SIMULATED_MAX_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

/// ElevenLabs `/v1/text-to-speech/{voice_id}`.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model: String,
    output_format: String,
    voice_settings: VoiceSettings,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: require_key("tts", &config.api_key)?,
            voice_id: config.voice_id.clone(),
            model: config.model.clone(),
            output_format: config.output_format.clone(),
            voice_settings: VoiceSettings {
                stability: config.stability,
                similarity_boost: config.similarity_boost,
                style: config.style,
                use_speaker_boost: config.use_speaker_boost,
            },
        })
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let request = SpeechRequest {
            text,
            model_id: &self.model,
            voice_settings: &self.voice_settings,
        };

        let response = self
            .client
            .post(format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id))
            .query(&[("output_format", self.output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Synthesis(format!("{}: {}", status, body)));
        }

        let mut audio = response.bytes().await?.to_vec();
        // PCM output is whole 16-bit samples; drop a dangling byte if any.
        audio.truncate(audio.len() - audio.len() % 2);
        Ok(audio)
    }
}

/// Offline synthesizer producing silence whose length tracks the text.
pub struct SimulatedSynthesizer {
    sample_rate: u32,
}

impl SimulatedSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

#[async_trait]
impl Synthesizer for SimulatedSynthesizer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let chars = text.trim().chars().count() as u64;
        let duration_ms = (chars * SIMULATED_MS_PER_CHAR).min(SIMULATED_MAX_MS);
        Ok(codec::silence(duration_ms, self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_simulated_length_tracks_text() {
        let tts = SimulatedSynthesizer::new(16000);
        assert!(tts.synthesize("   ").await.unwrap().is_empty());

        // 2 chars * 50ms = 100ms = 1600 samples
        assert_eq!(tts.synthesize("hi").await.unwrap().len(), 3200);
    }

    #[test]
    fn test_request_body_shape() {
        let config = AppConfig::default().providers.tts;
        let settings = VoiceSettings {
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            style: config.style,
            use_speaker_boost: config.use_speaker_boost,
        };
        let request = SpeechRequest {
            text: "hi there",
            model_id: &config.model,
            voice_settings: &settings,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model_id"], "eleven_turbo_v2");
        assert_eq!(value["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(value["voice_settings"]["use_speaker_boost"], true);
    }

    #[tokio::test]
    async fn test_blank_text_skips_request() {
        let mut config = AppConfig::default().providers.tts;
        config.api_key = Some("xi-test".to_string());
        let tts = ElevenLabsSynthesizer::new(&config).unwrap();
        assert!(tts.synthesize("").await.unwrap().is_empty());
    }
}
