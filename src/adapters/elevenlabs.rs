//! ElevenLabs text-to-speech synthesizer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SynthesizerConfig;

use super::{SpeechSynthesizer, SynthesisError};

const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// ElevenLabs client for a single voice
pub struct ElevenLabsSynthesizer {
    api_key: String,
    voice_id: String,
    base_url: String,
    settings: SynthesizerConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speaking_rate: f32,
}

impl ElevenLabsSynthesizer {
    pub fn new(
        api_key: impl Into<String>,
        voice_id: impl Into<String>,
        settings: SynthesizerConfig,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            base_url: API_BASE.to_string(),
            settings,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build API URL for the configured voice
    fn api_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.voice_id)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let body = SpeechRequest {
            text,
            voice_settings: VoiceSettings {
                stability: self.settings.stability,
                similarity_boost: self.settings.similarity_boost,
                speaking_rate: self.settings.speaking_rate,
            },
        };

        let response = self
            .client
            .post(self.api_url())
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Unknown(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
