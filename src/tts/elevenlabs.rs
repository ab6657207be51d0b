use super::{ensure_speakable, voice_for, write_audio_atomic, AsyncTtsBackend};
use crate::character::Character;
use crate::config::ElevenLabsConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

const API_BASE: &str = "https://api.elevenlabs.io/v1";

pub struct ElevenLabsTts {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(config: &ElevenLabsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
}

#[async_trait]
impl AsyncTtsBackend for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn async_text_to_speech(
        &self,
        text: &str,
        character: &Character,
        output_path: &Path,
    ) -> Result<()> {
        ensure_speakable(text)?;
        let voice = voice_for(character, "elevenlabs")?;
        let model = voice
            .extra_args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model);

        // Stability knobs travel together; default them as a pair.
        let voice_settings = voice
            .extra_args
            .get("stability")
            .and_then(Value::as_f64)
            .map(|stability| VoiceSettings {
                stability,
                similarity_boost: voice
                    .extra_args
                    .get("similarity_boost")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.75),
            });

        let request_body = SpeechRequest {
            text,
            model_id: model,
            voice_settings,
        };

        let url = format!("{}/text-to-speech/{}", API_BASE, voice.voice);
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("ElevenLabs TTS error ({}): {}", status, error_text));
        }

        let bytes = resp.bytes().await?;
        write_audio_atomic(output_path, &bytes)
    }
}
