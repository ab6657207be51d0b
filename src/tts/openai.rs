use super::{ensure_speakable, voice_for, write_audio_atomic, AsyncTtsBackend};
use crate::character::Character;
use crate::config::OpenAiTtsConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

pub struct OpenAiTts {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(config: &OpenAiTtsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

#[async_trait]
impl AsyncTtsBackend for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    async fn async_text_to_speech(
        &self,
        text: &str,
        character: &Character,
        output_path: &Path,
    ) -> Result<()> {
        ensure_speakable(text)?;
        let voice = voice_for(character, "openai")?;
        let model = voice
            .extra_args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model);

        let request_body = SpeechRequest {
            model,
            voice: &voice.voice,
            input: text,
        };

        let resp = self
            .client
            .post(SPEECH_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI TTS error ({}): {}", status, error_text));
        }

        let bytes = resp.bytes().await?;
        write_audio_atomic(output_path, &bytes)
    }
}
