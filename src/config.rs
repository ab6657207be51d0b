use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Directory for per-segment audio files. When unset, the audio manager
    /// owns a temporary directory that is discarded with it.
    #[serde(default)]
    pub segment_folder: Option<String>,

    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Upper bound on concurrent synthesis calls.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: usize,

    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai", "gemini" or "ollama"
    pub openai: Option<OpenAiLlmConfig>,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiLlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TtsConfig {
    pub openai: Option<OpenAiTtsConfig>,
    pub elevenlabs: Option<ElevenLabsConfig>,
    pub piper: Option<PiperConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiTtsConfig {
    pub api_key: String,
    #[serde(default = "default_openai_tts_model")]
    pub model: String,
    #[serde(default = "default_openai_voices")]
    pub default_voices: DefaultVoices,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    #[serde(default = "default_elevenlabs_model")]
    pub model: String,
    #[serde(default = "default_elevenlabs_voices")]
    pub default_voices: DefaultVoices,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PiperConfig {
    /// Path to the .onnx voice model handed to the piper binary.
    pub model_path: String,
}

/// Per-backend voice pair for the two standard speakers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DefaultVoices {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_podcast_name")]
    pub podcast_name: String,
    #[serde(default = "default_podcast_tagline")]
    pub podcast_tagline: String,

    /// Generate via chunked long-form passes instead of a single call.
    #[serde(default)]
    pub longform: bool,

    #[serde(default = "default_max_num_chunks")]
    pub max_num_chunks: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            podcast_name: default_podcast_name(),
            podcast_tagline: default_podcast_tagline(),
            longform: false,
            max_num_chunks: default_max_num_chunks(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_audio_format() -> String {
    "mp3".to_string()
}
fn default_n_jobs() -> usize {
    1
}
fn default_openai_tts_model() -> String {
    "tts-1".to_string()
}
fn default_openai_voices() -> DefaultVoices {
    DefaultVoices {
        question: "echo".to_string(),
        answer: "shimmer".to_string(),
    }
}
fn default_elevenlabs_model() -> String {
    "eleven_multilingual_v2".to_string()
}
fn default_elevenlabs_voices() -> DefaultVoices {
    DefaultVoices {
        question: "Chris".to_string(),
        answer: "Jessica".to_string(),
    }
}
fn default_podcast_name() -> String {
    "Textcast".to_string()
}
fn default_podcast_tagline() -> String {
    "Your personal generated podcast".to_string()
}
fn default_max_num_chunks() -> usize {
    10
}
fn default_min_chunk_size() -> usize {
    200
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        if let Some(dir) = &self.segment_folder {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
