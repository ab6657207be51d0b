use crate::character::{Character, VoiceConfig};
use crate::config::TtsConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub mod elevenlabs;
pub mod openai;
pub mod piper;

pub use elevenlabs::ElevenLabsTts;
pub use openai::OpenAiTts;
pub use piper::PiperTts;

/// Blocking synthesis: returns once the file at `output_path` is fully
/// written. A failed call must not leave a file at `output_path`.
pub trait SyncTtsBackend: Send + Sync {
    fn name(&self) -> &str;
    fn text_to_speech(&self, text: &str, character: &Character, output_path: &Path) -> Result<()>;
}

/// Suspend-capable synthesis with the identical contract; the suspension
/// point is the remote call.
#[async_trait]
pub trait AsyncTtsBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn async_text_to_speech(
        &self,
        text: &str,
        character: &Character,
        output_path: &Path,
    ) -> Result<()>;
}

/// A registered backend, capability-tagged at registration time.
#[derive(Clone)]
pub enum TtsBackend {
    Sync(Arc<dyn SyncTtsBackend>),
    Async(Arc<dyn AsyncTtsBackend>),
}

impl TtsBackend {
    pub fn sync(backend: impl SyncTtsBackend + 'static) -> Self {
        Self::Sync(Arc::new(backend))
    }

    pub fn asynchronous(backend: impl AsyncTtsBackend + 'static) -> Self {
        Self::Async(Arc::new(backend))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Sync(backend) => backend.name(),
            Self::Async(backend) => backend.name(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

/// Build the registered backend list from configuration, in declaration
/// order (which is also the fallback order).
pub fn create_tts_backends(config: &TtsConfig) -> Result<Vec<TtsBackend>> {
    let mut backends = Vec::new();
    if let Some(cfg) = &config.openai {
        backends.push(TtsBackend::asynchronous(OpenAiTts::new(cfg)));
    }
    if let Some(cfg) = &config.elevenlabs {
        backends.push(TtsBackend::asynchronous(ElevenLabsTts::new(cfg)));
    }
    if let Some(cfg) = &config.piper {
        backends.push(TtsBackend::sync(PiperTts::new(cfg)));
    }
    if backends.is_empty() {
        bail!("no TTS backend configured");
    }
    Ok(backends)
}

pub(crate) fn ensure_speakable(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("cannot synthesize empty text");
    }
    Ok(())
}

pub(crate) fn voice_for<'c>(character: &'c Character, backend: &str) -> Result<&'c VoiceConfig> {
    character.voice_config(Some(backend)).ok_or_else(|| {
        anyhow!(
            "character '{}' has no voice configured for backend '{}'",
            character.name,
            backend
        )
    })
}

/// Write synthesized audio through a temp-then-rename step, so a failure
/// never leaves a partial file at the target path.
pub(crate) fn write_audio_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        bail!("backend produced no audio data for {}", path.display());
    }
    let tmp = path.with_extension("part");
    if let Err(err) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("Failed to write audio to {}", tmp.display()));
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move audio into place at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OpenAiTtsConfig, PiperConfig};
    use tempfile::tempdir;

    #[test]
    fn atomic_write_places_file_at_exact_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment_0000.mp3");
        write_audio_atomic(&path, b"audio-bytes").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"audio-bytes");
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn empty_payload_is_rejected_and_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment_0000.mp3");
        assert!(write_audio_atomic(&path, b"").is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(ensure_speakable("   \n").is_err());
        assert!(ensure_speakable("Hello").is_ok());
    }

    #[test]
    fn factory_registers_configured_backends_in_order() {
        let config = TtsConfig {
            openai: Some(OpenAiTtsConfig {
                api_key: "sk-test".to_string(),
                model: "tts-1".to_string(),
                default_voices: crate::config::DefaultVoices {
                    question: "echo".to_string(),
                    answer: "shimmer".to_string(),
                },
            }),
            elevenlabs: None,
            piper: Some(PiperConfig {
                model_path: "/models/en_US-amy.onnx".to_string(),
            }),
        };
        let backends = create_tts_backends(&config).unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].name(), "openai");
        assert!(backends[0].is_async());
        assert_eq!(backends[1].name(), "piper");
        assert!(!backends[1].is_async());
    }

    #[test]
    fn empty_config_is_a_configuration_error() {
        assert!(create_tts_backends(&TtsConfig::default()).is_err());
    }
}
