use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Voice settings for one character on one TTS backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VoiceConfig {
    pub voice: String,
    pub backend: String,
    #[serde(default)]
    pub extra_args: BTreeMap<String, Value>,
}

impl VoiceConfig {
    pub fn new(voice: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            backend: backend.into(),
            extra_args: BTreeMap::new(),
        }
    }
}

/// A speaker in the conversation. Immutable after construction apart from
/// the preferred-backend selection.
#[derive(Debug, Clone)]
pub struct Character {
    pub name: String,
    pub role: String,
    voice_configs: BTreeMap<String, VoiceConfig>,
    preferred_backend: Option<String>,
    /// Description template for the LLM; `{name}` is substituted.
    pub description_for_llm: String,
}

impl Character {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        voice_configs: BTreeMap<String, VoiceConfig>,
        description_for_llm: impl Into<String>,
    ) -> Self {
        let preferred_backend = voice_configs.keys().next().cloned();
        Self {
            name: name.into(),
            role: role.into(),
            voice_configs,
            preferred_backend,
            description_for_llm: description_for_llm.into(),
        }
    }

    /// A character with no voice settings, as created for unknown speaker
    /// tags in legacy transcripts.
    pub fn unconfigured(name: &str) -> Self {
        Self::new(name, format!("Character {}", name), BTreeMap::new(), "")
    }

    pub fn set_preferred_backend(&mut self, backend: &str) -> Result<()> {
        if !self.voice_configs.contains_key(backend) {
            bail!(
                "TTS backend '{}' not configured for character '{}'",
                backend,
                self.name
            );
        }
        self.preferred_backend = Some(backend.to_string());
        Ok(())
    }

    pub fn preferred_backend(&self) -> Option<&str> {
        self.preferred_backend.as_deref()
    }

    /// Voice settings for the given backend, or for the preferred one when
    /// no backend is named.
    pub fn voice_config(&self, backend: Option<&str>) -> Option<&VoiceConfig> {
        let backend = backend.or(self.preferred_backend.as_deref())?;
        self.voice_configs.get(backend)
    }

    pub fn to_prompt(&self) -> String {
        let description = self.description_for_llm.replace("{name}", &self.name);
        format!("Character: {}\nRole: {}\n{}", self.name, self.role, description)
    }
}
