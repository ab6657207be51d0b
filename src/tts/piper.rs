use super::{ensure_speakable, SyncTtsBackend};
use crate::character::Character;
use crate::config::PiperConfig;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Local synthesis through the piper binary. Blocking: the subprocess runs
/// to completion before the call returns.
pub struct PiperTts {
    model_path: String,
}

impl PiperTts {
    pub fn new(config: &PiperConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
        }
    }
}

impl SyncTtsBackend for PiperTts {
    fn name(&self) -> &str {
        "piper"
    }

    fn text_to_speech(&self, text: &str, character: &Character, output_path: &Path) -> Result<()> {
        ensure_speakable(text)?;
        // A per-character voice is a per-character model file.
        let model = character
            .voice_config(Some("piper"))
            .map(|v| v.voice.as_str())
            .unwrap_or(&self.model_path);

        let tmp = output_path.with_extension("part");
        let tmp_str = tmp
            .to_str()
            .with_context(|| format!("non-UTF-8 output path {}", tmp.display()))?;

        let mut child = Command::new("piper")
            .args(["--model", model, "--output_file", tmp_str])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn piper; is it installed?")?;

        child
            .stdin
            .as_mut()
            .context("Failed to open piper stdin")?
            .write_all(text.as_bytes())?;

        let status = child.wait()?;
        if !status.success() {
            let _ = fs::remove_file(&tmp);
            bail!("piper exited with {} for {}", status, output_path.display());
        }

        let written = fs::metadata(&tmp).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            let _ = fs::remove_file(&tmp);
            bail!("piper produced no audio for {}", output_path.display());
        }

        fs::rename(&tmp, output_path)
            .with_context(|| format!("Failed to move audio into place at {}", output_path.display()))?;
        Ok(())
    }
}
