use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use textcast::audio::AudioManager;
use textcast::character::{Character, VoiceConfig};
use textcast::config::{Config, TtsConfig};
use textcast::llm::{create_chat_client, TranscriptEngine};
use textcast::podcast::Podcast;
use textcast::transcript::TranscriptFormat;
use textcast::tts::create_tts_backends;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM and TTS settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let mut args = std::env::args().skip(1);
    let first = args
        .next()
        .context("Usage: textcast <content-file> | textcast --transcript <transcript-file>")?;

    let backends = create_tts_backends(&config.tts)?;
    let audio_manager = match &config.segment_folder {
        Some(dir) => AudioManager::with_segment_dir(
            backends,
            config.n_jobs,
            &config.audio_format,
            PathBuf::from(dir),
        )?,
        None => AudioManager::new(backends, config.n_jobs, &config.audio_format)?,
    };
    let characters = default_characters(&config.tts);

    let mut podcast = if first == "--transcript" {
        let path = args.next().context("--transcript requires a file path")?;
        Podcast::load_transcript(Path::new(&path), audio_manager, characters)?
    } else {
        let content = fs::read_to_string(&first)
            .with_context(|| format!("Failed to read content from {}", first))?;
        let chat = create_chat_client(&config.llm)?;
        let engine = Arc::new(TranscriptEngine::new(chat, config.conversation.clone()));
        Podcast::new(content, engine, audio_manager, characters)
    };

    let pb = ProgressBar::new(3);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    pb.set_message("generating transcript");
    podcast.build_transcript().await?;
    pb.inc(1);

    pb.set_message("synthesizing audio");
    podcast.build_audio_segments().await?;
    pb.inc(1);

    pb.set_message("stitching");
    podcast.stitch_audio_segments()?;
    pb.inc(1);
    pb.finish_with_message("done");

    let output_dir = Path::new(&config.output_folder);
    let audio_path = output_dir.join(format!("podcast.{}", config.audio_format));
    podcast.save(&audio_path)?;
    podcast.export_transcript(&output_dir.join("transcript.txt"), TranscriptFormat::Plaintext)?;
    podcast.export_transcript(&output_dir.join("transcript.json"), TranscriptFormat::Json)?;

    println!("Podcast written to {}", audio_path.display());
    Ok(())
}

/// The two standard speakers, voiced per configured backend.
fn default_characters(tts: &TtsConfig) -> Vec<Arc<Character>> {
    let mut host_voices = BTreeMap::new();
    let mut guest_voices = BTreeMap::new();

    if let Some(cfg) = &tts.openai {
        host_voices.insert(
            "openai".to_string(),
            VoiceConfig::new(cfg.default_voices.question.clone(), "openai"),
        );
        guest_voices.insert(
            "openai".to_string(),
            VoiceConfig::new(cfg.default_voices.answer.clone(), "openai"),
        );
    }
    if let Some(cfg) = &tts.elevenlabs {
        host_voices.insert(
            "elevenlabs".to_string(),
            VoiceConfig::new(cfg.default_voices.question.clone(), "elevenlabs"),
        );
        guest_voices.insert(
            "elevenlabs".to_string(),
            VoiceConfig::new(cfg.default_voices.answer.clone(), "elevenlabs"),
        );
    }
    if let Some(cfg) = &tts.piper {
        // A piper voice is a model file; both speakers share the configured
        // default unless a per-character model is set up.
        host_voices.insert(
            "piper".to_string(),
            VoiceConfig::new(cfg.model_path.clone(), "piper"),
        );
        guest_voices.insert(
            "piper".to_string(),
            VoiceConfig::new(cfg.model_path.clone(), "piper"),
        );
    }

    vec![
        Arc::new(Character::new(
            "Host",
            "Podcast host",
            host_voices,
            "{name} is an enthusiastic podcast host. Speaks clearly and engagingly.",
        )),
        Arc::new(Character::new(
            "Guest",
            "Expert guest",
            guest_voices,
            "{name} is an expert guest. Shares knowledge in a friendly manner.",
        )),
    ]
}
