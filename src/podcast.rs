//! The build state machine: transcript generation, audio synthesis and the
//! final merge, with scoped rework of any stage.

use crate::audio::{AudioManager, AudioSegment};
use crate::character::Character;
use crate::llm::LlmBackend;
use crate::transcript::{Transcript, TranscriptFormat, TranscriptSegment};
use anyhow::{bail, Context, Result};
use futures_util::future::BoxFuture;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Build progress marker. States only increase, except inside a rework
/// scope; each state implies the previous stage's artifact is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PodcastState {
    Initialized,
    TranscriptBuilt,
    AudioSegmentsBuilt,
    Stitched,
}

/// Stage legality as a standalone predicate, independent of how the stage
/// methods are invoked.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransitionTable;

impl TransitionTable {
    pub fn can_transition(&self, from: PodcastState, to: PodcastState) -> bool {
        from as u8 + 1 == to as u8
    }
}

#[derive(PartialEq)]
enum StageOutcome {
    Run,
    AlreadyDone,
}

pub struct Podcast {
    content: Option<String>,
    llm: Option<Arc<dyn LlmBackend>>,
    audio_manager: AudioManager,
    characters: HashMap<String, Arc<Character>>,
    roster: Vec<Arc<Character>>,
    transitions: TransitionTable,
    state: PodcastState,
    reworking: bool,
    transcript: Option<Transcript>,
    audio_segments: Vec<AudioSegment>,
    stitched_path: Option<PathBuf>,
}

impl Podcast {
    pub fn new(
        content: impl Into<String>,
        llm: Arc<dyn LlmBackend>,
        audio_manager: AudioManager,
        characters: Vec<Arc<Character>>,
    ) -> Self {
        Self::build(
            Some(content.into()),
            Some(llm),
            audio_manager,
            characters,
            PodcastState::Initialized,
            None,
        )
    }

    /// Inject a pre-existing transcript and start in `TranscriptBuilt`. This
    /// is the one supported way to skip a stage.
    pub fn from_transcript(
        transcript: Transcript,
        audio_manager: AudioManager,
        characters: Vec<Arc<Character>>,
    ) -> Self {
        Self::build(
            None,
            None,
            audio_manager,
            characters,
            PodcastState::TranscriptBuilt,
            Some(transcript),
        )
    }

    /// Load a transcript file (structured or legacy) and build from it.
    /// Speakers auto-created by a legacy parse join the character roster.
    pub fn load_transcript(
        path: &Path,
        audio_manager: AudioManager,
        characters: Vec<Arc<Character>>,
    ) -> Result<Self> {
        let mut map: HashMap<String, Arc<Character>> = characters
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        let transcript = Transcript::load(path, &mut map)?;

        let mut roster = characters;
        let mut created: Vec<Arc<Character>> = map
            .values()
            .filter(|c| !roster.iter().any(|known| known.name == c.name))
            .cloned()
            .collect();
        created.sort_by(|a, b| a.name.cmp(&b.name));
        roster.extend(created);

        Ok(Self::build(
            None,
            None,
            audio_manager,
            roster,
            PodcastState::TranscriptBuilt,
            Some(transcript),
        ))
    }

    fn build(
        content: Option<String>,
        llm: Option<Arc<dyn LlmBackend>>,
        audio_manager: AudioManager,
        roster: Vec<Arc<Character>>,
        state: PodcastState,
        transcript: Option<Transcript>,
    ) -> Self {
        let characters = roster
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        Self {
            content,
            llm,
            audio_manager,
            characters,
            roster,
            transitions: TransitionTable,
            state,
            reworking: false,
            transcript,
            audio_segments: Vec::new(),
            stitched_path: None,
        }
    }

    pub fn state(&self) -> PodcastState {
        self.state
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    /// Mutable transcript access, intended for use inside a rework scope.
    pub fn transcript_mut(&mut self) -> Option<&mut Transcript> {
        self.transcript.as_mut()
    }

    pub fn audio_segments(&self) -> &[AudioSegment] {
        &self.audio_segments
    }

    pub fn character(&self, name: &str) -> Option<Arc<Character>> {
        self.characters.get(name).cloned()
    }

    fn guard_stage(&self, target: PodcastState) -> Result<StageOutcome> {
        if self.reworking {
            return Ok(StageOutcome::Run);
        }
        if self.state >= target {
            info!("stage {:?} has already been completed; skipping", target);
            return Ok(StageOutcome::AlreadyDone);
        }
        if !self.transitions.can_transition(self.state, target) {
            bail!(
                "cannot skip stages: current state is {:?}, target state is {:?}",
                self.state,
                target
            );
        }
        Ok(StageOutcome::Run)
    }

    /// Generate the transcript from the source content. Lines attributed to
    /// a speaker outside the roster are dropped with a warning rather than
    /// failing the build.
    pub async fn build_transcript(&mut self) -> Result<()> {
        if self.guard_stage(PodcastState::TranscriptBuilt)? == StageOutcome::AlreadyDone {
            return Ok(());
        }
        let llm = self
            .llm
            .as_ref()
            .context("no LLM backend configured; construct from a transcript instead")?;
        let content = self.content.as_deref().context("no source content")?;

        let lines = llm.generate_transcript(content, &self.roster).await?;
        let mut segments = Vec::with_capacity(lines.len());
        for (speaker, text) in lines {
            match self.characters.get(&speaker) {
                Some(character) => segments.push(TranscriptSegment::new(&text, character.clone())),
                None => warn!("dropping line for unknown speaker '{}'", speaker),
            }
        }

        self.transcript = Some(Transcript::new(
            segments,
            BTreeMap::from([("source".to_string(), "generated".to_string())]),
        ));
        self.state = PodcastState::TranscriptBuilt;
        Ok(())
    }

    /// Render one audio file per transcript segment via the audio manager.
    pub async fn build_audio_segments(&mut self) -> Result<()> {
        if self.guard_stage(PodcastState::AudioSegmentsBuilt)? == StageOutcome::AlreadyDone {
            return Ok(());
        }
        let transcript = self
            .transcript
            .as_ref()
            .context("transcript has not been built")?;
        self.audio_segments = self.audio_manager.create_audio_segments(transcript).await?;
        self.state = PodcastState::AudioSegmentsBuilt;
        Ok(())
    }

    /// Merge the segment files, ordered by their sequence-encoding names,
    /// into one track in the scratch area.
    pub fn stitch_audio_segments(&mut self) -> Result<()> {
        if self.guard_stage(PodcastState::Stitched)? == StageOutcome::AlreadyDone {
            return Ok(());
        }
        if self.audio_segments.is_empty() {
            bail!("no audio segments to stitch");
        }
        let output = self
            .audio_manager
            .segment_dir()
            .join(format!("stitched.{}", self.audio_manager.audio_format()));
        self.audio_manager
            .merge_segments(&self.audio_segments, &output)?;
        self.stitched_path = Some(output);
        self.state = PodcastState::Stitched;
        Ok(())
    }

    async fn build_next_stage(&mut self) -> Result<bool> {
        match self.state {
            PodcastState::Initialized => self.build_transcript().await?,
            PodcastState::TranscriptBuilt => self.build_audio_segments().await?,
            PodcastState::AudioSegmentsBuilt => self.stitch_audio_segments()?,
            PodcastState::Stitched => return Ok(false),
        }
        Ok(true)
    }

    /// Drive the remaining stages until the podcast is stitched.
    pub async fn finalize(&mut self) -> Result<()> {
        while self.build_next_stage().await? {}
        Ok(())
    }

    fn reset_to_state(&mut self, target: PodcastState) {
        if target < PodcastState::TranscriptBuilt {
            self.transcript = None;
        }
        if target < PodcastState::AudioSegmentsBuilt {
            self.audio_segments.clear();
        }
        if target < PodcastState::Stitched {
            self.stitched_path = None;
        }
        self.state = target;
    }

    /// Scoped rewind-and-rebuild. Rewinds to `target` (discarding artifacts
    /// of later stages), runs `f` with the stage guard relaxed, and on exit
    /// warns if the podcast regressed — re-driving `finalize()` when
    /// `auto_finalize` is set. The exit handling runs whether or not `f`
    /// succeeded.
    pub async fn rework<F>(&mut self, target: PodcastState, auto_finalize: bool, f: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a mut Podcast) -> BoxFuture<'a, Result<()>>,
    {
        if target < PodcastState::TranscriptBuilt && self.llm.is_none() {
            bail!("cannot rework below the transcript stage without an LLM backend");
        }

        let original = self.state;
        self.reworking = true;
        if target < self.state {
            info!("rewinding from {:?} to {:?}", self.state, target);
            self.reset_to_state(target);
        }

        let result = f(self).await;
        self.reworking = false;

        if self.state < original {
            warn!(
                "podcast is in an earlier state ({:?}) than before reworking ({:?})",
                self.state, original
            );
            if auto_finalize {
                let finalized = self.finalize().await;
                if result.is_ok() {
                    finalized?;
                }
            }
        }
        result
    }

    /// Export the merged recording.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.state != PodcastState::Stitched {
            bail!("podcast can only be saved after audio is stitched");
        }
        let stitched = self
            .stitched_path
            .as_ref()
            .context("no stitched audio to save")?;
        fs::copy(stitched, path)
            .with_context(|| format!("Failed to save podcast to {}", path.display()))?;
        Ok(())
    }

    pub fn export_transcript(&self, path: &Path, format: TranscriptFormat) -> Result<()> {
        if self.state < PodcastState::TranscriptBuilt {
            bail!("transcript can only be exported after it is built");
        }
        let transcript = self.transcript.as_ref().context("no transcript to export")?;
        transcript.export(path, format)
    }
}
