//! Concurrent synthesis engine: fans a transcript out across the registered
//! TTS backends and fans the per-segment files back in as one ordered set.

use crate::transcript::{Transcript, TranscriptSegment};
use crate::tts::TtsBackend;
use anyhow::{anyhow, bail, Context, Result};
use futures_util::stream::{self, StreamExt};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::task;

pub mod merge;

/// One rendered segment: the file on disk plus the transcript segment it
/// renders. The audio payload stays on disk until asked for.
#[derive(Debug)]
pub struct AudioSegment {
    pub path: PathBuf,
    pub index: usize,
    pub segment: TranscriptSegment,
}

impl AudioSegment {
    pub fn read_payload(&self) -> Result<Vec<u8>> {
        fs::read(&self.path)
            .with_context(|| format!("Failed to read audio segment {}", self.path.display()))
    }

    /// Duration probe for WAV segments.
    pub fn duration_ms(&self) -> Result<u64> {
        merge::wav_duration_ms(&self.path)
    }
}

enum Scratch {
    Owned(TempDir),
    External(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Self::Owned(dir) => dir.path(),
            Self::External(path) => path,
        }
    }
}

pub struct AudioManager {
    backends: Vec<TtsBackend>,
    n_jobs: usize,
    audio_format: String,
    scratch: Scratch,
}

impl AudioManager {
    /// Backends in registration order; segment files live in an owned
    /// temporary directory discarded with the manager.
    pub fn new(backends: Vec<TtsBackend>, n_jobs: usize, audio_format: &str) -> Result<Self> {
        let scratch = TempDir::new().context("Failed to create scratch directory")?;
        Self::build(backends, n_jobs, audio_format, Scratch::Owned(scratch))
    }

    /// Like [`AudioManager::new`], but segment files go to `dir` and outlive
    /// the manager.
    pub fn with_segment_dir(
        backends: Vec<TtsBackend>,
        n_jobs: usize,
        audio_format: &str,
        dir: PathBuf,
    ) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create segment directory {}", dir.display()))?;
        Self::build(backends, n_jobs, audio_format, Scratch::External(dir))
    }

    fn build(
        backends: Vec<TtsBackend>,
        n_jobs: usize,
        audio_format: &str,
        scratch: Scratch,
    ) -> Result<Self> {
        if n_jobs == 0 {
            bail!("concurrency limit must be at least 1");
        }
        Ok(Self {
            backends,
            n_jobs,
            audio_format: audio_format.to_string(),
            scratch,
        })
    }

    pub fn segment_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn audio_format(&self) -> &str {
        &self.audio_format
    }

    /// Output path for a segment, named by its zero-padded sequence index so
    /// lexical file order is transcript order regardless of completion order.
    fn segment_path(&self, index: usize) -> PathBuf {
        self.segment_dir()
            .join(format!("segment_{:04}.{}", index, self.audio_format))
    }

    fn resolve_backend(&self, segment: &TranscriptSegment) -> Result<TtsBackend> {
        let Some(first) = self.backends.first() else {
            bail!(
                "no TTS backend registered; cannot synthesize segment for '{}'",
                segment.speaker.name
            );
        };
        if let Some(preferred) = segment.speaker.preferred_backend() {
            if let Some(backend) = self.backends.iter().find(|b| b.name() == preferred) {
                return Ok(backend.clone());
            }
            debug!(
                "preferred TTS backend '{}' for '{}' is not registered; falling back to '{}'",
                preferred,
                segment.speaker.name,
                first.name()
            );
        }
        Ok(first.clone())
    }

    /// Synthesize every transcript segment to its own file, in parallel up to
    /// the concurrency limit, preserving transcript order in the result. Any
    /// segment failure fails the batch: all in-flight calls run to
    /// completion, then the first failure in transcript order is surfaced.
    pub async fn create_audio_segments(&self, transcript: &Transcript) -> Result<Vec<AudioSegment>> {
        let mut jobs = Vec::with_capacity(transcript.segments.len());
        for (index, segment) in transcript.segments.iter().enumerate() {
            jobs.push(SynthJob {
                index,
                backend: self.resolve_backend(segment)?,
                path: self.segment_path(index),
                segment: segment.clone(),
            });
        }
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        // The execution mode is decided once per batch: any suspend-capable
        // backend puts the whole batch on the cooperative scheduler.
        let cooperative = self.backends.iter().any(TtsBackend::is_async);
        info!(
            "synthesizing {} segments ({} mode, up to {} in flight)",
            jobs.len(),
            if cooperative { "cooperative" } else { "thread-pool" },
            self.n_jobs
        );

        let results = if cooperative {
            run_cooperative(jobs, self.n_jobs).await
        } else {
            let n_jobs = self.n_jobs;
            task::spawn_blocking(move || run_thread_pool(jobs, n_jobs))
                .await
                .context("synthesis pool task failed")??
        };

        let mut segments = Vec::with_capacity(results.len());
        for result in results {
            segments.push(result?);
        }
        Ok(segments)
    }

    /// Merge segment files into one track at `output`. File names encode the
    /// sequence index, so sorting by name restores transcript order.
    pub fn merge_segments(&self, segments: &[AudioSegment], output: &Path) -> Result<()> {
        if segments.is_empty() {
            bail!("no audio segments to merge");
        }
        let mut paths: Vec<PathBuf> = segments.iter().map(|s| s.path.clone()).collect();
        paths.sort();
        merge::merge_files(&paths, output)
    }
}

struct SynthJob {
    index: usize,
    backend: TtsBackend,
    path: PathBuf,
    segment: TranscriptSegment,
}

impl SynthJob {
    fn into_audio_segment(self) -> AudioSegment {
        AudioSegment {
            path: self.path,
            index: self.index,
            segment: self.segment,
        }
    }

    fn run_blocking(&self) -> Result<()> {
        match &self.backend {
            TtsBackend::Sync(backend) => {
                backend.text_to_speech(&self.segment.text, &self.segment.speaker, &self.path)
            }
            TtsBackend::Async(_) => bail!("suspend-capable backend scheduled on the thread pool"),
        }
    }
}

async fn run_cooperative(jobs: Vec<SynthJob>, n_jobs: usize) -> Vec<Result<AudioSegment>> {
    let total = jobs.len();
    let collected: Vec<(usize, Result<AudioSegment>)> = stream::iter(jobs)
        .map(|job| async move {
            let outcome = match &job.backend {
                TtsBackend::Async(backend) => {
                    backend
                        .async_text_to_speech(&job.segment.text, &job.segment.speaker, &job.path)
                        .await
                }
                // Blocking backends in a cooperative batch run off the
                // scheduler thread.
                TtsBackend::Sync(backend) => {
                    let backend = backend.clone();
                    let text = job.segment.text.clone();
                    let speaker = job.segment.speaker.clone();
                    let path = job.path.clone();
                    match task::spawn_blocking(move || {
                        backend.text_to_speech(&text, &speaker, &path)
                    })
                    .await
                    {
                        Ok(result) => result,
                        Err(join) => Err(anyhow!("blocking synthesis task panicked: {join}")),
                    }
                }
            };
            let index = job.index;
            (index, outcome.map(|()| job.into_audio_segment()))
        })
        .buffer_unordered(n_jobs.max(1))
        .collect()
        .await;

    let mut slots: Vec<Option<Result<AudioSegment>>> = (0..total).map(|_| None).collect();
    for (index, result) in collected {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| Err(anyhow!("segment {index} produced no result")))
        })
        .collect()
}

/// Fixed-size worker pool over OS threads; worker w takes every w-th job.
fn run_thread_pool(jobs: Vec<SynthJob>, n_jobs: usize) -> Result<Vec<Result<AudioSegment>>> {
    let worker_count = n_jobs.clamp(1, jobs.len());
    let mut slots: Vec<Option<Result<()>>> = (0..jobs.len()).map(|_| None).collect();
    let mut panicked = false;

    std::thread::scope(|scope| {
        let jobs = &jobs;
        let handles: Vec<_> = (0..worker_count)
            .map(|worker| {
                scope.spawn(move || {
                    let mut outcomes = Vec::new();
                    let mut index = worker;
                    while index < jobs.len() {
                        outcomes.push((index, jobs[index].run_blocking()));
                        index += worker_count;
                    }
                    outcomes
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        slots[index] = Some(outcome);
                    }
                }
                Err(_) => panicked = true,
            }
        }
    });

    if panicked {
        bail!("audio synthesis worker panicked");
    }

    Ok(jobs
        .into_iter()
        .zip(slots)
        .map(|(job, slot)| {
            let index = job.index;
            match slot {
                Some(Ok(())) => Ok(job.into_audio_segment()),
                Some(Err(err)) => Err(err),
                None => Err(anyhow!("segment {index} produced no result")),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{Character, VoiceConfig};
    use crate::transcript::TranscriptSegment;
    use crate::tts::{AsyncTtsBackend, SyncTtsBackend};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Blocking backend that writes a fixed-duration silent WAV. The fill
    /// byte is taken from the trailing number in the segment text, which
    /// makes each payload distinguishable in the merged output.
    struct BlockingWav {
        name: &'static str,
        duration_ms: u32,
        fail_on: Option<&'static str>,
    }

    fn fill_from_text(text: &str) -> u8 {
        text.rsplit(' ')
            .next()
            .and_then(|n| n.parse::<u8>().ok())
            .unwrap_or(0)
    }

    impl SyncTtsBackend for BlockingWav {
        fn name(&self) -> &str {
            self.name
        }

        fn text_to_speech(
            &self,
            text: &str,
            _character: &Character,
            output_path: &Path,
        ) -> Result<()> {
            if self.fail_on.map_or(false, |marker| text.contains(marker)) {
                bail!("vendor rejected text {:?}", text);
            }
            fs::write(
                output_path,
                merge::pcm_wav(self.duration_ms, 8000, fill_from_text(text)),
            )?;
            Ok(())
        }
    }

    /// Suspend-capable backend with a per-segment delay so completion order
    /// differs from transcript order.
    struct AsyncWav {
        name: &'static str,
        duration_ms: u32,
    }

    #[async_trait]
    impl AsyncTtsBackend for AsyncWav {
        fn name(&self) -> &str {
            self.name
        }

        async fn async_text_to_speech(
            &self,
            text: &str,
            _character: &Character,
            output_path: &Path,
        ) -> Result<()> {
            let fill = fill_from_text(text);
            // Later segments finish first.
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(fill as u64 * 10)))
                .await;
            fs::write(output_path, merge::pcm_wav(self.duration_ms, 8000, fill))?;
            Ok(())
        }
    }

    fn character_for(backend: &str) -> Arc<Character> {
        let mut configs = BTreeMap::new();
        configs.insert(
            backend.to_string(),
            VoiceConfig::new("test-voice", backend),
        );
        Arc::new(Character::new("Host", "Podcast host", configs, ""))
    }

    fn transcript_of(speaker: &Arc<Character>, count: usize) -> Transcript {
        let segments = (0..count)
            .map(|i| TranscriptSegment::new(&format!("segment {}", i), speaker.clone()))
            .collect();
        Transcript::new(segments, BTreeMap::new())
    }

    #[tokio::test]
    async fn thread_pool_mode_names_files_in_transcript_order() {
        let manager = AudioManager::new(
            vec![TtsBackend::sync(BlockingWav {
                name: "dummy",
                duration_ms: 100,
                fail_on: None,
            })],
            2,
            "wav",
        )
        .unwrap();
        let speaker = character_for("dummy");
        let transcript = transcript_of(&speaker, 5);

        let segments = manager.create_audio_segments(&transcript).await.unwrap();
        assert_eq!(segments.len(), 5);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i);
            assert_eq!(
                segment.path.file_name().unwrap().to_str().unwrap(),
                format!("segment_{:04}.wav", i)
            );
            assert_eq!(segment.duration_ms().unwrap(), 100);
        }
    }

    #[tokio::test]
    async fn cooperative_mode_preserves_order_despite_completion_order() {
        let manager = AudioManager::new(
            vec![TtsBackend::asynchronous(AsyncWav {
                name: "remote",
                duration_ms: 100,
            })],
            4,
            "wav",
        )
        .unwrap();
        let speaker = character_for("remote");
        let transcript = transcript_of(&speaker, 4);

        let segments = manager.create_audio_segments(&transcript).await.unwrap();

        let merged = manager.segment_dir().join("merged.wav");
        manager.merge_segments(&segments, &merged).unwrap();
        assert_eq!(merge::wav_duration_ms(&merged).unwrap(), 400);

        // Mono 16-bit PCM with a 16-byte fmt chunk puts the data at byte 44;
        // each 100 ms clip at 8 kHz contributes 1600 fill bytes.
        let bytes = fs::read(&merged).unwrap();
        for (i, chunk) in bytes[44..].chunks(1600).enumerate() {
            assert!(
                chunk.iter().all(|b| *b == i as u8),
                "segment {} out of order in merged track",
                i
            );
        }
    }

    #[tokio::test]
    async fn mixed_registration_runs_cooperatively() {
        let manager = AudioManager::new(
            vec![
                TtsBackend::asynchronous(AsyncWav {
                    name: "remote",
                    duration_ms: 100,
                }),
                TtsBackend::sync(BlockingWav {
                    name: "local",
                    duration_ms: 100,
                    fail_on: None,
                }),
            ],
            2,
            "wav",
        )
        .unwrap();

        let remote_speaker = character_for("remote");
        let local_speaker = {
            let mut configs = BTreeMap::new();
            configs.insert("local".to_string(), VoiceConfig::new("test-voice", "local"));
            Arc::new(Character::new("Guest", "Expert guest", configs, ""))
        };
        let transcript = Transcript::new(
            vec![
                TranscriptSegment::new("segment 0", remote_speaker),
                TranscriptSegment::new("segment 1", local_speaker),
            ],
            BTreeMap::new(),
        );

        let segments = manager.create_audio_segments(&transcript).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.path.exists()));
    }

    #[tokio::test]
    async fn unknown_preferred_backend_falls_back_to_first_registered() {
        let manager = AudioManager::new(
            vec![TtsBackend::sync(BlockingWav {
                name: "dummy",
                duration_ms: 50,
                fail_on: None,
            })],
            1,
            "wav",
        )
        .unwrap();

        let mut configs = BTreeMap::new();
        configs.insert("azure".to_string(), VoiceConfig::new("some-voice", "azure"));
        let speaker = Arc::new(Character::new("Host", "Podcast host", configs, ""));
        let transcript = transcript_of(&speaker, 1);

        let segments = manager.create_audio_segments(&transcript).await.unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[tokio::test]
    async fn no_backends_is_a_fatal_configuration_error() {
        let manager = AudioManager::new(Vec::new(), 1, "wav").unwrap();
        let speaker = character_for("dummy");
        let transcript = transcript_of(&speaker, 1);
        let err = manager.create_audio_segments(&transcript).await.unwrap_err();
        assert!(err.to_string().contains("no TTS backend registered"));
    }

    #[tokio::test]
    async fn first_failure_in_transcript_order_aborts_the_batch() {
        let manager = AudioManager::new(
            vec![TtsBackend::sync(BlockingWav {
                name: "dummy",
                duration_ms: 50,
                fail_on: Some("segment 1"),
            })],
            2,
            "wav",
        )
        .unwrap();
        let speaker = character_for("dummy");
        let transcript = transcript_of(&speaker, 4);

        let err = manager.create_audio_segments(&transcript).await.unwrap_err();
        assert!(err.to_string().contains("segment 1"));
    }
}
