use crate::character::Character;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Speech-markup tags that TTS vendors understand and that survive cleaning.
const SUPPORTED_MARKUP_TAGS: &[&str] = &["speak", "lang", "p", "phoneme", "s", "say-as", "sub"];

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?([A-Za-z][A-Za-z0-9_-]*)[^>]*>").expect("static pattern"))
}

fn blank_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static pattern"))
}

fn turn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<([A-Za-z][A-Za-z0-9_]*)>\s*(.*?)\s*</([A-Za-z][A-Za-z0-9_]*)>")
            .expect("static pattern")
    })
}

/// Delete every markup tag that is neither a supported speech tag nor one of
/// `additional_tags` (speaker tags, while tagged dialogue is being handled).
/// Unsafe tags are removed, not escaped.
pub fn clean_markup(input: &str, additional_tags: &[&str]) -> String {
    let cleaned = tag_regex().replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        let keep = SUPPORTED_MARKUP_TAGS
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(name))
            || additional_tags.iter().any(|tag| *tag == name);
        if keep {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let cleaned = blank_line_regex().replace_all(&cleaned, "\n");
    cleaned.replace("(scratchpad)", "").trim().to_string()
}

/// Scan `<Speaker>text</Speaker>` turns in order. The regex engine has no
/// backreferences, so open and close tag names are captured separately and
/// pairs that do not match are skipped.
pub(crate) fn parse_tagged_turns(content: &str) -> Vec<(String, String)> {
    let mut turns = Vec::new();
    for caps in turn_regex().captures_iter(content) {
        if caps[1] != caps[3] {
            debug!(
                "skipping mismatched turn tags <{}>...</{}>",
                &caps[1], &caps[3]
            );
            continue;
        }
        turns.push((caps[1].to_string(), caps[2].to_string()));
    }
    turns
}

/// One spoken turn: cleaned text plus the character who speaks it.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    pub text: String,
    pub speaker: Arc<Character>,
    pub tts_args: Map<String, Value>,
}

impl PartialEq for TranscriptSegment {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
            && self.speaker.name == other.speaker.name
            && self.tts_args == other.tts_args
    }
}

impl TranscriptSegment {
    pub fn new(text: &str, speaker: Arc<Character>) -> Self {
        Self {
            text: clean_markup(text, &[]),
            speaker,
            tts_args: Map::new(),
        }
    }

    pub fn with_tts_args(text: &str, speaker: Arc<Character>, tts_args: Map<String, Value>) -> Self {
        Self {
            text: clean_markup(text, &[]),
            speaker,
            tts_args,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("text".to_string(), Value::String(self.text.clone()));
        map.insert(
            "speaker".to_string(),
            Value::String(self.speaker.name.clone()),
        );
        map.insert("tts_args".to_string(), Value::Object(self.tts_args.clone()));
        Value::Object(map)
    }

    pub fn from_value(
        value: &Value,
        characters: &HashMap<String, Arc<Character>>,
    ) -> Result<Self> {
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .context("segment is missing 'text'")?;
        let speaker_name = value
            .get("speaker")
            .and_then(Value::as_str)
            .context("segment is missing 'speaker'")?;
        let speaker = characters
            .get(speaker_name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown speaker '{}' in transcript", speaker_name))?;
        let tts_args = match value.get("tts_args") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Ok(Self::with_tts_args(text, speaker, tts_args))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Plaintext,
    Json,
}

impl FromStr for TranscriptFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plaintext" => Ok(Self::Plaintext),
            "json" => Ok(Self::Json),
            other => bail!("Unsupported transcript format: {}", other),
        }
    }
}

/// The ordered script. Segment order is spoken and merge order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    pub metadata: BTreeMap<String, String>,
}

impl Transcript {
    pub fn new(segments: Vec<TranscriptSegment>, metadata: BTreeMap<String, String>) -> Self {
        Self { segments, metadata }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "segments".to_string(),
            Value::Array(self.segments.iter().map(|s| s.to_value()).collect()),
        );
        map.insert(
            "metadata".to_string(),
            Value::Object(
                self.metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        Value::Object(map)
    }

    pub fn from_value(
        value: &Value,
        characters: &HashMap<String, Arc<Character>>,
    ) -> Result<Self> {
        let raw_segments = value
            .get("segments")
            .and_then(Value::as_array)
            .context("transcript is missing 'segments'")?;
        let segments = raw_segments
            .iter()
            .map(|seg| TranscriptSegment::from_value(seg, characters))
            .collect::<Result<Vec<_>>>()?;
        let mut metadata = BTreeMap::new();
        if let Some(Value::Object(map)) = value.get("metadata") {
            for (k, v) in map {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                metadata.insert(k.clone(), rendered);
            }
        }
        Ok(Self { segments, metadata })
    }

    pub fn export(&self, path: &Path, format: TranscriptFormat) -> Result<()> {
        let content = match format {
            TranscriptFormat::Plaintext => self.to_string(),
            TranscriptFormat::Json => serde_json::to_string_pretty(&self.to_value())?,
        };
        fs::write(path, content)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        Ok(())
    }

    /// Write the structured JSON form.
    pub fn dump(&self, path: &Path) -> Result<()> {
        self.export(path, TranscriptFormat::Json)
    }

    /// Load a transcript, trying the structured form first and falling back
    /// to the legacy `<Speaker>text</Speaker>` format. Legacy files may carry
    /// no metadata, and speakers missing from `characters` are created on the
    /// fly and added to the map.
    pub fn load(path: &Path, characters: &mut HashMap<String, Arc<Character>>) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript from {}", path.display()))?;

        match serde_json::from_str::<Value>(&content) {
            Ok(value) => Self::from_value(&value, characters),
            Err(_) => Self::parse_legacy(&content, characters),
        }
    }

    fn parse_legacy(
        content: &str,
        characters: &mut HashMap<String, Arc<Character>>,
    ) -> Result<Self> {
        let turns = parse_tagged_turns(content);
        if turns.is_empty() {
            bail!("transcript matches neither the structured nor the legacy format");
        }
        let mut segments = Vec::with_capacity(turns.len());
        for (speaker_name, text) in turns {
            let speaker = characters
                .entry(speaker_name.clone())
                .or_insert_with(|| Arc::new(Character::unconfigured(&speaker_name)))
                .clone();
            segments.push(TranscriptSegment::new(&text, speaker));
        }
        Ok(Self::new(segments, BTreeMap::new()))
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Metadata:")?;
        for (key, value) in &self.metadata {
            writeln!(f, "{}: {}", key, value)?;
        }
        writeln!(f)?;
        writeln!(f, "Transcript:")?;
        for segment in &self.segments {
            writeln!(f, "{}: {}", segment.speaker.name, segment.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn characters() -> HashMap<String, Arc<Character>> {
        let mut map = HashMap::new();
        for (name, role) in [("Host", "Podcast host"), ("Guest", "Expert guest")] {
            map.insert(
                name.to_string(),
                Arc::new(Character::new(name, role, Default::default(), "")),
            );
        }
        map
    }

    #[test]
    fn markup_cleaning_keeps_allow_listed_tags() {
        let cleaned = clean_markup(
            "<speak>Hello <em>world</em> <sub alias='two'>2</sub></speak>",
            &[],
        );
        assert_eq!(cleaned, "<speak>Hello world <sub alias='two'>2</sub></speak>");
    }

    #[test]
    fn markup_cleaning_keeps_additional_tags() {
        let input = "<Person1>Hi there</Person1>\n<Person2><prosody rate='fast'>Hello</prosody></Person2>";
        let cleaned = clean_markup(input, &["Person1", "Person2"]);
        assert_eq!(
            cleaned,
            "<Person1>Hi there</Person1>\n<Person2>Hello</Person2>"
        );
    }

    #[test]
    fn segment_construction_strips_unknown_tags() {
        let chars = characters();
        let segment = TranscriptSegment::new(
            "Hello <voice name='x'>everyone</voice> (scratchpad)",
            chars["Host"].clone(),
        );
        assert_eq!(segment.text, "Hello everyone");
    }

    #[test]
    fn json_round_trip_preserves_segments() {
        let chars = characters();
        let mut args = Map::new();
        args.insert("stability".to_string(), Value::from(0.5));
        let transcript = Transcript::new(
            vec![
                TranscriptSegment::with_tts_args(
                    "Welcome to the show!",
                    chars["Host"].clone(),
                    args,
                ),
                TranscriptSegment::new("Glad to be here.", chars["Guest"].clone()),
            ],
            BTreeMap::from([("source".to_string(), "test".to_string())]),
        );

        let dir = tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        transcript.dump(&path).unwrap();

        let mut load_chars = characters();
        let loaded = Transcript::load(&path, &mut load_chars).unwrap();
        assert_eq!(loaded, transcript);
    }

    #[test]
    fn structured_load_rejects_unknown_speaker() {
        let chars = characters();
        let transcript = Transcript::new(
            vec![TranscriptSegment::new("Hello", chars["Host"].clone())],
            BTreeMap::new(),
        );
        let dir = tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        transcript.dump(&path).unwrap();

        let mut only_guest = HashMap::new();
        only_guest.insert("Guest".to_string(), chars["Guest"].clone());
        let err = Transcript::load(&path, &mut only_guest).unwrap_err();
        assert!(err.to_string().contains("unknown speaker"));
    }

    #[test]
    fn legacy_load_round_trips_and_creates_speakers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        fs::write(
            &path,
            "<Person1>Welcome to the show!</Person1>\n<Person2>Glad to be here.</Person2>\n<Person1>Let's dive in.</Person1>",
        )
        .unwrap();

        let mut chars = HashMap::new();
        let transcript = Transcript::load(&path, &mut chars).unwrap();

        assert_eq!(transcript.segments.len(), 3);
        assert_eq!(transcript.segments[0].speaker.name, "Person1");
        assert_eq!(transcript.segments[1].text, "Glad to be here.");
        assert!(transcript.metadata.is_empty());
        // Unknown speakers were auto-created and registered.
        assert!(chars.contains_key("Person1"));
        assert!(chars.contains_key("Person2"));
    }

    #[test]
    fn legacy_parse_skips_mismatched_tags() {
        let turns = parse_tagged_turns("<Person1>ok</Person1><Person1>broken</Person2>");
        assert_eq!(turns, vec![("Person1".to_string(), "ok".to_string())]);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.txt");
        fs::write(&path, "no tags in here at all").unwrap();
        let mut chars = HashMap::new();
        assert!(Transcript::load(&path, &mut chars).is_err());
    }

    #[test]
    fn plaintext_export_has_metadata_header() {
        let chars = characters();
        let transcript = Transcript::new(
            vec![TranscriptSegment::new("Hello!", chars["Host"].clone())],
            BTreeMap::from([("source".to_string(), "unit test".to_string())]),
        );
        let rendered = transcript.to_string();
        assert!(rendered.starts_with("Metadata:\nsource: unit test"));
        assert!(rendered.contains("Transcript:\nHost: Hello!"));
    }

    #[test]
    fn unsupported_format_string_is_rejected() {
        assert!("markdown".parse::<TranscriptFormat>().is_err());
        assert_eq!(
            "plaintext".parse::<TranscriptFormat>().unwrap(),
            TranscriptFormat::Plaintext
        );
    }
}
