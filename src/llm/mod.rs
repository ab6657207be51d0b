use crate::character::Character;
use crate::config::ConversationConfig;
use crate::longform::LongFormContentGenerator;
use crate::transcript::{clean_markup, parse_tagged_turns};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Write as _;
use std::sync::Arc;

mod providers;

pub use providers::create_chat_client;

/// Produces the ordered dialogue for a podcast: one (speaker name, text)
/// pair per turn. Name-based pairs let the caller decide what to do with
/// turns attributed to speakers it does not know.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate_transcript(
        &self,
        content: &str,
        characters: &[Arc<Character>],
    ) -> Result<Vec<(String, String)>>;
}

/// A plain chat completion call against some vendor.
#[async_trait]
pub trait ChatClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub(crate) const SCRIPT_SYSTEM_PROMPT: &str = "You are an award-winning podcast scriptwriter. \
Respond only with dialogue turns wrapped in the speaker tags you are given, nothing else.";

/// Strip a wrapping markdown code fence from a model response.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}

/// Shared prompt body for single-shot and long-form generation.
pub(crate) fn dialogue_prompt(
    conversation: &ConversationConfig,
    characters: &[Arc<Character>],
    instruction: &str,
    context: Option<&str>,
    input: &str,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "PODCAST: {} - {}\n",
        conversation.podcast_name, conversation.podcast_tagline
    );
    let _ = writeln!(prompt, "SPEAKERS:");
    for character in characters {
        let _ = writeln!(prompt, "{}\n", character.to_prompt());
    }
    let _ = writeln!(prompt, "RULES:");
    let tags = characters
        .iter()
        .map(|c| format!("<{0}>...</{0}>", c.name))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(prompt, "1. Wrap every turn in its speaker's tag: {}", tags);
    let _ = writeln!(prompt, "2. Strictly alternate speakers between turns.");
    let _ = writeln!(
        prompt,
        "3. Output dialogue only: no headings, stage directions or commentary.\n"
    );
    if let Some(context) = context {
        let _ = writeln!(prompt, "CONTEXT:\n{}\n", context);
    }
    let _ = writeln!(prompt, "{}\n", instruction);
    let _ = writeln!(prompt, "INPUT:\n{}", input);
    prompt
}

/// The default [`LlmBackend`]: prompts a chat model for tagged dialogue and
/// parses the tags back out, going through the long-form chunked path when
/// configured.
pub struct TranscriptEngine {
    chat: Arc<dyn ChatClient>,
    conversation: ConversationConfig,
}

impl TranscriptEngine {
    pub fn new(chat: Arc<dyn ChatClient>, conversation: ConversationConfig) -> Self {
        Self { chat, conversation }
    }

    fn single_shot_instruction(&self) -> String {
        format!(
            "Generate a natural podcast conversation covering the INPUT below. \
Begin by welcoming the audience to {} - {} and end with the speakers signing off.",
            self.conversation.podcast_name, self.conversation.podcast_tagline
        )
    }
}

#[async_trait]
impl LlmBackend for TranscriptEngine {
    async fn generate_transcript(
        &self,
        content: &str,
        characters: &[Arc<Character>],
    ) -> Result<Vec<(String, String)>> {
        if characters.is_empty() {
            bail!("cannot generate a transcript without characters");
        }

        let raw = if self.conversation.longform {
            LongFormContentGenerator::new(self.chat.as_ref(), &self.conversation)
                .generate(content, characters)
                .await?
        } else {
            let instruction = self.single_shot_instruction();
            let prompt =
                dialogue_prompt(&self.conversation, characters, &instruction, None, content);
            self.chat.chat(SCRIPT_SYSTEM_PROMPT, &prompt).await?
        };

        let speaker_tags: Vec<&str> = characters.iter().map(|c| c.name.as_str()).collect();
        let cleaned = clean_markup(&strip_code_blocks(&raw), &speaker_tags);
        let turns = parse_tagged_turns(&cleaned);
        if turns.is_empty() {
            bail!("LLM response contained no tagged dialogue turns");
        }
        Ok(turns)
    }
}
