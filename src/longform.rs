//! Chunked generation of conversations longer than one model call can
//! produce, with rolling context so the result reads as one continuous
//! dialogue.

use crate::character::Character;
use crate::config::ConversationConfig;
use crate::llm::{dialogue_prompt, strip_code_blocks, ChatClient, SCRIPT_SYSTEM_PROMPT};
use crate::transcript::parse_tagged_turns;
use anyhow::Result;
use log::info;
use std::sync::Arc;

pub struct LongFormContentGenerator<'a> {
    chat: &'a dyn ChatClient,
    config: &'a ConversationConfig,
}

impl<'a> LongFormContentGenerator<'a> {
    pub fn new(chat: &'a dyn ChatClient, config: &'a ConversationConfig) -> Self {
        Self { chat, config }
    }

    /// Largest chunk size that keeps every chunk at or above the configured
    /// minimum while producing at most the configured number of chunks.
    fn calculate_chunk_size(&self, input_length: usize) -> usize {
        if input_length <= self.config.min_chunk_size {
            return input_length;
        }

        let maximum_chunk_size = input_length.div_ceil(self.config.max_num_chunks);
        if maximum_chunk_size >= self.config.min_chunk_size {
            return maximum_chunk_size;
        }

        input_length / (input_length / self.config.min_chunk_size)
    }

    /// Split into sentence-aligned chunks: sentences are packed greedily and
    /// a chunk closes as soon as it reaches the target size. Every chunk but
    /// the last is therefore at least target-sized, which is what bounds the
    /// chunk count by `max_num_chunks`.
    pub fn chunk_content(&self, input: &str) -> Vec<String> {
        let chunk_size = self.calculate_chunk_size(input.len());
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in split_sentences(input) {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            if current.len() >= chunk_size {
                chunks.push(std::mem::take(&mut current));
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn part_instruction(&self, part_idx: usize, total_parts: usize, context: &str) -> String {
        if part_idx == 0 {
            return format!(
                "Start the conversation by greeting the audience: Welcome to {} - {}. \
You are generating the introduction of a longer conversation: introduce the speakers \
and the topic, and leave the details for later parts.",
                self.config.podcast_name, self.config.podcast_tagline
            );
        }

        let last_speaker = parse_tagged_turns(context)
            .last()
            .map(|(speaker, _)| speaker.clone())
            .unwrap_or_default();
        let continuity = format!(
            "The conversation so far is given in CONTEXT. Continue its natural flow without \
repeating points already discussed, and avoid abrupt transitions: this is one live \
conversation without breaks. {} spoke last, so a different speaker must speak first now.",
            last_speaker
        );

        if part_idx == total_parts - 1 {
            format!(
                "You are generating the final part of the conversation. {} Discuss the INPUT \
below, then make concluding remarks and end with the speakers saying goodbye to the audience.",
                continuity
            )
        } else {
            format!(
                "You are generating part {} of {} of the conversation. {} Discuss the INPUT \
below in dialogue form.",
                part_idx + 1,
                total_parts,
                continuity
            )
        }
    }

    /// Drive one model call per chunk, carrying the conversation generated so
    /// far as context, and stitch the parts into one normalized dialogue.
    /// Any chunk failure aborts the whole build.
    pub async fn generate(
        &self,
        content: &str,
        characters: &[Arc<Character>],
    ) -> Result<String> {
        let chunks = self.chunk_content(content);
        let total_parts = chunks.len();
        info!("generating long-form conversation in {} parts", total_parts);

        let mut parts = Vec::with_capacity(total_parts);
        let mut context = content.to_string();

        for (i, chunk) in chunks.iter().enumerate() {
            let instruction = self.part_instruction(i, total_parts, &context);
            let prompt =
                dialogue_prompt(self.config, characters, &instruction, Some(&context), chunk);
            let response = strip_code_blocks(&self.chat.chat(SCRIPT_SYSTEM_PROMPT, &prompt).await?);
            info!("generated part {}/{}", i + 1, total_parts);

            if i == 0 {
                context = response.clone();
            } else {
                context.push('\n');
                context.push_str(&response);
            }
            parts.push(response);
        }

        Ok(normalize_alternation(&parts.join("\n")))
    }
}

/// Merge consecutive turns by the same speaker into one turn, so the stitched
/// dialogue strictly alternates across chunk boundaries. Text that carries no
/// tagged turns is returned unchanged. Applying this twice is a no-op.
pub fn normalize_alternation(tagged: &str) -> String {
    let turns = parse_tagged_turns(tagged);
    if turns.is_empty() {
        return tagged.to_string();
    }

    let mut merged: Vec<(String, String)> = Vec::with_capacity(turns.len());
    for (speaker, text) in turns {
        match merged.last_mut() {
            Some((last_speaker, last_text)) if *last_speaker == speaker => {
                last_text.push(' ');
                last_text.push_str(&text);
            }
            _ => merged.push((speaker, text)),
        }
    }

    merged
        .into_iter()
        .map(|(speaker, text)| format!("<{0}>{1}</{0}>", speaker, text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_sentences(input: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminator = false;

    for (idx, ch) in input.char_indices() {
        if prev_terminator && ch.is_whitespace() {
            let sentence = input[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        prev_terminator = matches!(ch, '.' | '!' | '?');
    }

    let tail = input[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
