//! Text cleanup for spoken delivery.
//!
//! Rules run in order: strip markup, collapse ellipses, move currency
//! symbols after the amount, then (for engines that choke on long input)
//! split into clause-sized chunks.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::engine::Voice;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[^>]+(>|$)").expect("static regex"));

static ELLIPSIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.…]*(?:\.{3}|…)[.…]*").expect("static regex"));

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([$€£¥])([0-9][0-9., ]*)").expect("static regex"));

static CLAUSE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?—:] |[()“”]").expect("static regex"));

/// Text ready for the engine: one utterance, or one per clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SpokenText {
    Single(String),
    Chunks(Vec<String>),
}

impl SpokenText {
    /// Non-empty utterance texts in speaking order.
    pub fn into_parts(self) -> Vec<String> {
        match self {
            Self::Single(text) if text.trim().is_empty() => Vec::new(),
            Self::Single(text) => vec![text],
            Self::Chunks(chunks) => chunks,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    chunked_voice_prefixes: Vec<String>,
}

impl Sanitizer {
    pub fn new(chunked_voice_prefixes: Vec<String>) -> Self {
        Self {
            chunked_voice_prefixes,
        }
    }

    /// Whether `voice` belongs to an engine with an input-length limit.
    pub fn is_length_constrained(&self, voice: Option<&Voice>) -> bool {
        voice.is_some_and(|v| {
            self.chunked_voice_prefixes
                .iter()
                .any(|prefix| v.name.starts_with(prefix.as_str()))
        })
    }

    pub fn sanitize(&self, text: &str, voice: Option<&Voice>) -> SpokenText {
        let cleaned = clean(text);
        if self.is_length_constrained(voice) {
            SpokenText::Chunks(split_clauses(&cleaned))
        } else {
            SpokenText::Single(cleaned)
        }
    }
}

/// Apply the markup, ellipsis and currency rules.
pub fn clean(text: &str) -> String {
    let text = MARKUP.replace_all(text, "");
    let text = ELLIPSIS.replace_all(&text, ".");
    let text = CURRENCY.replace_all(&text, |caps: &Captures<'_>| {
        let amount = caps[2].trim_end();
        let trailing = &caps[2][amount.len()..];
        format!("{amount} {}{trailing}", &caps[1])
    });
    text.into_owned()
}

/// Split after each clause boundary, keeping the boundary with its clause.
pub fn split_clauses(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for boundary in CLAUSE_BOUNDARY.find_iter(text) {
        push_chunk(&mut chunks, &text[start..boundary.end()]);
        start = boundary.end();
    }
    push_chunk(&mut chunks, &text[start..]);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: &str) {
    if !chunk.trim().is_empty() {
        chunks.push(chunk.to_string());
    }
}
