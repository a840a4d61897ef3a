//! Chunking: split the raw document into overlapping, size-bounded chunks.
//!
//! [`RecursiveCharacterSplitter`] walks a priority list of separators
//! (paragraph, line, word, nothing). At each level it splits on the first
//! separator present in the text, greedily merges the pieces back up to
//! `chunk_size` characters, and recurses with the lower-priority separators
//! into any piece that is still too long. The empty separator splits into
//! single characters, so the last resort is a hard cut mid-word.
//!
//! When a merged chunk is emitted, pieces are dropped from its front until
//! at most `chunk_overlap` characters remain; those carry over into the
//! next chunk. Separators stay attached to the start of the piece that
//! follows them, and every chunk is whitespace-trimmed.
//!
//! All lengths are in `char`s.

use crate::config::RefineryConfig;
use crate::error::RefineryError;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One chunk of the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the full chunk sequence.
    pub index: usize,
    pub text: String,
}

impl Chunk {
    /// 1-based position, as used in IDs and diagnostics.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Recursive character text splitter.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterSplitter {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: Vec<String>,
    ) -> Result<Self, RefineryError> {
        if chunk_size == 0 {
            return Err(RefineryError::InvalidConfig("chunk size must be ≥ 1".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RefineryError::InvalidConfig(format!(
                "chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn from_config(config: &RefineryConfig) -> Result<Self, RefineryError> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.separators.clone(),
        )
    }

    /// Split `text` into ordered chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let chunks = self.split_with(text, &self.separators);
        debug!(
            "Split {} chars into {} chunks (size={}, overlap={})",
            char_len(text),
            chunks.len(),
            self.chunk_size,
            self.chunk_overlap
        );
        chunks
    }

    /// Split `text` into indexed [`Chunk`]s.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut lower: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                lower = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if lower.is_empty() {
                push_trimmed(&mut chunks, piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, lower));
            }
        }

        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks
    }

    /// Greedily merge short pieces into chunks, carrying the overlap forward.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of {} chars, longer than the target {}",
                        total, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_trimmed(&mut chunks, join(&current));
                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        match current.pop_front() {
                            Some((_, dropped)) => total -= dropped,
                            None => break,
                        }
                    }
                }
            }
            current.push_back((piece, len));
            total += len;
        }

        push_trimmed(&mut chunks, join(&current));
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join(pieces: &VecDeque<(&str, usize)>) -> String {
    pieces.iter().map(|(p, _)| *p).collect()
}

fn push_trimmed(chunks: &mut Vec<String>, chunk: String) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`, keeping it at the start of the following piece.
/// The empty separator yields single characters. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}
