//! Paragraph-boundary text chunker.
//!
//! Splits parsed document text into [`Chunk`]s that respect a token budget.
//! Splitting occurs on paragraph boundaries (`\n\n`) to preserve semantic
//! coherence within each chunk. How text is measured is a pluggable
//! [`TokenCounter`] policy.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n` paragraph boundaries, dropping blank paragraphs.
//! 2. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed the budget.
//! 3. When exceeded, flush the buffer as a chunk and start a new one.
//! 4. If a single paragraph exceeds the budget, hard-split it at the last
//!    newline or space that fits, falling back to a character boundary.
//! 5. Empty or whitespace-only input produces no chunks.
//!
//! Every chunk is stamped with its tag, source filename and 0-based
//! sequence at construction time.
//!
//! # Example
//!
//! ```rust
//! use tagrag_core::chunk::Chunker;
//! use tagrag_core::models::Tag;
//!
//! let chunker = Chunker::with_char_budget(700);
//! let tag = Tag::parse("docs").unwrap();
//! let chunks = chunker.split("Hello world.\n\nSecond paragraph.", &tag, "a.md");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata().sequence, 0);
//! ```

use std::sync::Arc;

use crate::models::{Chunk, ChunkMetadata, Tag};

/// Approximate characters-per-token ratio for [`CharTokenCounter`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate tokens-per-word ratio for [`WordTokenCounter`].
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Policy for measuring text against a token budget.
pub trait TokenCounter: Send + Sync {
    /// Estimated token count of `text`.
    fn count(&self, text: &str) -> usize;

    /// Byte length of the longest prefix of `text` that fits in `budget`
    /// tokens. Must land on a char boundary.
    fn fit(&self, text: &str, budget: usize) -> usize;
}

/// Counts ~4 characters as one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    fn fit(&self, text: &str, budget: usize) -> usize {
        let max_chars = budget.saturating_mul(CHARS_PER_TOKEN);
        text.char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    }
}

/// Counts each whitespace-separated word as ~1.3 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenCounter;

impl TokenCounter for WordTokenCounter {
    fn count(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * TOKENS_PER_WORD).ceil() as usize
    }

    fn fit(&self, text: &str, budget: usize) -> usize {
        let max_words = ((budget as f64 / TOKENS_PER_WORD).floor() as usize).max(1);
        let mut words = 0usize;
        let mut in_word = false;
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                if in_word {
                    words += 1;
                    if words == max_words {
                        return i;
                    }
                }
                in_word = false;
            } else {
                in_word = true;
            }
        }
        text.len()
    }
}

/// Splits text into tagged, token-bounded chunks.
#[derive(Clone)]
pub struct Chunker {
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    /// A chunker with the given budget and counting policy.
    ///
    /// A zero budget is treated as one token so splitting always makes
    /// progress.
    pub fn new(max_tokens: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            counter,
        }
    }

    /// A chunker using [`CharTokenCounter`].
    pub fn with_char_budget(max_tokens: usize) -> Self {
        Self::new(max_tokens, Arc::new(CharTokenCounter))
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into chunks tagged with `tag` and `source_filename`.
    ///
    /// # Guarantees
    ///
    /// - Empty or whitespace-only text yields no chunks.
    /// - Sequences are contiguous: `0, 1, 2, …, N-1`.
    /// - No non-whitespace content is dropped; the last chunk may be short.
    /// - Identical input gives identical output.
    pub fn split(&self, text: &str, tag: &Tag, source_filename: &str) -> Vec<Chunk> {
        let mut pieces: Vec<String> = Vec::new();
        let mut current_buf = String::new();

        for para in text.split("\n\n") {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }

            if !current_buf.is_empty() {
                let would_be = self
                    .counter
                    .count(&format!("{}\n\n{}", current_buf, trimmed));
                if would_be > self.max_tokens {
                    pieces.push(std::mem::take(&mut current_buf));
                }
            }

            if self.counter.count(trimmed) > self.max_tokens {
                if !current_buf.is_empty() {
                    pieces.push(std::mem::take(&mut current_buf));
                }
                self.hard_split(trimmed, &mut pieces);
            } else {
                if !current_buf.is_empty() {
                    current_buf.push_str("\n\n");
                }
                current_buf.push_str(trimmed);
            }
        }

        if !current_buf.is_empty() {
            pieces.push(current_buf);
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(sequence, piece)| {
                Chunk::new(
                    piece,
                    ChunkMetadata {
                        tag: tag.clone(),
                        source_filename: source_filename.to_string(),
                        sequence,
                    },
                )
            })
            .collect()
    }

    fn hard_split(&self, paragraph: &str, pieces: &mut Vec<String>) {
        let mut remaining = paragraph;
        while !remaining.is_empty() {
            let fit = self.counter.fit(remaining, self.max_tokens);
            let split_at = if fit >= remaining.len() {
                remaining.len()
            } else if fit > 0 && remaining[fit..].starts_with(char::is_whitespace) {
                fit
            } else {
                // Prefer a newline or space boundary inside the budget
                let boundary = remaining[..fit]
                    .rfind('\n')
                    .or_else(|| remaining[..fit].rfind(' '))
                    .map(|pos| pos + 1);
                match boundary {
                    Some(pos) => pos,
                    None if fit > 0 => fit,
                    None => first_char_len(remaining),
                }
            };
            let piece = remaining[..split_at].trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            remaining = &remaining[split_at..];
        }
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

fn first_char_len(text: &str) -> usize {
    text.chars().next().map(char::len_utf8).unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> Tag {
        Tag::parse("docs").unwrap()
    }

    fn squash(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = Chunker::with_char_budget(700).split("Hello, world!", &tag(), "a.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata().sequence, 0);
        assert_eq!(chunks[0].text(), "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunker = Chunker::with_char_budget(700);
        assert!(chunker.split("", &tag(), "a.txt").is_empty());
        assert!(chunker.split(" \n\n \t\n", &tag(), "a.txt").is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = Chunker::with_char_budget(700).split(text, &tag(), "a.txt");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text().contains("First paragraph."));
        assert!(chunks[0].text().contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // 5 tokens => 20 chars
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = Chunker::with_char_budget(5).split(text, &tag(), "a.txt");
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata().sequence, i);
        }
    }

    #[test]
    fn test_every_chunk_carries_tag_and_filename() {
        let text = (0..30)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = Chunker::with_char_budget(10).split(&text, &tag(), "notes/a.md");
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata().tag, tag());
            assert_eq!(c.metadata().source_filename, "notes/a.md");
            assert_eq!(c.metadata().sequence, i, "sequence mismatch at {}", i);
        }
    }

    #[test]
    fn test_coverage_without_gaps() {
        let text = "Alpha beta gamma delta.\n\nEpsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau.\n\n\n\nUpsilon phi chi psi omega, the last words.";
        for budget in [1, 2, 3, 5, 8, 40] {
            let chunks = Chunker::with_char_budget(budget).split(text, &tag(), "a.txt");
            let joined: String = chunks.iter().map(|c| c.text()).collect();
            assert_eq!(squash(&joined), squash(text), "budget {}", budget);
            let last = chunks.last().unwrap();
            assert!(text.ends_with(last.text()), "budget {}", budget);
        }
    }

    #[test]
    fn test_chunks_respect_budget() {
        let text = "word ".repeat(500);
        let chunks = Chunker::with_char_budget(16).split(&text, &tag(), "a.txt");
        for c in &chunks {
            assert!(CharTokenCounter.count(c.text()) <= 16);
        }
    }

    #[test]
    fn test_hard_split_without_spaces_respects_char_boundaries() {
        let text = "é".repeat(50);
        let chunks = Chunker::with_char_budget(2).split(&text, &tag(), "a.txt");
        assert_eq!(chunks.len(), 7);
        let joined: String = chunks.iter().map(|c| c.text()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_word_counter_policy() {
        // 14 tokens fits 10 words
        let chunker = Chunker::new(14, Arc::new(WordTokenCounter));
        let text = (0..100).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunker.split(&text, &tag(), "a.txt");
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.text().split_whitespace().count() == 10));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let chunker = Chunker::with_char_budget(2);
        let c1 = chunker.split(text, &tag(), "a.txt");
        let c2 = chunker.split(text, &tag(), "a.txt");
        assert_eq!(c1, c2);
    }
}
