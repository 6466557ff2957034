//! RAG prompt assembly.
//!
//! Retrieved chunk texts are joined in rank order into the DOCUMENTS
//! section of a system message, followed by the user's message.

use crate::models::{ChatMessage, ScoredRecord};

/// Reply language used when none is configured.
pub const DEFAULT_REPLY_LANGUAGE: &str = "Chinese";

/// Separator placed between retrieved chunks in the DOCUMENTS section.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// System template for retrieval-augmented answers.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    reply_language: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_LANGUAGE)
    }
}

impl PromptTemplate {
    pub fn new(reply_language: impl Into<String>) -> Self {
        Self {
            reply_language: reply_language.into(),
        }
    }

    pub fn reply_language(&self) -> &str {
        &self.reply_language
    }

    /// Render the system message around an already-joined context block.
    pub fn system_prompt(&self, documents: &str) -> String {
        format!(
            "Use the information from the DOCUMENTS section to provide accurate answers \
             but act as if you knew this information innately.\n\
             If unsure, simply state that you don't know.\n\
             Your reply must be in {}.\n\
             DOCUMENTS:\n{}",
            self.reply_language, documents
        )
    }

    /// Build `[system, user]` from ranked hits and the user's message.
    ///
    /// No hits is not an error: the DOCUMENTS section is left empty and the
    /// model is expected to say it does not know.
    pub fn assemble(&self, hits: &[ScoredRecord], message: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt(&join_context(hits))),
            ChatMessage::user(message),
        ]
    }
}

/// Join hit texts in rank order.
pub fn join_context(hits: &[ScoredRecord]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, Role, Tag};

    fn hit(text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            id: text.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                tag: Tag::new_unchecked("t"),
                source_filename: "f".to_string(),
                sequence: 0,
            },
            score,
        }
    }

    #[test]
    fn test_assemble_orders_context_by_rank() {
        let messages = PromptTemplate::default().assemble(
            &[hit("first", 0.9), hit("second", 0.5)],
            "what?",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.ends_with("DOCUMENTS:\nfirst\n\nsecond"));
        assert!(messages[0].content.contains("must be in Chinese"));
        assert_eq!(messages[1], ChatMessage::user("what?"));
    }

    #[test]
    fn test_empty_context_leaves_documents_section_empty() {
        let messages = PromptTemplate::new("English").assemble(&[], "hello");
        assert!(messages[0].content.ends_with("DOCUMENTS:\n"));
        assert!(messages[0].content.contains("must be in English"));
        assert!(messages[0].content.contains("don't know"));
    }
}
