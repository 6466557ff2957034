//! Error taxonomy for the public operations.
//!
//! Collaborator implementations work in `anyhow::Result` and attach context
//! as they go; the pipeline classifies those failures into a [`RagError`]
//! at the point where the failing step is known.

use std::time::Duration;

use serde::Serialize;
use tagrag_core::models::TagError;

use crate::extract::ExtractError;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Rejected input: bad tag, empty file list, empty URL.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The document parser could not turn bytes into text.
    #[error("parse failed: {0}")]
    Parse(#[from] ExtractError),

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("vector store failed: {0:#}")]
    Store(anyhow::Error),

    /// Repository fetch failed; no files were walked.
    #[error("clone failed: {0:#}")]
    Clone(anyhow::Error),

    /// Workspace, filesystem or tag registry failure.
    #[error("infrastructure failure: {0:#}")]
    Infrastructure(anyhow::Error),

    #[error("chat model failed: {0:#}")]
    Chat(anyhow::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<TagError> for RagError {
    fn from(err: TagError) -> Self {
        RagError::Validation(err.to_string())
    }
}

/// Serializable classification of a [`RagError`], used in per-document
/// outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Parse,
    Embedding,
    Store,
    Clone,
    Infrastructure,
    Chat,
    Timeout,
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Validation(_) => ErrorKind::Validation,
            RagError::Parse(_) => ErrorKind::Parse,
            RagError::Embedding(_) => ErrorKind::Embedding,
            RagError::Store(_) => ErrorKind::Store,
            RagError::Clone(_) => ErrorKind::Clone,
            RagError::Infrastructure(_) => ErrorKind::Infrastructure,
            RagError::Chat(_) => ErrorKind::Chat,
            RagError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("POST /api/embed");
        let err = RagError::Embedding(inner);
        assert_eq!(
            err.to_string(),
            "embedding failed: POST /api/embed: connection refused"
        );
        assert_eq!(err.kind(), ErrorKind::Embedding);
    }

    #[test]
    fn tag_errors_are_validation() {
        let err: RagError = TagError::Empty.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            "\"validation\""
        );
    }

    #[test]
    fn timeout_display() {
        assert_eq!(
            RagError::Timeout(Duration::from_secs(3)).to_string(),
            "timed out after 3s"
        );
    }
}
