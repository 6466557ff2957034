//! Core data models used throughout tagrag.
//!
//! These types represent the tags, documents, chunks, embedding records and
//! chat messages that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum length of a user-supplied tag, in characters.
pub const MAX_TAG_LEN: usize = 128;

/// A named knowledge-base partition.
///
/// Ingestion and retrieval are always scoped to exactly one tag. User input
/// goes through [`Tag::parse`]; repository tags come from
/// [`Tag::from_repository_url`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

/// Reasons a user-supplied tag is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("tag must not be empty")]
    Empty,
    #[error("tag must be at most {} characters", MAX_TAG_LEN)]
    TooLong,
    #[error("tag must not contain control characters")]
    ControlCharacter,
}

impl Tag {
    /// Validate and normalize a user-supplied tag.
    ///
    /// Surrounding whitespace is trimmed. The result must be non-empty, at
    /// most [`MAX_TAG_LEN`] characters and free of control characters.
    pub fn parse(raw: &str) -> Result<Self, TagError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TagError::Empty);
        }
        if trimmed.chars().count() > MAX_TAG_LEN {
            return Err(TagError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TagError::ControlCharacter);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derive a tag from a repository URL: the final path segment with a
    /// trailing `.git` removed.
    ///
    /// Never fails. Trailing slashes are ignored, and a URL whose final
    /// segment is empty degrades to the whole (trimmed) URL.
    ///
    /// ```rust
    /// use tagrag_core::models::Tag;
    ///
    /// let tag = Tag::from_repository_url("https://example.com/org/my-repo.git");
    /// assert_eq!(tag.as_str(), "my-repo");
    /// ```
    pub fn from_repository_url(url: &str) -> Self {
        let url = url.trim();
        let path = url.trim_end_matches('/');
        let segment = path.rsplit('/').next().unwrap_or(path);
        let name = segment.strip_suffix(".git").unwrap_or(segment);
        if name.is_empty() {
            Self(url.to_string())
        } else {
            Self(name.to_string())
        }
    }

    /// Wrap a value that was already validated, e.g. a tag read back from
    /// a registry backend.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Raw bytes plus a filename: the unit handed to the document parser.
///
/// Created per uploaded file or per visited repository file and dropped
/// once it has been chunked.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Metadata stamped on every chunk when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub tag: Tag,
    pub source_filename: String,
    /// 0-based position of the chunk in its document's chunk sequence.
    pub sequence: usize,
}

/// A bounded span of parsed document text.
///
/// Chunks are immutable: the tag and position are fixed at construction,
/// and the only way out is [`Chunk::into_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: String,
    text: String,
    hash: String,
    metadata: ChunkMetadata,
}

impl Chunk {
    /// Build a chunk, deriving its stable ID from `(tag, filename, sequence)`
    /// and its content hash from the text.
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        let text = text.into();
        let id = record_id(&metadata);
        let hash = content_hash(&text);
        Self {
            id,
            text,
            hash,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// SHA-256 of the chunk text, hex encoded.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn metadata(&self) -> &ChunkMetadata {
        &self.metadata
    }

    /// Consume the chunk, pairing it with its embedding vector.
    pub fn into_record(self, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: self.id,
            vector,
            text: self.text,
            hash: self.hash,
            metadata: self.metadata,
        }
    }
}

/// The unit persisted to a vector store. One chunk yields exactly one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A record returned from similarity search, highest score first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message of a chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

fn record_id(metadata: &ChunkMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(metadata.tag.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata.source_filename.as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata.sequence.to_le_bytes());
    format!("{:x}", hasher.finalize())[..32].to_string()
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
