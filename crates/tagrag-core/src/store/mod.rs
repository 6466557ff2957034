//! Vector store abstraction for tagrag.
//!
//! The [`VectorStore`] trait is the only way the pipeline reaches persisted
//! embeddings, enabling pluggable backends (SQLite in the app crate,
//! in-memory here).
//!
//! Implementations must be internally synchronized: concurrent upserts for
//! the same or different tags may interleave freely.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EmbeddingRecord, ScoredRecord, Tag};

/// Abstract vector store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by ID |
/// | [`replace_document`](VectorStore::replace_document) | Replace every record of one source file |
/// | [`search`](VectorStore::search) | Top-K cosine search within one tag |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write `records` as one logical operation, replacing any record with
    /// the same ID.
    ///
    /// Returns the number of records accepted. Callers treat anything less
    /// than `records.len()` as a failed write.
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize>;

    /// Drop every record of `source_filename` under `tag`, then write
    /// `records` in its place, as one logical operation.
    ///
    /// Returns the number of new records accepted, with the same contract
    /// as [`upsert`](VectorStore::upsert). An empty `records` just clears
    /// the file.
    async fn replace_document(
        &self,
        tag: &Tag,
        source_filename: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize>;

    /// Return up to `top_k` records tagged `tag`, most similar first.
    ///
    /// An empty result is not an error.
    async fn search(&self, query: &[f32], tag: &Tag, top_k: usize) -> Result<Vec<ScoredRecord>>;
}

/// Sort scored records by descending score, breaking ties by ID for a
/// stable order, and keep the first `top_k`.
pub fn rank(mut scored: Vec<ScoredRecord>, top_k: usize) -> Vec<ScoredRecord> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(top_k);
    scored
}
