//! In-memory [`VectorStore`] for tests and embedded use.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over the records of one tag.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{EmbeddingRecord, ScoredRecord, Tag};

use super::{rank, VectorStore};

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        let accepted = records.len();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(accepted)
    }

    async fn replace_document(
        &self,
        tag: &Tag,
        source_filename: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        stored.retain(|_, r| !(&r.metadata.tag == tag && r.metadata.source_filename == source_filename));
        let accepted = records.len();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(accepted)
    }

    async fn search(&self, query: &[f32], tag: &Tag, top_k: usize) -> Result<Vec<ScoredRecord>> {
        let stored = self
            .records
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))?;
        let scored = stored
            .values()
            .filter(|r| &r.metadata.tag == tag)
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query, &r.vector),
            })
            .collect();
        Ok(rank(scored, top_k))
    }
}
