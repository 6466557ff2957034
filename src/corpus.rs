//! Corpus writer: one document from raw bytes to stored, tagged records.
//!
//! ```text
//! parse → chunk (stamped with tag) → embed in batches → replace file records → register tag
//! ```
//!
//! The tag is registered only after the store has accepted every record of
//! the document, so a tag in the registry always has retrievable content.
//! Writing a file swaps out every record it had before under the same tag,
//! so a shrinking file leaves no stale chunks behind.

use std::sync::Arc;

use anyhow::anyhow;
use tagrag_core::chunk::Chunker;
use tagrag_core::embedding::Embedder;
use tagrag_core::models::{Document, Tag};
use tagrag_core::store::VectorStore;
use tagrag_core::tags::TagRegistry;

use crate::error::RagError;
use crate::extract::DocumentParser;
use crate::ingest::DocumentOutcome;

const DEFAULT_BATCH_SIZE: usize = 64;

pub struct CorpusWriter {
    parser: Arc<dyn DocumentParser>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    tags: Arc<dyn TagRegistry>,
    batch_size: usize,
}

impl CorpusWriter {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        tags: Arc<dyn TagRegistry>,
    ) -> Self {
        Self {
            parser,
            chunker,
            embedder,
            store,
            tags,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Texts per embedding request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Ingest one document, capturing any failure in the outcome.
    pub async fn ingest(&self, document: Document, tag: &Tag) -> DocumentOutcome {
        let filename = document.filename.clone();
        match self.write(document, tag).await {
            Ok(chunks) => DocumentOutcome::ingested(filename, chunks),
            Err(err) => {
                tracing::warn!(%tag, file = %filename, error = %err, "document failed");
                DocumentOutcome::failed(filename, &err)
            }
        }
    }

    /// Ingest one document, returning the number of records written.
    ///
    /// A document that yields no chunks clears any earlier records of the
    /// same file and does not register the tag.
    #[tracing::instrument(skip_all, fields(tag = %tag, file = %document.filename))]
    pub async fn write(&self, document: Document, tag: &Tag) -> Result<usize, RagError> {
        let Document { filename, content } = document;

        let text = self.parser.parse(content, &filename).await?;
        let chunks = self.chunker.split(&text, tag, &filename);
        if chunks.is_empty() {
            self.store
                .replace_document(tag, &filename, Vec::new())
                .await
                .map_err(RagError::Store)?;
            tracing::debug!("no content after parsing; nothing written");
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text().to_string()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .embedder
                .embed_batch(batch)
                .await
                .map_err(RagError::Embedding)?;
            if embedded.len() != batch.len() {
                return Err(RagError::Embedding(anyhow!(
                    "{} returned {} vectors for {} texts",
                    self.embedder.model_name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            tracing::debug!(batch = batch.len(), "embedded chunk batch");
            vectors.extend(embedded);
        }

        let records: Vec<_> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk.into_record(vector))
            .collect();
        let expected = records.len();

        let accepted = self
            .store
            .replace_document(tag, &filename, records)
            .await
            .map_err(RagError::Store)?;
        if accepted != expected {
            return Err(RagError::Store(anyhow!(
                "store accepted {} of {} records",
                accepted,
                expected
            )));
        }

        let inserted = self
            .tags
            .register_if_absent(tag)
            .await
            .map_err(RagError::Infrastructure)?;
        if inserted {
            tracing::info!(%tag, "registered new tag");
        }

        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tagrag_core::store::memory::InMemoryVectorStore;
    use tagrag_core::tags::memory::InMemoryTagRegistry;

    use crate::error::ErrorKind;
    use crate::extract::FormatParser;
    use crate::ingest::OutcomeStatus;

    /// Returns one vector fewer than asked for.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
        }
    }

    #[tokio::test]
    async fn vector_count_mismatch_is_an_embedding_failure() {
        let store = Arc::new(InMemoryVectorStore::new());
        let tags = Arc::new(InMemoryTagRegistry::new());
        let writer = CorpusWriter::new(
            Arc::new(FormatParser::new(1024)),
            Chunker::with_char_budget(100),
            Arc::new(ShortEmbedder),
            store.clone(),
            tags.clone(),
        );

        let tag = Tag::parse("t").unwrap();
        let outcome = writer
            .ingest(Document::new("a.txt", "some text"), &tag)
            .await;

        match outcome.status {
            OutcomeStatus::Failed { kind, .. } => assert_eq!(kind, ErrorKind::Embedding),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(store.is_empty());
        assert!(tags.list().await.unwrap().is_empty());
    }
}
