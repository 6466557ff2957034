//! Transport-independent operation surface.
//!
//! | Operation | Method |
//! |-----------|--------|
//! | ListTags | [`RagService::list_tags`] |
//! | UploadIngest | [`RagService::upload_ingest`] |
//! | RepositoryIngest | [`RagService::repository_ingest`] |
//! | Answer | [`RagService::answer`] |
//! | AnswerStream | [`RagService::answer_stream`] |
//! | AnswerWithRag | [`RagService::answer_with_rag`] |
//!
//! Input validation happens here; everything below receives checked values.

use std::sync::Arc;

use anyhow::Result;
use tagrag_core::chunk::{CharTokenCounter, Chunker, TokenCounter, WordTokenCounter};
use tagrag_core::models::{Document, Tag};
use tagrag_core::prompt::PromptTemplate;
use tagrag_core::tags::TagRegistry;

use crate::chat::{create_chat_model, ResponseStream};
use crate::config::Config;
use crate::corpus::CorpusWriter;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::extract::FormatParser;
use crate::fetch::{Credentials, GitCliFetcher};
use crate::ingest::{BatchReport, IngestOptions, Ingestor};
use crate::migrate;
use crate::rag::QueryEngine;
use crate::sqlite_store::{SqliteTagRegistry, SqliteVectorStore};

pub struct RagService {
    tags: Arc<dyn TagRegistry>,
    ingestor: Ingestor,
    query: QueryEngine,
}

impl RagService {
    pub fn new(tags: Arc<dyn TagRegistry>, ingestor: Ingestor, query: QueryEngine) -> Self {
        Self {
            tags,
            ingestor,
            query,
        }
    }

    /// Wire the SQLite store and registry with the configured providers.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let store = Arc::new(SqliteVectorStore::new(pool.clone()));
        let tags: Arc<dyn TagRegistry> = Arc::new(SqliteTagRegistry::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.chat)?;

        let counter: Arc<dyn TokenCounter> = match config.chunking.tokenizer.as_str() {
            "words" => Arc::new(WordTokenCounter),
            _ => Arc::new(CharTokenCounter),
        };
        let writer = CorpusWriter::new(
            Arc::new(FormatParser::new(config.ingest.max_document_bytes)),
            Chunker::new(config.chunking.max_tokens, counter),
            embedder.clone(),
            store.clone(),
            tags.clone(),
        )
        .with_batch_size(config.embedding.batch_size);

        let ingestor = Ingestor::new(
            writer,
            Arc::new(GitCliFetcher::from_config(&config.repository)),
            IngestOptions::from_config(config),
        )?;
        let query = QueryEngine::new(
            embedder,
            store,
            chat,
            PromptTemplate::new(config.retrieval.reply_language.clone()),
            config.retrieval.top_k,
        );

        Ok(Self::new(tags, ingestor, query))
    }

    /// Registered tags, oldest first.
    pub async fn list_tags(&self) -> Result<Vec<Tag>, RagError> {
        self.tags.list().await.map_err(RagError::Infrastructure)
    }

    /// Ingest uploaded files under `tag`.
    ///
    /// Per-file failures are reported in the returned [`BatchReport`].
    pub async fn upload_ingest(
        &self,
        tag: &str,
        files: Vec<Document>,
    ) -> Result<BatchReport, RagError> {
        let tag = Tag::parse(tag)?;
        if files.is_empty() {
            return Err(RagError::Validation("no files to ingest".into()));
        }
        Ok(self.ingestor.ingest_batch(&tag, files).await)
    }

    /// Clone and ingest a repository. The tag defaults to the repository
    /// name.
    pub async fn repository_ingest(
        &self,
        url: &str,
        credentials: Option<Credentials>,
        tag_override: Option<&str>,
    ) -> Result<BatchReport, RagError> {
        let tag = tag_override.map(Tag::parse).transpose()?;
        self.ingestor
            .ingest_repository(url, credentials.as_ref(), tag)
            .await
    }

    pub async fn answer(&self, model: &str, message: &str) -> Result<String, RagError> {
        validate_query(model, message)?;
        self.query.answer(model, message).await
    }

    pub async fn answer_stream(&self, model: &str, message: &str) -> Result<ResponseStream, RagError> {
        validate_query(model, message)?;
        self.query.answer_stream(model, message).await
    }

    pub async fn answer_with_rag(
        &self,
        model: &str,
        tag: &str,
        message: &str,
    ) -> Result<ResponseStream, RagError> {
        validate_query(model, message)?;
        let tag = Tag::parse(tag)?;
        self.query.answer_with_rag(model, &tag, message).await
    }
}

fn validate_query(model: &str, message: &str) -> Result<(), RagError> {
    if model.trim().is_empty() {
        return Err(RagError::Validation("model must not be empty".into()));
    }
    if message.trim().is_empty() {
        return Err(RagError::Validation("message must not be empty".into()));
    }
    Ok(())
}
