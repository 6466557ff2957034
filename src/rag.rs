//! Retrieval-augmented query flow.
//!
//! ```text
//! message → embed → top-K search within tag → system prompt + user message → chat stream
//! ```
//!
//! An empty search result still produces a prompt, with an empty DOCUMENTS
//! section. Embedding and search failures end the query; no answer is
//! attempted without the retrieval step having succeeded.

use std::sync::Arc;

use tagrag_core::embedding::Embedder;
use tagrag_core::models::{ChatMessage, Tag};
use tagrag_core::prompt::PromptTemplate;
use tagrag_core::store::VectorStore;

use crate::chat::{ChatModel, ResponseStream};
use crate::error::RagError;

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatModel>,
    template: PromptTemplate,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatModel>,
        template: PromptTemplate,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            template,
            top_k,
        }
    }

    /// Plain completion without retrieval.
    pub async fn answer(&self, model: &str, message: &str) -> Result<String, RagError> {
        self.chat
            .generate(model, &[ChatMessage::user(message)])
            .await
            .map_err(RagError::Chat)
    }

    /// Streaming completion without retrieval.
    pub async fn answer_stream(&self, model: &str, message: &str) -> Result<ResponseStream, RagError> {
        self.chat
            .generate_stream(model, vec![ChatMessage::user(message)])
            .await
            .map_err(RagError::Chat)
    }

    /// Streaming completion grounded in the top-K chunks of `tag`.
    #[tracing::instrument(skip(self, message))]
    pub async fn answer_with_rag(
        &self,
        model: &str,
        tag: &Tag,
        message: &str,
    ) -> Result<ResponseStream, RagError> {
        let messages = self.assemble_rag_prompt(tag, message).await?;
        self.chat
            .generate_stream(model, messages)
            .await
            .map_err(RagError::Chat)
    }

    /// Retrieve context for `message` and build the `[system, user]` prompt.
    pub async fn assemble_rag_prompt(
        &self,
        tag: &Tag,
        message: &str,
    ) -> Result<Vec<ChatMessage>, RagError> {
        let query = self
            .embedder
            .embed(message)
            .await
            .map_err(RagError::Embedding)?;
        let hits = self
            .store
            .search(&query, tag, self.top_k)
            .await
            .map_err(RagError::Store)?;
        tracing::debug!(hits = hits.len(), top_k = self.top_k, "retrieved context");
        Ok(self.template.assemble(&hits, message))
    }
}
