//! TOML configuration for tagrag.
//!
//! Only `[db]` is required. Every other section falls back to defaults, so
//! a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/tagrag.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Token counting policy: `chars` or `words`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokenizer: default_tokenizer(),
        }
    }
}

fn default_max_tokens() -> usize {
    800
}
fn default_tokenizer() -> String {
    "chars".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_reply_language")]
    pub reply_language: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            reply_language: default_reply_language(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_reply_language() -> String {
    tagrag_core::prompt::DEFAULT_REPLY_LANGUAGE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override. Ollama defaults to `http://localhost:11434`,
    /// OpenAI to `https://api.openai.com`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// `ollama` or `openai`.
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    /// Capacity of the fragment channel between the HTTP reader task and
    /// the consumer.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            url: None,
            timeout_secs: default_chat_timeout_secs(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_chat_provider() -> String {
    "ollama".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    300
}
fn default_stream_buffer() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently per run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,
    /// Documents larger than this fail to parse.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            document_timeout_secs: default_document_timeout_secs(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_document_timeout_secs() -> u64 {
    120
}
fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Parent directory for per-run clone workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    /// Clone with `--depth 1`.
    #[serde(default = "default_shallow")]
    pub shallow: bool,
    #[serde(default)]
    pub branch: Option<String>,
    /// Skipped in addition to `**/.git/**`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            clone_timeout_secs: default_clone_timeout_secs(),
            shallow: default_shallow(),
            branch: None,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("tagrag")
}
fn default_clone_timeout_secs() -> u64 {
    600
}
fn default_shallow() -> bool {
    true
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    match config.chunking.tokenizer.as_str() {
        "chars" | "words" => {}
        other => bail!(
            "Unknown chunking.tokenizer: '{}'. Must be chars or words.",
            other
        ),
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.chat.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if config.chat.stream_buffer == 0 {
        bail!("chat.stream_buffer must be > 0");
    }

    if config.ingest.concurrency == 0 {
        bail!("ingest.concurrency must be > 0");
    }

    for pattern in &config.repository.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid repository.exclude_globs pattern: {}", pattern))?;
    }

    Ok(config)
}
