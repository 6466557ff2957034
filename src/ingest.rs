//! Upload and repository ingestion flows.
//!
//! Both flows fan documents out to the [`CorpusWriter`] with bounded
//! concurrency and collect one [`DocumentOutcome`] per document, in input
//! order. A failing document never aborts its siblings.
//!
//! The repository flow additionally owns a [`Workspace`] for the clone:
//!
//! ```text
//! acquire workspace → clone (deadline) → walk regular files → ingest each → release
//! ```
//!
//! Clone failure ends the run before any file is read. The workspace is
//! removed on every path out of the run, including cancellation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tagrag_core::models::{Document, Tag};
use walkdir::WalkDir;

use crate::config::Config;
use crate::corpus::CorpusWriter;
use crate::error::{ErrorKind, RagError};
use crate::extract::ExtractError;
use crate::fetch::{redact_url, Credentials, RepositoryFetcher};
use crate::workspace::Workspace;

/// Always skipped when walking a clone.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**"];

/// Result of ingesting a single document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub filename: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ingested { chunks: usize },
    Failed { kind: ErrorKind, cause: String },
}

impl DocumentOutcome {
    pub fn ingested(filename: impl Into<String>, chunks: usize) -> Self {
        Self {
            filename: filename.into(),
            status: OutcomeStatus::Ingested { chunks },
        }
    }

    pub fn failed(filename: impl Into<String>, err: &RagError) -> Self {
        Self {
            filename: filename.into(),
            status: OutcomeStatus::Failed {
                kind: err.kind(),
                cause: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Ingested { .. })
    }
}

/// Per-document outcomes of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub tag: Tag,
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchReport {
    /// True only when every document was ingested.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(DocumentOutcome::is_success)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn chunks_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                OutcomeStatus::Ingested { chunks } => chunks,
                OutcomeStatus::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Limits and locations for ingestion runs.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub concurrency: usize,
    pub document_timeout: Duration,
    pub clone_timeout: Duration,
    pub workspace_root: PathBuf,
    pub exclude_globs: Vec<String>,
    /// Files larger than this are rejected from their metadata, unread.
    pub max_document_bytes: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.ingest.concurrency,
            document_timeout: Duration::from_secs(config.ingest.document_timeout_secs),
            clone_timeout: Duration::from_secs(config.repository.clone_timeout_secs),
            workspace_root: config.repository.workspace_root.clone(),
            exclude_globs: config.repository.exclude_globs.clone(),
            max_document_bytes: config.ingest.max_document_bytes,
        }
    }
}

/// A file found while walking a workspace, or the reason it could not be
/// visited.
enum WalkEntry {
    File { relative: String, path: PathBuf },
    Unreadable { relative: String, error: anyhow::Error },
}

pub struct Ingestor {
    writer: Arc<CorpusWriter>,
    fetcher: Arc<dyn RepositoryFetcher>,
    options: IngestOptions,
    excludes: GlobSet,
}

impl Ingestor {
    pub fn new(
        writer: CorpusWriter,
        fetcher: Arc<dyn RepositoryFetcher>,
        options: IngestOptions,
    ) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(options.exclude_globs.iter().cloned());
        let excludes = build_globset(&patterns)?;
        Ok(Self {
            writer: Arc::new(writer),
            fetcher,
            options,
            excludes,
        })
    }

    /// Ingest uploaded documents under `tag`.
    #[tracing::instrument(skip_all, fields(tag = %tag, documents = documents.len()))]
    pub async fn ingest_batch(&self, tag: &Tag, documents: Vec<Document>) -> BatchReport {
        let outcomes: Vec<DocumentOutcome> = stream::iter(documents)
            .map(|document| self.ingest_one(document, tag))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport {
            tag: tag.clone(),
            outcomes,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "upload batch finished"
        );
        report
    }

    /// Clone `url` into a fresh workspace and ingest every regular file.
    ///
    /// The tag is `tag_override` or the repository name derived from the URL.
    #[tracing::instrument(skip(self, url, credentials, tag_override), fields(url = %redact_url(url)))]
    pub async fn ingest_repository(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        tag_override: Option<Tag>,
    ) -> Result<BatchReport, RagError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RagError::Validation("repository URL must not be empty".into()));
        }
        let tag = tag_override.unwrap_or_else(|| Tag::from_repository_url(&redact_url(url)));

        let workspace =
            Workspace::acquire(&self.options.workspace_root).map_err(RagError::Infrastructure)?;
        tracing::info!(%tag, workspace = %workspace.path().display(), "cloning repository");

        let fetch = self.fetcher.fetch(url, credentials, workspace.path());
        match tokio::time::timeout(self.options.clone_timeout, fetch).await {
            Err(_) => return Err(RagError::Timeout(self.options.clone_timeout)),
            Ok(Err(e)) => return Err(RagError::Clone(e)),
            Ok(Ok(())) => {}
        }

        let entries = self.walk(workspace.path()).await?;
        tracing::info!(%tag, files = entries.len(), "ingesting repository files");

        let outcomes: Vec<DocumentOutcome> = stream::iter(entries)
            .map(|entry| self.ingest_entry(entry, &tag))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport { tag, outcomes };
        tracing::info!(
            tag = %report.tag,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "repository ingestion finished"
        );

        if let Err(e) = workspace.release() {
            tracing::warn!(error = %format!("{:#}", e), "workspace cleanup failed");
        }
        Ok(report)
    }

    async fn ingest_one(&self, document: Document, tag: &Tag) -> DocumentOutcome {
        let filename = document.filename.clone();
        let deadline = self.options.document_timeout;
        match tokio::time::timeout(deadline, self.writer.ingest(document, tag)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(%tag, file = %filename, "document timed out");
                DocumentOutcome::failed(filename, &RagError::Timeout(deadline))
            }
        }
    }

    async fn ingest_entry(&self, entry: WalkEntry, tag: &Tag) -> DocumentOutcome {
        let (relative, content) = match entry {
            WalkEntry::File { relative, path } => {
                let content = self.read_file(&path).await;
                (relative, content)
            }
            WalkEntry::Unreadable { relative, error } => {
                (relative, Err(RagError::Infrastructure(error)))
            }
        };
        match content {
            Ok(content) => self.ingest_one(Document::new(relative, content), tag).await,
            Err(err) => {
                tracing::warn!(%tag, file = %relative, error = %err, "file skipped");
                DocumentOutcome::failed(relative, &err)
            }
        }
    }

    /// Read a workspace file, refusing oversized ones before any byte is
    /// loaded.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, RagError> {
        let unreadable = |e: std::io::Error| {
            RagError::Infrastructure(anyhow!(e).context(format!("Failed to read {}", path.display())))
        };
        let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
        let limit = self.options.max_document_bytes;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > limit {
            return Err(RagError::Parse(ExtractError::TooLarge { size, limit }));
        }
        tokio::fs::read(path).await.map_err(unreadable)
    }

    /// List regular files under `root` on the blocking pool.
    async fn walk(&self, root: &Path) -> Result<Vec<WalkEntry>, RagError> {
        let root = root.to_path_buf();
        let excludes = self.excludes.clone();
        tokio::task::spawn_blocking(move || walk_files(&root, &excludes))
            .await
            .map_err(|e| RagError::Infrastructure(anyhow!(e).context("workspace walk panicked")))
    }
}

/// Regular files under `root`, sorted by path. Symlinks are not followed,
/// so a link is neither a file nor a directory here and is skipped.
fn walk_files(root: &Path, excludes: &GlobSet) -> Vec<WalkEntry> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != OsStr::new(".git"));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let relative = e
                    .path()
                    .map(|p| relative_name(root, p))
                    .unwrap_or_else(|| "<unknown>".to_string());
                entries.push(WalkEntry::Unreadable {
                    relative,
                    error: anyhow!(e),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_name(root, entry.path());
        if excludes.is_match(&relative) {
            continue;
        }
        entries.push(WalkEntry::File {
            relative,
            path: entry.into_path(),
        });
    }
    entries
}

/// Path of `path` relative to `root`, with `/` separators.
fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
