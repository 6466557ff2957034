//! # tagrag CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tagrag init` | Create the SQLite database and run schema migrations |
//! | `tagrag tags` | List registered tags in registration order |
//! | `tagrag upload --tag <tag> <files>...` | Ingest local files under a tag |
//! | `tagrag repo <url>` | Clone a repository and ingest every file |
//! | `tagrag ask --model <m> [--provider <p>] [--tag <tag>] "<message>"` | Chat, optionally grounded in a tag |
//!
//! Ingestion commands print a JSON report with one outcome per file.
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tagrag::chat;
use tagrag::config;
use tagrag::fetch::Credentials;
use tagrag::migrate;
use tagrag::service::RagService;
use tagrag_core::models::Document;
use tracing_subscriber::EnvFilter;

/// Tag-scoped document ingestion and retrieval-augmented chat.
#[derive(Parser)]
#[command(name = "tagrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tagrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List registered tags, oldest first.
    Tags,

    /// Ingest local files under a tag.
    ///
    /// Each file is stored under its base name. Failures are reported per
    /// file and do not stop the others.
    Upload {
        /// Tag to file the documents under.
        #[arg(long)]
        tag: String,

        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Clone a Git repository and ingest its files.
    Repo {
        /// Repository URL (https or ssh).
        url: String,

        /// Username for HTTPS authentication. Defaults to `git` when only a
        /// token is given.
        #[arg(long)]
        username: Option<String>,

        /// Access token for HTTPS authentication.
        #[arg(long, env = "TAGRAG_GIT_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Tag override. Defaults to the repository name.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Ask a chat model, optionally with context retrieved from a tag.
    Ask {
        /// Chat model name as known to the provider. A `provider:` prefix
        /// (`ollama:` or `openai:`) picks the provider for this request.
        #[arg(long)]
        model: String,

        /// Chat provider for this request, overriding `[chat] provider`.
        #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(chat::CHAT_PROVIDERS.iter().copied()))]
        provider: Option<String>,

        /// Retrieve context from this tag before answering.
        #[arg(long)]
        tag: Option<String>,

        /// Print the whole answer at once instead of streaming fragments.
        #[arg(long)]
        no_stream: bool,

        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let service = RagService::from_config(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Tags => {
            for tag in service.list_tags().await? {
                println!("{}", tag);
            }
        }
        Commands::Upload { tag, files } => {
            let mut documents = Vec::with_capacity(files.len());
            for path in &files {
                documents.push(read_document(path).await?);
            }
            let report = service.upload_ingest(&tag, documents).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Repo {
            url,
            username,
            token,
            tag,
        } => {
            let credentials = token.map(|t| Credentials::new(username.unwrap_or_default(), t));
            let report = service
                .repository_ingest(&url, credentials, tag.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ask {
            model,
            provider,
            tag,
            no_stream,
            message,
        } => {
            let model = match provider {
                Some(provider) => format!("{}:{}", provider, model),
                None => model,
            };
            let mut stream = match (&tag, no_stream) {
                (None, true) => {
                    println!("{}", service.answer(&model, &message).await?);
                    return Ok(());
                }
                (None, false) => service.answer_stream(&model, &message).await?,
                (Some(tag), _) => service.answer_with_rag(&model, tag, &message).await?,
            };

            if no_stream {
                println!("{}", stream.collect_text().await?);
                return Ok(());
            }

            let mut stdout = std::io::stdout();
            while let Some(fragment) = stream.next().await {
                stdout.write_all(fragment?.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }

    Ok(())
}

/// Read a local file as an upload, named by its base name.
async fn read_document(path: &Path) -> Result<Document> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Document::new(filename, content))
}
