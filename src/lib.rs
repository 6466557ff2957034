//! # tagrag
//!
//! Tag-scoped document ingestion and retrieval-augmented chat.
//!
//! Documents arrive either as uploads or as the files of a cloned Git
//! repository. Each one is parsed to text, split into chunks, embedded and
//! written to the vector store under a tag. Queries retrieve the closest
//! chunks within one tag and hand them to a chat model as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌──────────────┐
//! │ Upload files │──▶│     CorpusWriter      │──▶│    SQLite     │
//! │ Git clone    │   │ parse→chunk→embed→put │   │ records+tags  │
//! └──────────────┘   └───────────────────────┘   └──────┬───────┘
//!                                                       │
//!                              ┌────────────────────────┘
//!                              ▼
//!                       ┌─────────────┐      ┌────────────┐
//!                       │ QueryEngine │─────▶│ Chat model │
//!                       └─────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`service`] | Transport-independent operation surface |
//! | [`ingest`] | Upload and repository ingestion flows |
//! | [`corpus`] | Per-document parse, chunk, embed and store |
//! | [`extract`] | Text extraction for PDF and Office formats |
//! | [`fetch`] | Repository cloning |
//! | [`workspace`] | Per-run scratch directories |
//! | [`rag`] | Retrieval and prompt assembly |
//! | [`chat`] | Chat model providers and response streams |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite vector store and tag registry |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Operation error taxonomy |

pub mod chat;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod migrate;
pub mod rag;
pub mod service;
pub mod sqlite_store;
pub mod workspace;
