//! # tagrag core
//!
//! Runtime-agnostic logic for tagrag: data models, chunking, the tag
//! registry and vector store abstractions, the embedder trait and RAG
//! prompt assembly.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem dependencies.
//! Concrete backends and the ingestion flows live in the `tagrag` crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod store;
pub mod tags;
