#![deny(missing_docs)]

//! Core library for notesrag: ingest lecture notes, build a vector index, answer questions.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Page text extraction from PDFs and slide decks.
pub mod extraction;
/// Chat-completions client for answer generation.
pub mod generation;
/// Index generations: building, persistence, loading and search.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Query counters.
pub mod metrics;
/// Ingestion pipeline: discovery, chunking, chunk records.
pub mod processing;
/// Question answering over the active index generation.
pub mod query;
