//! Core data types and error definitions for the ingestion pipeline.

use crate::extraction::{DocumentFormat, ExtractionError, PageFailure};
use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while turning page text into token windows.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap would stall the window (stride of zero or less).
    #[error("overlap ({overlap}) must be smaller than max_tokens ({max_tokens})")]
    InvalidOverlap {
        /// Effective window size after clamping.
        max_tokens: usize,
        /// Requested overlap.
        overlap: usize,
    },
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model or tokenizer file we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
    /// Tokenizer rejected the input text.
    #[error("failed to tokenize text: {0}")]
    Encode(String),
    /// Tokenizer could not turn ids back into text.
    #[error("failed to decode token window: {0}")]
    Decode(String),
}

/// Errors that abort an ingestion run as a whole.
///
/// Per-file and per-page problems never surface here; they are recorded in [`FileReport`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// The chunking parameters are unusable.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// The raw document directory does not exist or is not a directory.
    #[error("Raw document directory not found: {0}")]
    MissingRawDir(PathBuf),
    /// Writing chunk records failed.
    #[error("Failed to write chunk records to {path}: {source}")]
    Output {
        /// Destination of the chunk records.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A chunk record could not be serialized.
    #[error("Failed to serialize chunk record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A persisted chunk: one token window of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `"<source>#p<page>#c<chunk-index>"`.
    pub id: String,
    /// Decoded window text.
    pub text: String,
    /// Document path relative to the raw directory, `/`-separated.
    pub source: String,
    /// 1-based page or slide number.
    pub page: u32,
}

impl ChunkRecord {
    /// Build the chunk identifier for a (source, page, chunk index) triple.
    pub fn make_id(source: &str, page: u32, chunk_index: usize) -> String {
        format!("{source}#p{page}#c{chunk_index}")
    }
}

/// How a single document fared during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// At least one page produced text.
    Extracted,
    /// Every page was empty even after OCR; the file contributes no chunks.
    NoText,
    /// The document could not be opened or parsed at all.
    Failed(String),
}

/// Per-document ingestion result.
#[derive(Debug, Clone)]
pub struct FileReport {
    /// Document path relative to the raw directory.
    pub source: String,
    /// Detected document format.
    pub format: DocumentFormat,
    /// Number of pages or slides seen.
    pub pages: usize,
    /// Chunk records produced for this document, in page/window order.
    pub chunks: Vec<ChunkRecord>,
    /// Pages that degraded to empty text.
    pub page_failures: Vec<PageFailure>,
    /// Overall outcome.
    pub status: FileStatus,
}

impl FileReport {
    pub(crate) fn failed(source: String, format: DocumentFormat, error: &ExtractionError) -> Self {
        Self {
            source,
            format,
            pages: 0,
            chunks: Vec::new(),
            page_failures: Vec::new(),
            status: FileStatus::Failed(error.to_string()),
        }
    }
}

/// Aggregate outcome of an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    /// Destination of the chunk records.
    pub output: PathBuf,
    /// Number of supported documents found.
    pub files: usize,
    /// Number of pages and slides processed.
    pub pages: usize,
    /// Number of chunk records written.
    pub chunks: usize,
    /// Window size actually used.
    pub max_tokens: usize,
    /// Requested window size when it had to be clamped to the model limit.
    pub clamped_from: Option<usize>,
    /// Overlap used between consecutive windows.
    pub overlap: usize,
    /// Per-document reports in source order (chunk lists are drained after writing).
    pub reports: Vec<FileReport>,
}

impl IngestSummary {
    /// Documents that yielded no text even after OCR.
    pub fn empty_files(&self) -> impl Iterator<Item = &FileReport> {
        self.reports
            .iter()
            .filter(|report| report.status == FileStatus::NoText)
    }

    /// Documents that could not be read.
    pub fn failed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.reports
            .iter()
            .filter(|report| matches!(report.status, FileStatus::Failed(_)))
    }

    /// Total number of pages that degraded to empty text.
    pub fn page_failures(&self) -> usize {
        self.reports
            .iter()
            .map(|report| report.page_failures.len())
            .sum()
    }
}
