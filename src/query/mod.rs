//! Query orchestration: embed the question, retrieve passages, assemble a prompt, generate.

mod prompt;
mod service;

pub use prompt::{build_context, build_request};
pub use service::QueryService;

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationError;
use crate::index::{IndexError, SearchResult};
use crate::metrics::MetricsSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors returned to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The question is empty or whitespace.
    #[error("Question must not be empty")]
    InvalidQuestion,
    /// `top_k` is zero or negative.
    #[error("top_k must be at least 1 (got {0})")]
    InvalidTopK(i64),
    /// The embedding provider failed.
    #[error("Embedding failed: {0}")]
    Embedding(EmbeddingClientError),
    /// The embedding provider returned an empty vector.
    #[error("Embedding provider returned an empty vector")]
    EmptyEmbedding,
    /// The question vector does not match the index dimension.
    #[error("Question embedding has dimension {actual}, index expects {expected}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Question vector length.
        actual: usize,
    },
    /// The index holds no passages.
    #[error("No relevant context found")]
    NoRelevantContext,
    /// Retrieval succeeded but the generation backend failed.
    #[error("Generation failed after successful retrieval: {0}")]
    Generation(GenerationError),
    /// The generation client could not be constructed at startup.
    #[error("Failed to initialize the generation client: {0}")]
    GenerationSetup(GenerationError),
    /// The index could not be loaded or searched.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Provenance of one passage used to answer a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Chunk id.
    pub id: String,
    /// Source document.
    pub source: String,
    /// 1-based page or slide number.
    pub page: u32,
    /// Euclidean distance to the question.
    pub distance: f32,
}

impl From<&SearchResult> for Citation {
    fn from(result: &SearchResult) -> Self {
        Self {
            id: result.id.clone(),
            source: result.source.clone(),
            page: result.page,
            distance: result.distance,
        }
    }
}

/// Generated answer with the passages it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Generated text.
    pub answer: String,
    /// Index generation that served the retrieval.
    pub generation: String,
    /// Retrieved passages, best match first.
    pub sources: Vec<Citation>,
}

/// Result of swapping in a new index generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    /// Generation now serving queries.
    pub generation: String,
    /// Number of vectors in it.
    pub vectors: usize,
}

/// Abstraction over the query service used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Answer a question; `None` uses the configured default `top_k`.
    async fn ask(&self, question: &str, top_k: Option<i64>) -> Result<Answer, QueryError>;

    /// Retrieve passages without generation.
    async fn search(
        &self,
        question: &str,
        top_k: Option<i64>,
    ) -> Result<Vec<SearchResult>, QueryError>;

    /// Swap in the generation `CURRENT` points at.
    async fn reload(&self) -> Result<ReloadOutcome, QueryError>;

    /// Id and size of the generation currently serving.
    fn active_generation(&self) -> (String, usize);

    /// Query counters for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}
