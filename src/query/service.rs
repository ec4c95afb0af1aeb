//! Query service holding the active index generation.

use super::prompt::{build_context, build_request};
use super::{Answer, Citation, QueryApi, QueryError, ReloadOutcome};
use crate::config::Config;
use crate::embedding::{Embedder, EmbeddingClientError};
use crate::generation::{ChatCompletionsClient, GenerationClient};
use crate::index::{IndexError, LoadedIndex, SearchResult};
use crate::metrics::{MetricsSnapshot, QueryMetrics};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Answers questions against a loaded index generation.
///
/// A service only exists in the loaded state: [`QueryService::load`] reads and validates the
/// active generation before returning. Queries work on an `Arc` snapshot of the index, so a
/// concurrent [`QueryService::reload`] never mixes two generations within one query. Share the
/// service through an `Arc`.
pub struct QueryService {
    index_dir: PathBuf,
    embedder: Embedder,
    generator: Arc<dyn GenerationClient>,
    system_prompt: String,
    default_top_k: usize,
    active: RwLock<Arc<LoadedIndex>>,
    metrics: QueryMetrics,
}

impl QueryService {
    /// Load the active generation under `index_dir` and build a service around it.
    pub fn load(
        index_dir: &Path,
        embedder: Embedder,
        generator: Arc<dyn GenerationClient>,
        system_prompt: impl Into<String>,
        default_top_k: usize,
    ) -> Result<Self, IndexError> {
        let index = LoadedIndex::load(index_dir, embedder.signature())?;
        Ok(Self {
            index_dir: index_dir.to_path_buf(),
            embedder,
            generator,
            system_prompt: system_prompt.into(),
            default_top_k: default_top_k.max(1),
            active: RwLock::new(Arc::new(index)),
            metrics: QueryMetrics::new(),
        })
    }

    /// Build the configured embedder and generation client, then load the index.
    pub fn from_config(config: &Config) -> Result<Self, QueryError> {
        let embedder = Embedder::from_config(config).map_err(QueryError::Embedding)?;
        let generator =
            ChatCompletionsClient::from_config(config).map_err(QueryError::GenerationSetup)?;
        Ok(Self::load(
            &config.index_dir,
            embedder,
            Arc::new(generator),
            config.system_prompt.clone(),
            config.query_default_top_k,
        )?)
    }

    /// Snapshot of the active generation.
    pub fn snapshot(&self) -> Arc<LoadedIndex> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of passages retrieved when the caller does not say.
    pub const fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Counters observed since the service was loaded.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Load the generation `CURRENT` points at and make it active.
    ///
    /// The new generation is read on the blocking pool and validated completely before the swap;
    /// on failure the previous generation keeps serving.
    pub async fn reload(&self) -> Result<ReloadOutcome, IndexError> {
        let index_dir = self.index_dir.clone();
        let signature = self.embedder.signature().clone();
        let loaded =
            tokio::task::spawn_blocking(move || LoadedIndex::load(&index_dir, &signature))
                .await
                .unwrap_or_else(|error| Err(IndexError::LoadTask(error.to_string())));
        let index = match loaded {
            Ok(index) => index,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    generation = %self.snapshot().generation(),
                    "Reload failed; keeping the active generation"
                );
                return Err(error);
            }
        };
        let outcome = ReloadOutcome {
            generation: index.generation().to_string(),
            vectors: index.len(),
        };
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        self.metrics.record_reload();
        tracing::info!(
            generation = %outcome.generation,
            vectors = outcome.vectors,
            "Index reloaded"
        );
        Ok(outcome)
    }

    /// Retrieve the `min(top_k, N)` passages closest to `question`.
    pub async fn search(&self, question: &str, top_k: i64) -> Result<Vec<SearchResult>, QueryError> {
        let top_k = validate(question, top_k)?;
        let index = self.snapshot();
        let results = self.retrieve(&index, question, top_k).await?;
        self.metrics.record_retrieval();
        Ok(results)
    }

    /// Retrieve context for `question` and ask the generation backend to answer it.
    pub async fn ask(&self, question: &str, top_k: i64) -> Result<Answer, QueryError> {
        let top_k = validate(question, top_k)?;
        let index = self.snapshot();
        let results = self.retrieve(&index, question, top_k).await?;
        self.metrics.record_retrieval();
        if results.is_empty() {
            return Err(QueryError::NoRelevantContext);
        }

        let context = build_context(&results);
        let request = build_request(&self.system_prompt, &context, question);
        let answer = match self.generator.generate(request).await {
            Ok(answer) => answer,
            Err(error) => {
                self.metrics.record_generation_failure();
                tracing::warn!(
                    error = %error,
                    passages = results.len(),
                    "Generation failed after successful retrieval"
                );
                return Err(QueryError::Generation(error));
            }
        };
        self.metrics.record_answer();

        Ok(Answer {
            answer,
            generation: index.generation().to_string(),
            sources: results.iter().map(Citation::from).collect(),
        })
    }

    async fn retrieve(
        &self,
        index: &LoadedIndex,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let vector = self
            .embedder
            .embed_one(question)
            .await
            .map_err(|error| match error {
                EmbeddingClientError::EmptyVector => QueryError::EmptyEmbedding,
                EmbeddingClientError::DimensionMismatch { expected, actual } => {
                    QueryError::DimensionMismatch { expected, actual }
                }
                other => QueryError::Embedding(other),
            })?;

        let results = index.search(&vector, top_k).map_err(|error| match error {
            IndexError::DimensionMismatch { expected, actual } => {
                QueryError::DimensionMismatch { expected, actual }
            }
            other => QueryError::Index(other),
        })?;
        tracing::debug!(
            generation = %index.generation(),
            requested = top_k,
            returned = results.len(),
            nearest = results.first().map(|result| result.distance),
            "Retrieved passages"
        );
        Ok(results)
    }
}

/// Reject blank questions and non-positive `top_k` before any embedding work.
fn validate(question: &str, top_k: i64) -> Result<usize, QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::InvalidQuestion);
    }
    if top_k <= 0 {
        return Err(QueryError::InvalidTopK(top_k));
    }
    Ok(usize::try_from(top_k).unwrap_or(usize::MAX))
}

#[async_trait]
impl QueryApi for QueryService {
    async fn ask(&self, question: &str, top_k: Option<i64>) -> Result<Answer, QueryError> {
        let top_k = top_k.unwrap_or(self.default_top_k as i64);
        QueryService::ask(self, question, top_k).await
    }

    async fn search(
        &self,
        question: &str,
        top_k: Option<i64>,
    ) -> Result<Vec<SearchResult>, QueryError> {
        let top_k = top_k.unwrap_or(self.default_top_k as i64);
        QueryService::search(self, question, top_k).await
    }

    async fn reload(&self) -> Result<ReloadOutcome, QueryError> {
        Ok(QueryService::reload(self).await?)
    }

    fn active_generation(&self) -> (String, usize) {
        let index = self.snapshot();
        (index.generation().to_string(), index.len())
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics()
    }
}
