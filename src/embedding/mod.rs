//! Embedding providers and the adapter shared by index building and querying.
//!
//! Providers only turn text into raw vectors. [`Embedder`] wraps whichever provider is
//! configured and enforces the conventions an index depends on: one vector per input, the
//! configured dimension, and optional L2 normalization. Build time and query time both go
//! through the same adapter, so stored vectors and question vectors are always comparable.

mod hash;
mod ollama;
mod openai;

pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or constructed.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider returned a different number of vectors than inputs.
    #[error("Expected {expected} embeddings, received {actual}")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Provider returned a vector of the wrong length.
    #[error("Embedding dimension mismatch: expected {expected}, received {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Length of the returned vector.
        actual: usize,
    },
    /// Provider returned a zero-length vector.
    #[error("Embedding provider returned an empty vector")]
    EmptyVector,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Identifies the embedding convention an index was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSignature {
    /// Provider name (`hash`, `ollama`, `openai`).
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Whether vectors are L2-normalized.
    pub normalized: bool,
}

impl EmbeddingSignature {
    /// Signature of the embedder described by configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider: config.embedding_provider.as_str().to_string(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            normalized: config.embedding_normalize,
        }
    }
}

impl fmt::Display for EmbeddingSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} dim={} normalized={}",
            self.provider, self.model, self.dimension, self.normalized
        )
    }
}

/// Provider adapter enforcing vector count, dimension, and normalization.
#[derive(Clone)]
pub struct Embedder {
    client: Arc<dyn EmbeddingClient>,
    signature: EmbeddingSignature,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Wrap a provider client.
    pub fn new(client: Arc<dyn EmbeddingClient>, signature: EmbeddingSignature) -> Self {
        Self { client, signature }
    }

    /// Build the configured provider and wrap it.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingClientError> {
        Ok(Self::new(
            build_embedding_client(config)?,
            EmbeddingSignature::from_config(config),
        ))
    }

    /// Embedding convention produced by this adapter.
    pub const fn signature(&self) -> &EmbeddingSignature {
        &self.signature
    }

    /// Configured vector dimension.
    pub const fn dimension(&self) -> usize {
        self.signature.dimension
    }

    /// Embed a batch of texts, returning vectors in input order.
    pub async fn embed_batch(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let mut vectors = self.client.generate_embeddings(texts).await?;
        if vectors.len() != expected {
            return Err(EmbeddingClientError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }

        for vector in &mut vectors {
            if vector.is_empty() {
                return Err(EmbeddingClientError::EmptyVector);
            }
            if vector.len() != self.signature.dimension {
                return Err(EmbeddingClientError::DimensionMismatch {
                    expected: self.signature.dimension,
                    actual: vector.len(),
                });
            }
            if self.signature.normalized {
                normalize(vector);
            }
        }

        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.embed_batch(vec![text.to_string()])
            .await?
            .pop()
            .ok_or(EmbeddingClientError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

/// Scale `vector` to unit L2 norm. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = config.embedding_provider.as_str(),
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.embedding_url.clone(),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.embedding_url.clone(),
            config.embedding_model.clone(),
            config.embedding_api_key.clone(),
        )?),
    };
    Ok(client)
}
