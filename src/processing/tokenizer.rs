//! Tokenizer adapters used for token windowing.
//!
//! Windowing needs a reversible tokenizer: ids in, text out. Two backends are supported:
//!
//! - A Hugging Face `tokenizer.json` (via `tokenizers`) when `TOKENIZER_FILE` is set. This
//!   matches the exact vocabulary of sentence-transformer style embedding models.
//! - Otherwise a `tiktoken-rs` BPE resolved from the model name, falling back to an encoding
//!   name and finally to `cl100k_base`.
//!
//! The module also owns the table of embedding-model input limits used to clamp window sizes.

use crate::config::{Config, EmbeddingProvider};
use anyhow::Error as TokenizerError;
use std::path::Path;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

use super::types::ChunkingError;

/// Reversible tokenizer capability required by the chunker.
pub trait TokenCodec: Send + Sync {
    /// Human-readable tokenizer name for logs.
    fn name(&self) -> &str;

    /// Convert text into token ids without adding special tokens or truncating.
    fn encode(&self, text: &str) -> Result<Vec<u32>, ChunkingError>;

    /// Convert token ids back into text.
    fn decode(&self, ids: &[u32]) -> Result<String, ChunkingError>;
}

/// Byte-pair encoder backed by `tiktoken-rs`.
pub struct TiktokenCodec {
    name: String,
    encoding: CoreBPE,
}

impl TiktokenCodec {
    /// Resolve an encoding for `model`, trying model names first and encoding names second.
    pub fn for_model(model: &str) -> Result<Self, ChunkingError> {
        let normalized = model.trim();
        let target = if normalized.is_empty() {
            "cl100k_base"
        } else {
            normalized
        };
        let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
            model: target.to_string(),
            source,
        })?;
        Ok(Self {
            name: format!("tiktoken:{target}"),
            encoding,
        })
    }
}

impl TokenCodec for TiktokenCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>, ChunkingError> {
        Ok(self.encoding.encode_ordinary(text))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ChunkingError> {
        self.encoding
            .decode(ids.to_vec())
            .map_err(|error| ChunkingError::Decode(error.to_string()))
    }
}

/// Tokenizer loaded from a Hugging Face `tokenizer.json`.
pub struct HuggingFaceCodec {
    name: String,
    tokenizer: tokenizers::Tokenizer,
}

impl HuggingFaceCodec {
    /// Load the tokenizer definition from disk.
    pub fn from_file(path: &Path) -> Result<Self, ChunkingError> {
        let load_error = |error: tokenizers::Error| ChunkingError::Tokenizer {
            model: path.display().to_string(),
            source: anyhow::anyhow!(error.to_string()),
        };
        let mut tokenizer = tokenizers::Tokenizer::from_file(path).map_err(load_error)?;
        // Pages are windowed by the chunker; the file's own truncation and padding must not apply.
        tokenizer.with_truncation(None).map_err(load_error)?;
        tokenizer.with_padding(None);
        Ok(Self {
            name: format!("huggingface:{}", path.display()),
            tokenizer,
        })
    }
}

impl TokenCodec for HuggingFaceCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>, ChunkingError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|error| ChunkingError::Encode(error.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ChunkingError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|error| ChunkingError::Decode(error.to_string()))
    }
}

/// Build the tokenizer selected by configuration.
pub fn build_codec(config: &Config) -> Result<Arc<dyn TokenCodec>, ChunkingError> {
    let codec: Arc<dyn TokenCodec> = match &config.tokenizer_file {
        Some(path) => Arc::new(HuggingFaceCodec::from_file(path)?),
        None => Arc::new(TiktokenCodec::for_model(&config.tokenizer_model)?),
    };
    tracing::debug!(tokenizer = codec.name(), "Tokenizer ready");
    Ok(codec)
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token windowing"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// Maximum input length, in tokens, accepted by the configured embedding model.
///
/// `MODEL_MAX_TOKENS` wins when set; otherwise the limit is looked up per provider.
pub fn model_input_limit(config: &Config) -> usize {
    config.model_max_tokens.map_or_else(
        || embedding_context_window(config.embedding_provider, &config.embedding_model),
        |limit| limit.max(1),
    )
}

/// Look up the embedding context window for a provider/model combination.
pub fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama => local_embedding_context_window(model),
        EmbeddingProvider::Hash => 8192,
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8192;
    }
    // LM Studio and other OpenAI-compatible servers host the same local models.
    let local = local_embedding_context_window(model);
    if local != DEFAULT_LOCAL_WINDOW {
        return local;
    }
    get_context_size(model)
}

const DEFAULT_LOCAL_WINDOW: usize = 4096;

fn local_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        value if value.starts_with("nomic-embed-text") => 8192,
        value if value.starts_with("mxbai-embed-large") => 512,
        value if value.contains("all-minilm") || value.contains("all-mpnet") => 512,
        value if value.contains("bge-") || value.contains("e5-small") || value.contains("e5-base") => {
            512
        }
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default embedding context window estimate");
            DEFAULT_LOCAL_WINDOW
        }
    }
}
