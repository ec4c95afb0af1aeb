use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration shared by ingestion, index building, and query serving.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory scanned for raw documents.
    pub raw_dir: PathBuf,
    /// JSONL file receiving chunk records.
    pub chunks_path: PathBuf,
    /// Directory holding index generations and the `CURRENT` pointer.
    pub index_dir: PathBuf,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional base URL override for the embedding provider.
    pub embedding_url: Option<String>,
    /// Optional bearer token for the embedding provider.
    pub embedding_api_key: Option<String>,
    /// Whether vectors are L2-normalized before indexing and querying.
    pub embedding_normalize: bool,
    /// Number of chunk texts sent per embedding request.
    pub embedding_batch_size: usize,
    /// Number of embedding requests allowed in flight during a build.
    pub embedding_concurrency: usize,
    /// Model name used to pick a tokenizer for token windowing.
    pub tokenizer_model: String,
    /// Optional Hugging Face `tokenizer.json` overriding the BPE lookup.
    pub tokenizer_file: Option<PathBuf>,
    /// Optional override for the embedding model's maximum input length.
    pub model_max_tokens: Option<usize>,
    /// Requested window size in tokens.
    pub chunk_max_tokens: usize,
    /// Tokens shared by consecutive windows.
    pub chunk_overlap: usize,
    /// Number of characters kept as the metadata snippet.
    pub snippet_chars: usize,
    /// Whether blank PDF pages are rasterized and sent through OCR.
    pub ocr_enabled: bool,
    /// Tesseract language pack.
    pub ocr_language: String,
    /// Rasterization resolution used before OCR.
    pub ocr_dpi: u32,
    /// Chat-completions endpoint of the generation backend.
    pub generation_url: String,
    /// Model identifier sent to the generation backend.
    pub generation_model: String,
    /// Optional bearer token for the generation backend.
    pub generation_api_key: Option<String>,
    /// Sampling temperature forwarded to the generation backend.
    pub generation_temperature: f32,
    /// Maximum answer length requested from the generation backend.
    pub generation_max_tokens: u32,
    /// Upper bound on a single generation call.
    pub generation_timeout_secs: u64,
    /// Fixed system instruction sent with every question.
    pub system_prompt: String,
    /// Number of passages retrieved when a request omits `top_k`.
    pub query_default_top_k: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic offline feature-hashing embedder.
    Hash,
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible embeddings endpoint (OpenAI, LM Studio).
    OpenAI,
}

impl EmbeddingProvider {
    /// Stable lowercase name recorded in index manifests.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
        }
    }
}

const DEFAULT_GENERATION_URL: &str = "http://localhost:1234/v1/chat/completions";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable tutor.";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset so that `.env` templates with empty entries fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let embedding_model = vars.required("EMBEDDING_MODEL")?;
        let embedding_dimension: usize = vars.parse_required("EMBEDDING_DIMENSION")?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        Ok(Self {
            raw_dir: vars.optional("RAW_DIR").unwrap_or_else(|| "data/raw".into()).into(),
            chunks_path: vars
                .optional("CHUNKS_PATH")
                .unwrap_or_else(|| "data/processed/chunks.jsonl".into())
                .into(),
            index_dir: vars.optional("INDEX_DIR").unwrap_or_else(|| "index".into()).into(),
            embedding_provider: vars.required("EMBEDDING_PROVIDER")?.parse().map_err(|()| {
                ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string())
            })?,
            tokenizer_model: vars
                .optional("TOKENIZER_MODEL")
                .unwrap_or_else(|| embedding_model.clone()),
            embedding_model,
            embedding_dimension,
            embedding_url: vars.optional("EMBEDDING_URL"),
            embedding_api_key: vars.optional("EMBEDDING_API_KEY"),
            embedding_normalize: vars.parse_or("EMBEDDING_NORMALIZE", true)?,
            embedding_batch_size: vars.parse_or("EMBEDDING_BATCH_SIZE", 32_usize)?.max(1),
            embedding_concurrency: vars.parse_or("EMBEDDING_CONCURRENCY", 4_usize)?.max(1),
            tokenizer_file: vars.optional("TOKENIZER_FILE").map(PathBuf::from),
            model_max_tokens: vars.parse_optional("MODEL_MAX_TOKENS")?,
            chunk_max_tokens: vars.parse_or("CHUNK_MAX_TOKENS", 700)?,
            chunk_overlap: vars.parse_or("CHUNK_OVERLAP", 100)?,
            snippet_chars: vars.parse_or("SNIPPET_CHARS", 150)?,
            ocr_enabled: vars.parse_or("OCR_ENABLED", true)?,
            ocr_language: vars.optional("OCR_LANGUAGE").unwrap_or_else(|| "eng".into()),
            ocr_dpi: vars.parse_or("OCR_DPI", 300)?,
            generation_url: vars
                .optional("GENERATION_URL")
                .unwrap_or_else(|| DEFAULT_GENERATION_URL.into()),
            generation_model: vars
                .optional("GENERATION_MODEL")
                .unwrap_or_else(|| "local-llama".into()),
            generation_api_key: vars.optional("GENERATION_API_KEY"),
            generation_temperature: vars.parse_or("GENERATION_TEMPERATURE", 0.7)?,
            generation_max_tokens: vars.parse_or("GENERATION_MAX_TOKENS", 512)?,
            generation_timeout_secs: vars.parse_or("GENERATION_TIMEOUT_SECS", 60)?,
            system_prompt: vars
                .optional("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            query_default_top_k: vars.parse_or("QUERY_DEFAULT_TOP_K", 5_usize)?.max(1),
            server_port: vars.parse_optional("SERVER_PORT")?,
        })
    }

    /// Timeout applied to each generation backend call.
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs.max(1))
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn parse_required<T: std::str::FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        self.required(key)?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string()))
    }

    fn parse_optional<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Load `.env` (if present) and build the configuration from the process environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        raw_dir = %config.raw_dir.display(),
        index_dir = %config.index_dir.display(),
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
pub(crate) fn test_config(dimension: usize) -> Config {
    Config::from_lookup(|key| match key {
        "EMBEDDING_PROVIDER" => Some("hash".into()),
        "EMBEDDING_MODEL" => Some("test-model".into()),
        "EMBEDDING_DIMENSION" => Some(dimension.to_string()),
        _ => None,
    })
    .expect("test config")
}
