use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic offline embedding client based on signed feature hashing.
///
/// Each lowercase alphanumeric term is hashed into one of `dimension` buckets. Texts sharing
/// vocabulary end up close together, which is enough for smoke runs and tests without a model
/// server.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for term in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|term| !term.is_empty())
        {
            let hash = fnv1a(&term.to_lowercase());
            let slot = usize::try_from(hash % dimension as u64).unwrap_or(0);
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            embedding[slot] += sign;
        }

        embedding
    }
}

fn fnv1a(term: &str) -> u64 {
    term.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::trace!(texts = texts.len(), dimension = self.dimension, "Hashing texts");
        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}
