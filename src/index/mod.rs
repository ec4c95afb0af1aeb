//! Persisted nearest-neighbour index.
//!
//! A build writes three artifacts into a fresh generation directory: the flat L2 vector store,
//! the ordinal-aligned metadata, and a manifest describing both. Activation is a single atomic
//! rename of the `CURRENT` pointer. Loading checks that the three artifacts agree with each
//! other and with the configured embedder before anything is served.

mod builder;
mod layout;
mod loaded;
mod manifest;
mod metadata;
mod store;

pub use builder::{BuildReport, IndexBuilder, RETAINED_GENERATIONS, read_chunk_records};
pub use layout::IndexLayout;
pub use loaded::{LoadedIndex, SearchResult};
pub use manifest::{FORMAT_VERSION, IndexManifest};
pub use metadata::{IndexEntry, snippet};
pub use store::FlatL2Store;

use crate::embedding::{EmbeddingClientError, EmbeddingSignature};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or loading an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A JSON artifact could not be read or written.
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        /// Artifact path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A chunk record is malformed.
    #[error("Invalid chunk record on line {line}: {reason}")]
    InvalidChunk {
        /// 1-based line number in the chunk-record file.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// Two chunk records share an id.
    #[error("Duplicate chunk id: {0}")]
    DuplicateChunkId(String),
    /// Embedding a batch failed; the build is abandoned before anything is activated.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// No `CURRENT` pointer exists yet.
    #[error("No active index generation under {0}; run build-index first")]
    NoActiveGeneration(PathBuf),
    /// The background task loading a generation did not complete.
    #[error("Index load task failed: {0}")]
    LoadTask(String),
    /// An artifact is structurally invalid.
    #[error("Corrupt index artifact {path}: {reason}")]
    Corrupt {
        /// Artifact path.
        path: PathBuf,
        /// What failed to parse.
        reason: String,
    },
    /// The manifest was written by an incompatible version.
    #[error("Unsupported index format version {0}")]
    UnsupportedFormat(u32),
    /// Vector count, metadata length, and manifest count disagree.
    #[error(
        "Index is out of sync: {vectors} vectors, {metadata} metadata entries, manifest says {manifest}"
    )]
    CountMismatch {
        /// Vectors in the store.
        vectors: usize,
        /// Lines in the metadata file.
        metadata: usize,
        /// Count recorded in the manifest.
        manifest: usize,
    },
    /// The metadata at an ordinal does not describe the vector stored there.
    #[error(
        "Index is out of sync at ordinal {ordinal}: vector belongs to '{vector_id}', metadata describes '{metadata_id}'"
    )]
    OrdinalMismatch {
        /// Offending ordinal.
        ordinal: usize,
        /// Chunk id stored with the vector.
        vector_id: String,
        /// Chunk id stored in the metadata.
        metadata_id: String,
    },
    /// The index was built with a different embedding convention.
    #[error("Index was built with {index}, but the configured embedder is {configured}")]
    SignatureMismatch {
        /// Signature recorded in the manifest.
        index: EmbeddingSignature,
        /// Signature of the configured embedder.
        configured: EmbeddingSignature,
    },
    /// A vector does not have the expected number of components.
    #[error("Vector dimension mismatch: expected {expected}, received {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}
