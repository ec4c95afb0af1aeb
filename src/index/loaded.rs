//! A fully validated, read-only index generation.

use super::layout::IndexLayout;
use super::manifest::{FORMAT_VERSION, IndexManifest};
use super::metadata::{IndexEntry, read_metadata};
use super::store::FlatL2Store;
use super::IndexError;
use crate::embedding::EmbeddingSignature;
use serde::Serialize;
use std::path::Path;

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 1-based rank; 1 is the closest match.
    pub rank: usize,
    /// Position in the vector store.
    pub ordinal: usize,
    /// Chunk id.
    pub id: String,
    /// Euclidean distance between the question and chunk vectors.
    pub distance: f32,
    /// Source document.
    pub source: String,
    /// 1-based page or slide number.
    pub page: u32,
    /// Leading characters of the chunk text.
    pub snippet: String,
    /// Full chunk text.
    #[serde(skip)]
    pub text: String,
}

/// Vector store, metadata, and manifest of one generation, checked against each other.
#[derive(Debug)]
pub struct LoadedIndex {
    manifest: IndexManifest,
    store: FlatL2Store,
    entries: Vec<IndexEntry>,
}

impl LoadedIndex {
    /// Load the generation `CURRENT` points at.
    pub fn load(index_dir: &Path, expected: &EmbeddingSignature) -> Result<Self, IndexError> {
        let layout = IndexLayout::new(index_dir);
        let generation = layout.active_generation()?;
        Self::load_generation(&layout, &generation, expected)
    }

    /// Load a specific generation.
    pub fn load_generation(
        layout: &IndexLayout,
        generation: &str,
        expected: &EmbeddingSignature,
    ) -> Result<Self, IndexError> {
        let manifest = IndexManifest::load(&layout.manifest_path(generation))?;
        let store = FlatL2Store::load(&layout.vectors_path(generation))?;
        let entries = read_metadata(&layout.metadata_path(generation))?;
        let index = Self::from_parts(manifest, store, entries, expected)?;
        tracing::info!(
            generation = %index.generation(),
            vectors = index.len(),
            embedding = %index.manifest.embedding,
            "Index generation loaded"
        );
        Ok(index)
    }

    /// Assemble an index from its parts, rejecting any inconsistency between them.
    pub fn from_parts(
        manifest: IndexManifest,
        store: FlatL2Store,
        entries: Vec<IndexEntry>,
        expected: &EmbeddingSignature,
    ) -> Result<Self, IndexError> {
        if manifest.format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedFormat(manifest.format_version));
        }
        if &manifest.embedding != expected {
            return Err(IndexError::SignatureMismatch {
                index: manifest.embedding,
                configured: expected.clone(),
            });
        }
        if store.dimension() != manifest.embedding.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: manifest.embedding.dimension,
                actual: store.dimension(),
            });
        }
        if store.len() != entries.len() || store.len() != manifest.vector_count {
            return Err(IndexError::CountMismatch {
                vectors: store.len(),
                metadata: entries.len(),
                manifest: manifest.vector_count,
            });
        }
        for (position, entry) in entries.iter().enumerate() {
            let stored_id = store.id(position).unwrap_or_default();
            if entry.ordinal != position || entry.id != stored_id {
                return Err(IndexError::OrdinalMismatch {
                    ordinal: position,
                    vector_id: stored_id.to_string(),
                    metadata_id: entry.id.clone(),
                });
            }
        }

        if store.is_empty() {
            tracing::warn!(generation = %manifest.generation, "Loaded index is empty");
        }
        Ok(Self {
            manifest,
            store,
            entries,
        })
    }

    /// Generation id.
    pub fn generation(&self) -> &str {
        &self.manifest.generation
    }

    /// Manifest of this generation.
    pub const fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no chunk is indexed.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Vector dimension.
    pub const fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Metadata in ordinal order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The `min(top_k, len)` passages closest to `query`.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let hits = self.store.search(query, top_k)?;
        Ok(hits
            .into_iter()
            .enumerate()
            .filter_map(|(position, (ordinal, distance))| {
                self.entries.get(ordinal).map(|entry| SearchResult {
                    rank: position + 1,
                    ordinal,
                    id: entry.id.clone(),
                    distance,
                    source: entry.source.clone(),
                    page: entry.page,
                    snippet: entry.snippet.clone(),
                    text: entry.text.clone(),
                })
            })
            .collect())
    }
}
