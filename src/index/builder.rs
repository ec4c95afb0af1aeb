//! Index building: chunk records in, a new active generation out.
//!
//! Chunk texts are embedded in fixed-size batches. Up to `concurrency` batches are in flight at
//! once, but the stream is `buffered` (not `buffer_unordered`), so vectors come back in chunk
//! order and ordinal `i` is always chunk record `i`.

use super::layout::IndexLayout;
use super::manifest::{FORMAT_VERSION, IndexManifest};
use super::metadata::{IndexEntry, write_metadata};
use super::store::FlatL2Store;
use super::IndexError;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::processing::ChunkRecord;
use futures_util::{StreamExt, stream};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Number of generations kept on disk after a successful build.
pub const RETAINED_GENERATIONS: usize = 2;

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Id of the generation that is now active.
    pub generation: String,
    /// Number of vectors written.
    pub vectors: usize,
    /// Directory holding the new generation.
    pub directory: PathBuf,
    /// Older generations deleted after activation.
    pub pruned: Vec<String>,
}

/// Embeds chunk records and persists them as an index generation.
pub struct IndexBuilder {
    embedder: Embedder,
    batch_size: usize,
    concurrency: usize,
    snippet_chars: usize,
}

impl IndexBuilder {
    /// Create a builder with explicit batching parameters.
    pub fn new(
        embedder: Embedder,
        batch_size: usize,
        concurrency: usize,
        snippet_chars: usize,
    ) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            snippet_chars,
        }
    }

    /// Create a builder using the batching parameters from configuration.
    pub fn from_config(config: &Config, embedder: Embedder) -> Self {
        Self::new(
            embedder,
            config.embedding_batch_size,
            config.embedding_concurrency,
            config.snippet_chars,
        )
    }

    /// Build a generation from the chunk-record file at `chunks_path` and activate it.
    pub async fn build(
        &self,
        chunks_path: &Path,
        index_dir: &Path,
    ) -> Result<BuildReport, IndexError> {
        let (records, digest) = read_chunk_records(chunks_path)?;
        self.build_from_records(&records, digest, index_dir).await
    }

    /// Build a generation from in-memory records and activate it.
    pub async fn build_from_records(
        &self,
        records: &[ChunkRecord],
        chunks_sha256: String,
        index_dir: &Path,
    ) -> Result<BuildReport, IndexError> {
        if records.is_empty() {
            tracing::warn!("No chunk records to index; building an empty generation");
        }
        tracing::info!(
            chunks = records.len(),
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            embedding = %self.embedder.signature(),
            "Building index"
        );

        let (store, entries) = self.embed_records(records).await?;

        let layout = IndexLayout::new(index_dir);
        let generation = new_generation_id();
        let directory = layout.generation_dir(&generation);
        fs::create_dir_all(&directory).map_err(|source| IndexError::Io {
            path: directory.clone(),
            source,
        })?;

        store.save(&layout.vectors_path(&generation))?;
        write_metadata(&layout.metadata_path(&generation), &entries)?;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            generation: generation.clone(),
            embedding: self.embedder.signature().clone(),
            vector_count: store.len(),
            chunks_sha256,
            built_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        manifest.save(&layout.manifest_path(&generation))?;

        layout.activate(&generation)?;
        let pruned = layout.prune(RETAINED_GENERATIONS)?;
        tracing::info!(
            generation = %generation,
            vectors = store.len(),
            pruned = pruned.len(),
            "Index generation activated"
        );

        Ok(BuildReport {
            generation,
            vectors: store.len(),
            directory,
            pruned,
        })
    }

    async fn embed_records(
        &self,
        records: &[ChunkRecord],
    ) -> Result<(FlatL2Store, Vec<IndexEntry>), IndexError> {
        let mut store = FlatL2Store::new(self.embedder.dimension());
        let mut entries = Vec::with_capacity(records.len());

        let embedder = &self.embedder;
        let mut embedded = stream::iter(records.chunks(self.batch_size).map(|batch| {
            let texts: Vec<String> = batch.iter().map(|record| record.text.clone()).collect();
            async move { (batch, embedder.embed_batch(texts).await) }
        }))
        .buffered(self.concurrency);

        while let Some((batch, vectors)) = embedded.next().await {
            let vectors = vectors?;
            for (record, vector) in batch.iter().zip(vectors) {
                let ordinal = store.add(&record.id, &vector)?;
                entries.push(IndexEntry::from_chunk(ordinal, record, self.snippet_chars));
            }
            tracing::debug!(embedded = store.len(), total = records.len(), "Embedded batch");
        }

        Ok((store, entries))
    }
}

/// Read and validate a chunk-record file, returning the records and the file's SHA-256.
pub fn read_chunk_records(path: &Path) -> Result<(Vec<ChunkRecord>, String), IndexError> {
    let bytes = fs::read(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));
    let text = String::from_utf8_lossy(&bytes);

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord =
            serde_json::from_str(line).map_err(|error| IndexError::InvalidChunk {
                line: line_number,
                reason: error.to_string(),
            })?;
        if record.id.trim().is_empty() {
            return Err(IndexError::InvalidChunk {
                line: line_number,
                reason: "empty chunk id".to_string(),
            });
        }
        if record.page == 0 {
            return Err(IndexError::InvalidChunk {
                line: line_number,
                reason: format!("chunk '{}' has page 0", record.id),
            });
        }
        if !seen.insert(record.id.clone()) {
            return Err(IndexError::DuplicateChunkId(record.id));
        }
        records.push(record);
    }

    tracing::debug!(path = %path.display(), records = records.len(), "Chunk records read");
    Ok((records, digest))
}

fn new_generation_id() -> String {
    let now = OffsetDateTime::now_utc();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}{:03}Z-{}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond(),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, EmbeddingClientError, EmbeddingSignature};
    use crate::index::LoadedIndex;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Embeds `"<n> ..."` as `[n, 0]`; later batches finish first to exercise ordering.
    struct LeadingNumber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for LeadingNumber {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30_u64.saturating_sub(call as u64 * 10))).await;
            Ok(texts
                .iter()
                .map(|text| {
                    let value: f32 = text
                        .split_whitespace()
                        .next()
                        .and_then(|word| word.parse().ok())
                        .unwrap_or(-1.0);
                    vec![value, 0.0]
                })
                .collect())
        }
    }

    fn signature() -> EmbeddingSignature {
        EmbeddingSignature {
            provider: "hash".into(),
            model: "leading-number".into(),
            dimension: 2,
            normalized: false,
        }
    }

    fn builder(batch_size: usize, concurrency: usize) -> IndexBuilder {
        let embedder = Embedder::new(
            Arc::new(LeadingNumber {
                calls: AtomicUsize::new(0),
            }),
            signature(),
        );
        IndexBuilder::new(embedder, batch_size, concurrency, 150)
    }

    fn records(count: usize) -> Vec<ChunkRecord> {
        (0..count)
            .map(|n| ChunkRecord {
                id: ChunkRecord::make_id("course.pdf", 1, n + 1),
                text: format!("{n} lecture notes"),
                source: "course.pdf".into(),
                page: 1,
            })
            .collect()
    }

    fn write_records(path: &Path, records: &[ChunkRecord]) {
        let lines: Vec<String> = records
            .iter()
            .map(|record| serde_json::to_string(record).expect("json"))
            .collect();
        fs::write(path, lines.join("\n") + "\n").expect("chunks");
    }

    #[tokio::test]
    async fn concurrent_batches_keep_chunk_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = dir.path().join("chunks.jsonl");
        write_records(&chunks, &records(7));

        let report = builder(2, 4)
            .build(&chunks, &dir.path().join("index"))
            .await
            .expect("build");
        assert_eq!(report.vectors, 7);

        let index = LoadedIndex::load(&dir.path().join("index"), &signature()).expect("load");
        assert_eq!(index.len(), index.entries().len());
        for (ordinal, entry) in index.entries().iter().enumerate() {
            assert_eq!(entry.ordinal, ordinal);
            assert_eq!(entry.id, format!("course.pdf#p1#c{}", ordinal + 1));
        }
        let nearest = index.search(&[4.0, 0.0], 1).expect("search");
        assert_eq!(nearest[0].id, "course.pdf#p1#c5");
        assert_eq!(index.manifest().chunks_sha256.len(), 64);
    }

    #[tokio::test]
    async fn rebuild_activates_new_generation_and_prunes_old_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index_dir = dir.path().join("index");
        let builder = builder(4, 1);
        let records = records(3);

        let mut generations = Vec::new();
        for _ in 0..3 {
            let report = builder
                .build_from_records(&records, "digest".into(), &index_dir)
                .await
                .expect("build");
            generations.push(report.generation);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let layout = IndexLayout::new(&index_dir);
        assert_eq!(layout.active_generation().expect("active"), generations[2]);
        assert!(!layout.generation_dir(&generations[0]).exists());
        assert!(layout.generation_dir(&generations[1]).exists());
    }

    #[tokio::test]
    async fn empty_input_builds_a_valid_empty_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = dir.path().join("chunks.jsonl");
        fs::write(&chunks, "").expect("chunks");

        let report = builder(8, 2)
            .build(&chunks, &dir.path().join("index"))
            .await
            .expect("build");
        assert_eq!(report.vectors, 0);
        let index = LoadedIndex::load(&dir.path().join("index"), &signature()).expect("load");
        assert!(index.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids_and_page_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.jsonl");

        let mut duplicated = records(2);
        duplicated[1].id = duplicated[0].id.clone();
        write_records(&path, &duplicated);
        assert!(matches!(
            read_chunk_records(&path).unwrap_err(),
            IndexError::DuplicateChunkId(id) if id == "course.pdf#p1#c1"
        ));

        let mut zero_page = records(1);
        zero_page[0].page = 0;
        write_records(&path, &zero_page);
        assert!(matches!(
            read_chunk_records(&path).unwrap_err(),
            IndexError::InvalidChunk { line: 1, .. }
        ));

        fs::write(&path, "{\"id\": \"x\"}\n").expect("malformed");
        assert!(matches!(
            read_chunk_records(&path).unwrap_err(),
            IndexError::InvalidChunk { line: 1, .. }
        ));
    }
}
