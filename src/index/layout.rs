//! Directory layout of an index and the atomic `CURRENT` pointer.
//!
//! ```text
//! <index_dir>/CURRENT                         active generation id
//! <index_dir>/generations/<id>/vectors.bin
//! <index_dir>/generations/<id>/metadata.jsonl
//! <index_dir>/generations/<id>/manifest.json
//! ```

use super::IndexError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const POINTER_FILE: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.jsonl";
const MANIFEST_FILE: &str = "manifest.json";

/// Paths of an index directory.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Index root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all generations.
    pub fn generations_dir(&self) -> PathBuf {
        self.root.join(GENERATIONS_DIR)
    }

    /// Directory of one generation.
    pub fn generation_dir(&self, generation: &str) -> PathBuf {
        self.generations_dir().join(generation)
    }

    /// Vector file of one generation.
    pub fn vectors_path(&self, generation: &str) -> PathBuf {
        self.generation_dir(generation).join(VECTORS_FILE)
    }

    /// Metadata file of one generation.
    pub fn metadata_path(&self, generation: &str) -> PathBuf {
        self.generation_dir(generation).join(METADATA_FILE)
    }

    /// Manifest of one generation.
    pub fn manifest_path(&self, generation: &str) -> PathBuf {
        self.generation_dir(generation).join(MANIFEST_FILE)
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_FILE)
    }

    /// Id of the generation `CURRENT` points at.
    pub fn active_generation(&self) -> Result<String, IndexError> {
        let path = self.pointer_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(IndexError::NoActiveGeneration(self.root.clone()));
            }
            Err(source) => return Err(IndexError::Io { path, source }),
        };
        let generation = contents.trim();
        if generation.is_empty() || generation.contains(['/', '\\']) || generation == ".." {
            return Err(IndexError::Corrupt {
                path,
                reason: format!("invalid generation pointer '{generation}'"),
            });
        }
        Ok(generation.to_string())
    }

    /// Point `CURRENT` at `generation` with a write-then-rename.
    pub fn activate(&self, generation: &str) -> Result<(), IndexError> {
        let path = self.pointer_path();
        let io_error = |source: io::Error| IndexError::Io {
            path: path.clone(),
            source,
        };
        let mut staging = tempfile::NamedTempFile::new_in(&self.root).map_err(io_error)?;
        writeln!(staging, "{generation}").map_err(io_error)?;
        staging.as_file().sync_all().map_err(io_error)?;
        staging
            .persist(&path)
            .map_err(|error| io_error(error.error))?;
        Ok(())
    }

    /// Delete all but the `keep` newest generations, never touching the active one.
    ///
    /// Generation ids start with a UTC timestamp, so lexical order is build order.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, IndexError> {
        let dir = self.generations_dir();
        let active = self.active_generation().ok();
        let mut generations: Vec<String> = fs::read_dir(&dir)
            .map_err(|source| IndexError::Io {
                path: dir.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        generations.sort();

        let excess = generations.len().saturating_sub(keep);
        let mut removed = Vec::new();
        for generation in generations.into_iter().take(excess) {
            if active.as_deref() == Some(generation.as_str()) {
                continue;
            }
            let path = self.generation_dir(&generation);
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::debug!(generation = %generation, "Pruned index generation");
                    removed.push(generation);
                }
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to prune index generation"
                    );
                }
            }
        }
        Ok(removed)
    }
}
