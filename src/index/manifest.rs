use super::IndexError;
use crate::embedding::EmbeddingSignature;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Version of the on-disk generation layout.
pub const FORMAT_VERSION: u32 = 1;

/// Description of one index generation, written last during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Generation layout version.
    pub format_version: u32,
    /// Generation directory name.
    pub generation: String,
    /// Embedding convention the vectors were produced with.
    pub embedding: EmbeddingSignature,
    /// Number of vectors and metadata entries.
    pub vector_count: usize,
    /// SHA-256 of the chunk-record file the generation was built from.
    pub chunks_sha256: String,
    /// Build completion time (RFC 3339, UTC).
    pub built_at: String,
}

impl IndexManifest {
    pub(crate) fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_error = |source: std::io::Error| IndexError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| IndexError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_all(b"\n").map_err(io_error)?;
        writer.flush().map_err(io_error)
    }

    pub(crate) fn load(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| IndexError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}
