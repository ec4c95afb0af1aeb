//! Ordinal-aligned chunk metadata stored as JSON lines.

use super::IndexError;
use crate::processing::ChunkRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Metadata of the vector stored at `ordinal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// 0-based position in the vector store.
    pub ordinal: usize,
    /// Chunk id.
    pub id: String,
    /// Source document.
    pub source: String,
    /// 1-based page or slide number.
    pub page: u32,
    /// Leading characters of the chunk text.
    pub snippet: String,
    /// Full chunk text, used to assemble prompt context.
    pub text: String,
}

impl IndexEntry {
    /// Build the entry for `record` stored at `ordinal`.
    pub fn from_chunk(ordinal: usize, record: &ChunkRecord, snippet_chars: usize) -> Self {
        Self {
            ordinal,
            id: record.id.clone(),
            source: record.source.clone(),
            page: record.page,
            snippet: snippet(&record.text, snippet_chars),
            text: record.text.clone(),
        }
    }
}

/// First `chars` characters of `text`.
pub fn snippet(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

pub(crate) fn write_metadata(path: &Path, entries: &[IndexEntry]) -> Result<(), IndexError> {
    let io_error = |source: std::io::Error| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    for entry in entries {
        serde_json::to_writer(&mut writer, entry).map_err(|source| IndexError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_all(b"\n").map_err(io_error)?;
    }
    writer.flush().map_err(io_error)
}

pub(crate) fn read_metadata(path: &Path) -> Result<Vec<IndexEntry>, IndexError> {
    let io_error = |source: std::io::Error| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| IndexError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_counts_characters_not_bytes() {
        assert_eq!(snippet("日本の首都は東京です", 3), "日本の");
        assert_eq!(snippet("short", 150), "short");
    }

    #[test]
    fn entries_round_trip_through_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.jsonl");
        let record = ChunkRecord {
            id: "geo.pdf#p1#c1".into(),
            text: "Paris is the capital of France.".into(),
            source: "geo.pdf".into(),
            page: 1,
        };
        let entries = vec![IndexEntry::from_chunk(0, &record, 5)];
        write_metadata(&path, &entries).expect("write");

        let loaded = read_metadata(&path).expect("read");
        assert_eq!(loaded, entries);
        assert_eq!(loaded[0].snippet, "Paris");
        assert_eq!(loaded[0].text, record.text);
    }
}
