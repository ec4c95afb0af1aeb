//! Batch ingestion: raw documents in, chunk records out.
//!
//! Documents are discovered with `walkdir`, extracted and chunked in parallel on the rayon pool,
//! and written in sorted source order so that identical inputs always produce an identical
//! JSONL file. The file is written to a temporary sibling and renamed into place.

use crate::config::Config;
use crate::extraction::{DocumentFormat, Extractor, RawDocument};
use rayon::prelude::*;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::chunking::{ChunkingPlan, chunk_page};
use super::tokenizer::{TokenCodec, build_codec, model_input_limit};
use super::types::{ChunkRecord, FileReport, FileStatus, IngestError, IngestSummary};

/// Runs extraction and chunking over a directory of raw documents.
pub struct Ingestor {
    extractor: Extractor,
    codec: Arc<dyn TokenCodec>,
    plan: ChunkingPlan,
}

impl Ingestor {
    /// Assemble an ingestor from explicit parts.
    pub fn new(extractor: Extractor, codec: Arc<dyn TokenCodec>, plan: ChunkingPlan) -> Self {
        Self {
            extractor,
            codec,
            plan,
        }
    }

    /// Build the ingestor described by configuration.
    ///
    /// The chunking plan is validated here, before any document is read.
    pub fn from_config(config: &Config) -> Result<Self, IngestError> {
        let plan = ChunkingPlan::new(
            config.chunk_max_tokens,
            config.chunk_overlap,
            model_input_limit(config),
        )?;
        let codec = build_codec(config)?;
        Ok(Self::new(Extractor::from_config(config), codec, plan))
    }

    /// Window parameters in effect for this run.
    pub const fn plan(&self) -> &ChunkingPlan {
        &self.plan
    }

    /// Extract and chunk a single document. Never fails; problems are recorded in the report.
    pub fn process_document(&self, document: &RawDocument) -> FileReport {
        let extraction = match self.extractor.extract(document) {
            Ok(extraction) => extraction,
            Err(error) => {
                tracing::warn!(
                    source = %document.source,
                    format = document.format.label(),
                    error = %error,
                    "Failed to extract document; skipping"
                );
                return FileReport::failed(document.source.clone(), document.format, &error);
            }
        };

        let status = if extraction.is_blank() {
            tracing::warn!(
                source = %document.source,
                pages = extraction.pages.len(),
                "No text extracted (even after OCR); file contributes no chunks"
            );
            FileStatus::NoText
        } else {
            FileStatus::Extracted
        };

        let chunks: Vec<ChunkRecord> = extraction
            .pages
            .iter()
            .flat_map(|page| {
                chunk_page(
                    &document.source,
                    page.number,
                    &page.text,
                    self.codec.as_ref(),
                    &self.plan,
                )
            })
            .collect();

        tracing::debug!(
            source = %document.source,
            pages = extraction.pages.len(),
            chunks = chunks.len(),
            "Document chunked"
        );

        FileReport {
            source: document.source.clone(),
            format: document.format,
            pages: extraction.pages.len(),
            chunks,
            page_failures: extraction.failures,
            status,
        }
    }

    /// Ingest every supported document under `raw_dir` and write chunk records to `output`.
    pub fn run(&self, raw_dir: &Path, output: &Path) -> Result<IngestSummary, IngestError> {
        let documents = discover_documents(raw_dir)?;
        tracing::info!(
            raw_dir = %raw_dir.display(),
            documents = documents.len(),
            max_tokens = self.plan.max_tokens(),
            overlap = self.plan.overlap(),
            tokenizer = self.codec.name(),
            "Starting ingestion"
        );

        let mut reports: Vec<FileReport> = documents
            .par_iter()
            .map(|document| self.process_document(document))
            .collect();

        let records: Vec<ChunkRecord> = reports
            .iter_mut()
            .flat_map(|report| std::mem::take(&mut report.chunks))
            .collect();
        write_chunks(output, &records)?;

        let summary = IngestSummary {
            output: output.to_path_buf(),
            files: reports.len(),
            pages: reports.iter().map(|report| report.pages).sum(),
            chunks: records.len(),
            max_tokens: self.plan.max_tokens(),
            clamped_from: self.plan.clamped_from(),
            overlap: self.plan.overlap(),
            reports,
        };
        tracing::info!(
            files = summary.files,
            pages = summary.pages,
            chunks = summary.chunks,
            empty_files = summary.empty_files().count(),
            failed_files = summary.failed_files().count(),
            page_failures = summary.page_failures(),
            output = %output.display(),
            "Ingestion finished"
        );
        Ok(summary)
    }
}

/// Find supported documents below `raw_dir`, sorted by their relative source path.
pub fn discover_documents(raw_dir: &Path) -> Result<Vec<RawDocument>, IngestError> {
    if !raw_dir.is_dir() {
        return Err(IngestError::MissingRawDir(raw_dir.to_path_buf()));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(raw_dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(
                    path = ?error.path(),
                    error = %error,
                    "Skipping unreadable path while scanning raw documents"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(format) = DocumentFormat::from_path(entry.path()) else {
            tracing::trace!(path = %entry.path().display(), "Ignoring unsupported file");
            continue;
        };
        documents.push(RawDocument {
            source: source_name(raw_dir, entry.path()),
            path: entry.into_path(),
            format,
        });
    }

    documents.sort_by(|left, right| left.source.cmp(&right.source));
    Ok(documents)
}

fn source_name(raw_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(raw_dir).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write records as JSON lines, replacing `path` atomically.
pub fn write_chunks(path: &Path, records: &[ChunkRecord]) -> Result<(), IngestError> {
    let output_error = |source: std::io::Error| IngestError::Output {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(output_error)?;

    let staging = tempfile::NamedTempFile::new_in(&parent).map_err(output_error)?;
    {
        let mut writer = BufWriter::new(staging.as_file());
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n").map_err(output_error)?;
        }
        writer.flush().map_err(output_error)?;
    }
    staging
        .persist(path)
        .map_err(|error| output_error(error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionError, PdfTextExtractor};
    use crate::processing::chunking::tests::CharCodec;

    /// Treats `.pdf` fixtures as form-feed separated plain text.
    struct PlainTextPdf;

    impl PdfTextExtractor for PlainTextPdf {
        fn page_texts(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
            let text = fs::read_to_string(path).map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if text.starts_with("%broken") {
                return Err(ExtractionError::ToolFailed {
                    tool: "pdftotext",
                    status: "exit status: 1".into(),
                    stderr: "damaged file".into(),
                });
            }
            Ok(text.split('\u{000C}').map(str::to_string).collect())
        }
    }

    fn ingestor(max_tokens: usize, overlap: usize) -> Ingestor {
        Ingestor::new(
            Extractor::new(Box::new(PlainTextPdf), None),
            Arc::new(CharCodec),
            ChunkingPlan::new(max_tokens, overlap, 512).expect("plan"),
        )
    }

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(path, contents).expect("fixture");
    }

    fn read_records(path: &Path) -> Vec<ChunkRecord> {
        fs::read_to_string(path)
            .expect("output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("record"))
            .collect()
    }

    #[test]
    fn ingests_sorted_documents_and_reports_problem_files() {
        let raw = tempfile::tempdir().expect("raw dir");
        write(raw.path(), "b/lecture.pdf", "abcdefgh\u{000C}ijkl");
        write(raw.path(), "a/intro.PDF", "hello");
        write(raw.path(), "empty.pdf", " \u{000C}\n");
        write(raw.path(), "broken.pdf", "%broken");
        write(raw.path(), "notes.txt", "ignored");
        let out = tempfile::tempdir().expect("out dir");
        let output = out.path().join("processed/chunks.jsonl");

        let summary = ingestor(4, 1).run(raw.path(), &output).expect("summary");

        assert_eq!(summary.files, 4);
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.max_tokens, 4);
        assert_eq!(summary.clamped_from, None);
        let empty: Vec<_> = summary.empty_files().map(|r| r.source.as_str()).collect();
        assert_eq!(empty, vec!["empty.pdf"]);
        let failed: Vec<_> = summary.failed_files().map(|r| r.source.as_str()).collect();
        assert_eq!(failed, vec!["broken.pdf"]);

        let records = read_records(&output);
        assert_eq!(records.len(), summary.chunks);
        let ids: Vec<_> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "a/intro.PDF#p1#c1",
                "a/intro.PDF#p1#c2",
                "b/lecture.pdf#p1#c1",
                "b/lecture.pdf#p1#c2",
                "b/lecture.pdf#p1#c3",
                "b/lecture.pdf#p2#c1",
            ]
        );
        assert_eq!(records[2].text, "abcd");
        assert_eq!(records[5].page, 2);
    }

    #[test]
    fn repeated_runs_write_identical_output() {
        let raw = tempfile::tempdir().expect("raw dir");
        for index in 0..8 {
            write(
                raw.path(),
                &format!("course/week{index}.pdf"),
                &format!("week {index} covers topic {index}\u{000C}exercises for week {index}"),
            );
        }
        let out = tempfile::tempdir().expect("out dir");
        let first = out.path().join("first.jsonl");
        let second = out.path().join("second.jsonl");

        let ingestor = ingestor(6, 2);
        ingestor.run(raw.path(), &first).expect("first run");
        ingestor.run(raw.path(), &second).expect("second run");

        assert_eq!(
            fs::read(&first).expect("first"),
            fs::read(&second).expect("second")
        );
    }

    #[test]
    fn missing_raw_dir_is_an_error() {
        let out = tempfile::tempdir().expect("out dir");
        let error = ingestor(4, 1)
            .run(&out.path().join("nope"), &out.path().join("chunks.jsonl"))
            .unwrap_err();
        assert!(matches!(error, IngestError::MissingRawDir(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_skipped_without_aborting_the_scan() {
        let raw = tempfile::tempdir().expect("raw dir");
        write(raw.path(), "course/notes.pdf", "gradient descent");
        std::os::unix::fs::symlink(raw.path(), raw.path().join("course/loop")).expect("symlink");

        let documents = discover_documents(raw.path()).expect("scan");
        let sources: Vec<_> = documents.iter().map(|doc| doc.source.as_str()).collect();
        assert_eq!(sources, vec!["course/notes.pdf"]);

        let out = tempfile::tempdir().expect("out dir");
        let summary = ingestor(8, 2)
            .run(raw.path(), &out.path().join("chunks.jsonl"))
            .expect("summary");
        assert_eq!(summary.files, 1);
        assert_eq!(summary.chunks, 3);
    }

    #[test]
    fn clamped_plan_is_reported_in_summary() {
        let raw = tempfile::tempdir().expect("raw dir");
        write(raw.path(), "doc.pdf", "short text");
        let out = tempfile::tempdir().expect("out dir");
        let ingestor = Ingestor::new(
            Extractor::new(Box::new(PlainTextPdf), None),
            Arc::new(CharCodec),
            ChunkingPlan::new(700, 100, 512).expect("plan"),
        );

        let summary = ingestor
            .run(raw.path(), &out.path().join("chunks.jsonl"))
            .expect("summary");
        assert_eq!(summary.max_tokens, 512);
        assert_eq!(summary.clamped_from, Some(700));
        assert_eq!(summary.chunks, 1);
    }
}
