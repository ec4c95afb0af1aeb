//! Document text extraction.
//!
//! Two formats are supported:
//!
//! - Paged documents (PDF): native text per page, with OCR of any page whose native text is
//!   blank.
//! - Slide decks (PPTX): text frames and table cells in shape order, followed by speaker notes.
//!
//! Failures never abort a batch. A document that cannot be opened yields an
//! [`ExtractionError`]; a page whose OCR fails degrades to empty text and is reported as a
//! [`PageFailure`].

mod ocr;
mod pdf;
mod pptx;

pub use ocr::{OcrEngine, TesseractOcr};
pub use pdf::{PdfTextExtractor, Pdftotext};
pub use pptx::read_slides;

use crate::config::Config;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading a single document or page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Document could not be read from disk.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An external tool is not installed or could not be started.
    #[error("Failed to run {tool}: {source}")]
    ToolUnavailable {
        /// Executable name.
        tool: &'static str,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        /// Executable name.
        tool: &'static str,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The slide-deck package is not a readable archive.
    #[error("Invalid slide deck archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// A slide-deck part is not well-formed XML.
    #[error("Invalid slide deck XML in {part}: {message}")]
    Xml {
        /// Package part being parsed.
        part: String,
        /// Parser message.
        message: String,
    },
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    /// Paginated text document (`.pdf`).
    PagedDocument,
    /// Slide deck (`.pptx`).
    SlideDeck,
}

impl DocumentFormat {
    /// Detect the format from a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::PagedDocument),
            "pptx" => Some(Self::SlideDeck),
            _ => None,
        }
    }

    /// Short label used in logs and summaries.
    pub const fn label(self) -> &'static str {
        match self {
            Self::PagedDocument => "pdf",
            Self::SlideDeck => "pptx",
        }
    }
}

/// A document queued for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Absolute or working-directory-relative path on disk.
    pub path: PathBuf,
    /// Path relative to the raw directory, `/`-separated; unique per file.
    pub source: String,
    /// Detected format.
    pub format: DocumentFormat,
}

/// Text of one page or slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page or slide number.
    pub number: u32,
    /// Raw text; empty when neither extraction nor OCR produced anything.
    pub text: String,
}

/// A page that degraded to empty text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    /// 1-based page number.
    pub page: u32,
    /// Human-readable cause.
    pub reason: String,
}

/// Pages extracted from one document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Pages in strictly increasing page order.
    pub pages: Vec<Page>,
    /// Pages whose text could not be recovered.
    pub failures: Vec<PageFailure>,
}

impl Extraction {
    /// True when no page carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|page| page.text.trim().is_empty())
    }
}

/// Format dispatcher holding the PDF text backend and the optional OCR engine.
pub struct Extractor {
    pdf: Box<dyn PdfTextExtractor>,
    ocr: Option<Box<dyn OcrEngine>>,
}

impl Extractor {
    /// Assemble an extractor from explicit backends.
    pub fn new(pdf: Box<dyn PdfTextExtractor>, ocr: Option<Box<dyn OcrEngine>>) -> Self {
        Self { pdf, ocr }
    }

    /// Build the poppler/tesseract backed extractor described by configuration.
    pub fn from_config(config: &Config) -> Self {
        let ocr: Option<Box<dyn OcrEngine>> = config.ocr_enabled.then(|| {
            Box::new(TesseractOcr::new(config.ocr_language.clone(), config.ocr_dpi))
                as Box<dyn OcrEngine>
        });
        Self::new(Box::new(Pdftotext), ocr)
    }

    /// Extract every page of a document.
    pub fn extract(&self, document: &RawDocument) -> Result<Extraction, ExtractionError> {
        match document.format {
            DocumentFormat::PagedDocument => self.extract_pdf(&document.path),
            DocumentFormat::SlideDeck => read_slides(&document.path),
        }
    }

    fn extract_pdf(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let native = self.pdf.page_texts(path)?;
        let mut extraction = Extraction::default();

        for (index, text) in native.into_iter().enumerate() {
            let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let text = text.replace('\r', "\n");
            if !text.trim().is_empty() {
                extraction.pages.push(Page { number, text });
                continue;
            }

            let recovered = match &self.ocr {
                Some(ocr) => match ocr.recognize_page(path, number) {
                    Ok(text) => {
                        tracing::debug!(path = %path.display(), page = number, "OCR fallback used");
                        text
                    }
                    Err(error) => {
                        tracing::warn!(
                            path = %path.display(),
                            page = number,
                            error = %error,
                            "OCR failed"
                        );
                        extraction.failures.push(PageFailure {
                            page: number,
                            reason: error.to_string(),
                        });
                        String::new()
                    }
                },
                None => String::new(),
            };
            extraction.pages.push(Page {
                number,
                text: recovered,
            });
        }

        Ok(extraction)
    }
}
