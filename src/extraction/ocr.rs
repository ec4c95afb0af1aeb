//! OCR fallback for PDF pages without a text layer.
//!
//! A single page is rasterized with `pdftoppm` into a scratch directory and recognized with
//! `tesseract`, which prints the text on stdout.

use super::ExtractionError;
use std::path::Path;
use std::process::{Command, Output};

const PDFTOPPM: &str = "pdftoppm";
const TESSERACT: &str = "tesseract";

/// Engine that turns one rendered PDF page into text.
pub trait OcrEngine: Send + Sync {
    /// Recognize the text of 1-based `page` of the PDF at `path`.
    fn recognize_page(&self, path: &Path, page: u32) -> Result<String, ExtractionError>;
}

/// poppler + tesseract command-line OCR.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
    dpi: u32,
}

impl TesseractOcr {
    /// Create an engine for the given tesseract language pack and raster resolution.
    pub fn new(language: impl Into<String>, dpi: u32) -> Self {
        Self {
            language: language.into(),
            dpi: dpi.max(72),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize_page(&self, path: &Path, page: u32) -> Result<String, ExtractionError> {
        let scratch = tempfile::tempdir().map_err(|source| ExtractionError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let prefix = scratch.path().join("page");
        let page_arg = page.to_string();

        let raster = Command::new(PDFTOPPM)
            .args(["-f", &page_arg, "-l", &page_arg])
            .args(["-r", &self.dpi.to_string()])
            .args(["-png", "-singlefile"])
            .arg(path)
            .arg(&prefix)
            .output()
            .map_err(|source| ExtractionError::ToolUnavailable {
                tool: PDFTOPPM,
                source,
            })?;
        ensure_success(PDFTOPPM, &raster)?;

        let image = prefix.with_extension("png");
        let recognized = Command::new(TESSERACT)
            .arg(&image)
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .map_err(|source| ExtractionError::ToolUnavailable {
                tool: TESSERACT,
                source,
            })?;
        ensure_success(TESSERACT, &recognized)?;

        Ok(String::from_utf8_lossy(&recognized.stdout).into_owned())
    }
}

fn ensure_success(tool: &'static str, output: &Output) -> Result<(), ExtractionError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(ExtractionError::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
