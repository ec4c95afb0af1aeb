//! Native PDF text extraction through poppler's `pdftotext`.

use super::ExtractionError;
use std::path::Path;
use std::process::Command;

const PDFTOTEXT: &str = "pdftotext";
const PAGE_BREAK: char = '\u{000C}';
/// Reading-order output (no `-layout`), UTF-8, errors on stderr only.
const PDFTOTEXT_ARGS: [&str; 3] = ["-enc", "UTF-8", "-q"];

/// Backend returning the native text layer of every page, in page order.
pub trait PdfTextExtractor: Send + Sync {
    /// Return one string per page; pages without a text layer are empty strings.
    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// `pdftotext` invocation writing UTF-8 text to stdout.
///
/// poppler terminates every page with a form feed, which gives exact page boundaries even
/// for pages without any text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pdftotext;

impl PdfTextExtractor for Pdftotext {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let output = Command::new(PDFTOTEXT)
            .args(PDFTOTEXT_ARGS)
            .arg(path)
            .arg("-")
            .output()
            .map_err(|source| ExtractionError::ToolUnavailable {
                tool: PDFTOTEXT,
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractionError::ToolFailed {
                tool: PDFTOTEXT,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let pages = split_pages(&text);
        tracing::debug!(path = %path.display(), pages = pages.len(), "pdftotext finished");
        Ok(pages)
    }
}

/// Split `pdftotext` output on form feeds, dropping the empty tail after the last page.
pub(crate) fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
    if pages.last().is_some_and(String::is_empty) {
        pages.pop();
    }
    pages
}
