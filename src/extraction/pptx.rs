//! Slide-deck text extraction from the OOXML package.
//!
//! Slides are read in presentation order (`ppt/presentation.xml` + relationships). Each slide
//! contributes the text of its shapes and table cells in document order, followed by the body
//! placeholder of its notes slide.

use super::{Extraction, ExtractionError, Page, PageFailure};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const SLIDE_DIR: &str = "ppt/slides";
const NOTES_RELATIONSHIP: &str = "/notesSlide";
const SLIDE_RELATIONSHIP: &str = "/slide";

/// Read every slide of a `.pptx` file.
///
/// Slides whose XML cannot be parsed degrade to empty text and are reported as page failures.
pub fn read_slides(path: &Path) -> Result<Extraction, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut package = Package {
        archive: ZipArchive::new(BufReader::new(file))?,
    };

    let slide_parts = package.slide_parts()?;
    let mut extraction = Extraction::default();
    for (index, part) in slide_parts.iter().enumerate() {
        let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let text = match package.slide_text(part) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    slide = number,
                    error = %error,
                    "Failed to read slide"
                );
                extraction.failures.push(PageFailure {
                    page: number,
                    reason: error.to_string(),
                });
                String::new()
            }
        };
        extraction.pages.push(Page { number, text });
    }

    tracing::debug!(path = %path.display(), slides = extraction.pages.len(), "Slide deck read");
    Ok(extraction)
}

struct Package<R> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> Package<R> {
    fn read_part(&mut self, name: &str) -> Result<Option<String>, ExtractionError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|source| ExtractionError::Xml {
                part: name.to_string(),
                message: source.to_string(),
            })?;
        Ok(Some(contents))
    }

    fn relationships(&mut self, part: &str) -> Result<Vec<Relationship>, ExtractionError> {
        let rels_name = rels_part(part);
        match self.read_part(&rels_name)? {
            Some(xml) => parse_relationships(&rels_name, &xml),
            None => Ok(Vec::new()),
        }
    }

    /// Slide part names in presentation order.
    fn slide_parts(&mut self) -> Result<Vec<String>, ExtractionError> {
        if let Some(presentation) = self.read_part(PRESENTATION_PART)? {
            let order = parse_slide_order(PRESENTATION_PART, &presentation)?;
            let targets: HashMap<String, String> = self
                .relationships(PRESENTATION_PART)?
                .into_iter()
                .filter(|rel| rel.kind.ends_with(SLIDE_RELATIONSHIP))
                .map(|rel| (rel.id, resolve_part("ppt", &rel.target)))
                .collect();
            let ordered: Vec<String> = order
                .iter()
                .filter_map(|rel_id| targets.get(rel_id).cloned())
                .collect();
            if !ordered.is_empty() {
                return Ok(ordered);
            }
        }

        tracing::debug!("Presentation order unavailable; sorting slide parts by number");
        let mut numbered: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| slide_number(name).map(|number| (number, name.to_string())))
            .collect();
        numbered.sort();
        Ok(numbered.into_iter().map(|(_, name)| name).collect())
    }

    fn slide_text(&mut self, part: &str) -> Result<String, ExtractionError> {
        let xml = self
            .read_part(part)?
            .ok_or_else(|| ExtractionError::Archive(ZipError::FileNotFound))?;
        let mut blocks: Vec<String> = text_units(part, &xml)?
            .into_iter()
            .map(|unit| unit.text)
            .collect();

        let notes_part = self
            .relationships(part)?
            .into_iter()
            .find(|rel| rel.kind.ends_with(NOTES_RELATIONSHIP))
            .map(|rel| resolve_part(parent_dir(part), &rel.target));
        if let Some(notes_part) = notes_part
            && let Some(notes_xml) = self.read_part(&notes_part)?
        {
            let notes: Vec<String> = text_units(&notes_part, &notes_xml)?
                .into_iter()
                .filter(|unit| unit.placeholder.as_deref() == Some("body"))
                .map(|unit| unit.text)
                .collect();
            blocks.extend(notes);
        }

        Ok(blocks.join("\n"))
    }
}

#[derive(Debug)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

/// Text of one shape or table cell.
#[derive(Debug, PartialEq, Eq)]
struct TextUnit {
    text: String,
    placeholder: Option<String>,
}

#[derive(Default)]
struct UnitBuilder {
    paragraphs: Vec<String>,
    placeholder: Option<String>,
}

impl UnitBuilder {
    fn push_text(&mut self, text: &str) {
        match self.paragraphs.last_mut() {
            Some(paragraph) => paragraph.push_str(text),
            None => self.paragraphs.push(text.to_string()),
        }
    }

    fn finish(self) -> Option<TextUnit> {
        let text = self.paragraphs.join("\n").trim().to_string();
        (!text.is_empty()).then_some(TextUnit {
            text,
            placeholder: self.placeholder,
        })
    }
}

fn xml_error(part: &str, error: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Xml {
        part: part.to_string(),
        message: error.to_string(),
    }
}

/// Collect shape and table-cell text in document order.
fn text_units(part: &str, xml: &str) -> Result<Vec<TextUnit>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut units = Vec::new();
    let mut open: Vec<UnitBuilder> = Vec::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event().map_err(|error| xml_error(part, error))? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"sp" | b"tc" => open.push(UnitBuilder::default()),
                b"p" => {
                    if let Some(unit) = open.last_mut() {
                        unit.paragraphs.push(String::new());
                    }
                }
                b"t" => in_run_text = true,
                b"ph" => record_placeholder(&mut open, &element),
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"br" => {
                    if let Some(unit) = open.last_mut() {
                        unit.push_text("\n");
                    }
                }
                b"p" => {
                    if let Some(unit) = open.last_mut() {
                        unit.paragraphs.push(String::new());
                    }
                }
                b"ph" => record_placeholder(&mut open, &element),
                _ => {}
            },
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"sp" | b"tc" => {
                    if let Some(unit) = open.pop().and_then(UnitBuilder::finish) {
                        units.push(unit);
                    }
                }
                _ => {}
            },
            Event::Text(text) if in_run_text => {
                let decoded = text.unescape().map_err(|error| xml_error(part, error))?;
                if let Some(unit) = open.last_mut() {
                    unit.push_text(&decoded);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(units)
}

fn record_placeholder(open: &mut [UnitBuilder], element: &BytesStart<'_>) {
    if let Some(unit) = open.last_mut() {
        unit.placeholder = Some(attribute(element, b"type").unwrap_or_else(|| "obj".to_string()));
    }
}

fn parse_slide_order(part: &str, xml: &str) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut order = Vec::new();
    loop {
        match reader.read_event().map_err(|error| xml_error(part, error))? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"sldId" =>
            {
                if let Some(rel_id) = attribute(&element, b"r:id") {
                    order.push(rel_id);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(order)
}

fn parse_relationships(part: &str, xml: &str) -> Result<Vec<Relationship>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = Vec::new();
    loop {
        match reader.read_event().map_err(|error| xml_error(part, error))? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(kind), Some(target)) = (
                    attribute(&element, b"Id"),
                    attribute(&element, b"Type"),
                    attribute(&element, b"Target"),
                ) {
                    relationships.push(Relationship { id, kind, target });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(relationships)
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn rels_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_DIR)?
        .strip_prefix("/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn slide_xml(shapes: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree>{shapes}</p:spTree></p:cSld></p:sld>"#
        )
    }

    fn text_shape(paragraphs: &[&str]) -> String {
        let body: String = paragraphs
            .iter()
            .map(|text| format!("<a:p><a:r><a:t>{text}</a:t></a:r></a:p>"))
            .collect();
        format!("<p:sp><p:nvSpPr><p:nvPr/></p:nvSpPr><p:txBody>{body}</p:txBody></p:sp>")
    }

    fn write_deck(path: &Path, parts: &[(&str, String)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).expect("create deck"));
        for (name, contents) in parts {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start part");
            writer.write_all(contents.as_bytes()).expect("write part");
        }
        writer.finish().expect("finish deck");
    }

    #[test]
    fn reads_slides_in_presentation_order_with_tables_and_notes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deck.pptx");

        let presentation = format!(
            r#"<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:r="{REL_NS}"><p:sldIdLst><p:sldId id="256" r:id="rId3"/><p:sldId id="257" r:id="rId2"/></p:sldIdLst></p:presentation>"#
        );
        let presentation_rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide1.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide2.xml"/></Relationships>"#.to_string();

        let table = "<p:graphicFrame><a:graphic><a:graphicData><a:tbl><a:tr><a:tc><a:txBody><a:p><a:r><a:t>Layer</a:t></a:r></a:p></a:txBody></a:tc><a:tc><a:txBody><a:p><a:r><a:t>Gradient</a:t></a:r></a:p></a:txBody></a:tc></a:tr></a:tbl></a:graphicData></a:graphic></p:graphicFrame>";
        let first_slide = slide_xml(&format!(
            "{}{}",
            text_shape(&["Backpropagation", "Chain rule &amp; gradients"]),
            table
        ));
        let second_slide = slide_xml(&text_shape(&["Agenda"]));

        let slide_rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/notesSlide" Target="../notesSlides/notesSlide1.xml"/></Relationships>"#.to_string();
        let notes = r#"<p:notes xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:nvSpPr><p:nvPr><p:ph type="sldImg"/></p:nvPr></p:nvSpPr></p:sp><p:sp><p:nvSpPr><p:nvPr><p:ph type="body" idx="1"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>Mention vanishing gradients.</a:t></a:r></a:p></p:txBody></p:sp><p:sp><p:nvSpPr><p:nvPr><p:ph type="sldNum" idx="5"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:fld><a:t>1</a:t></a:fld></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:notes>"#.to_string();

        write_deck(
            &path,
            &[
                ("ppt/presentation.xml", presentation),
                ("ppt/_rels/presentation.xml.rels", presentation_rels),
                ("ppt/slides/slide1.xml", first_slide),
                ("ppt/slides/slide2.xml", second_slide),
                ("ppt/slides/_rels/slide1.xml.rels", slide_rels),
                ("ppt/notesSlides/notesSlide1.xml", notes),
            ],
        );

        let extraction = read_slides(&path).expect("slides");
        assert!(extraction.failures.is_empty());
        assert_eq!(extraction.pages.len(), 2);
        assert_eq!(extraction.pages[0].number, 1);
        assert_eq!(extraction.pages[0].text, "Agenda");
        assert_eq!(extraction.pages[1].number, 2);
        assert_eq!(
            extraction.pages[1].text,
            "Backpropagation\nChain rule & gradients\nLayer\nGradient\nMention vanishing gradients."
        );
    }

    #[test]
    fn falls_back_to_numeric_slide_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bare.pptx");
        write_deck(
            &path,
            &[
                ("ppt/slides/slide10.xml", slide_xml(&text_shape(&["ten"]))),
                ("ppt/slides/slide2.xml", slide_xml(&text_shape(&["two"]))),
                ("ppt/slides/slide1.xml", slide_xml(&text_shape(&["one"]))),
            ],
        );

        let texts: Vec<String> = read_slides(&path)
            .expect("slides")
            .pages
            .into_iter()
            .map(|page| page.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "ten"]);
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.pptx");
        std::fs::write(&path, b"not a zip file").expect("write");
        assert!(matches!(
            read_slides(&path).unwrap_err(),
            ExtractionError::Archive(_)
        ));
    }

    #[test]
    fn resolves_relative_targets() {
        assert_eq!(
            resolve_part("ppt/slides", "../notesSlides/notesSlide3.xml"),
            "ppt/notesSlides/notesSlide3.xml"
        );
        assert_eq!(resolve_part("ppt", "slides/slide1.xml"), "ppt/slides/slide1.xml");
        assert_eq!(resolve_part("ppt", "/ppt/slides/slide4.xml"), "ppt/slides/slide4.xml");
        assert_eq!(rels_part("ppt/slides/slide1.xml"), "ppt/slides/_rels/slide1.xml.rels");
    }
}
