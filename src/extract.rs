//! Text extraction from curriculum documents.
//!
//! Each supported format is turned into an ordered list of [`TextUnit`]s,
//! each carrying a human-readable locator that ends up on every chunk cut
//! from it:
//!
//! | Extension | Backend | Locator |
//! |-----------|---------|---------|
//! | `pdf` | `pdf-extract`, page by page | `page N` |
//! | `docx` | `zip` + `quick-xml` over `word/document.xml` | `paragraph-block N` |
//! | anything else | strict UTF-8 | `section N` |
//!
//! Extraction never panics on bad input: it returns an [`ExtractError`] and
//! the rebuild records the file as an ingest failure.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

/// Paragraphs grouped into one `paragraph-block` unit of a docx.
const DOCX_PARAGRAPHS_PER_BLOCK: usize = 20;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("not valid UTF-8 text: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

/// A contiguous piece of extracted text with its position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub locator: String,
    pub text: String,
}

impl TextUnit {
    fn new(locator: String, text: String) -> Self {
        Self { locator, text }
    }
}

/// Extract text units from a file's bytes, dispatching on its extension.
pub fn extract_units(extension: Option<&str>, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    match extension {
        Some("pdf") => extract_pdf(bytes),
        Some("docx") => extract_docx(bytes),
        _ => extract_plain(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextUnit::new(format!("page {}", i + 1), text))
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let paragraphs = docx_paragraphs(&doc_xml)?;
    Ok(paragraphs
        .chunks(DOCX_PARAGRAPHS_PER_BLOCK)
        .enumerate()
        .map(|(i, block)| TextUnit::new(format!("paragraph-block {}", i + 1), block.join("\n\n")))
        .collect())
}

/// Collect the text of each non-empty `w:p`, concatenating its `w:t` runs.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs)
}

/// Plain text and Markdown. Sections start at each ATX heading line.
fn extract_plain(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() || sections.is_empty() {
        sections.push(current);
    }

    Ok(sections
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextUnit::new(format!("section {}", i + 1), text))
        .collect())
}
