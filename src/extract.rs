//! Page-unit text extraction for uploaded documents.
//!
//! PDFs yield one [`PageText`] per physical page, numbered from 1. DOCX files
//! yield a single unit holding every non-empty paragraph joined by newlines,
//! with no page number.

use std::io::Read;

use crate::error::{Error, Result};
use crate::models::{DocType, PageText};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turns stored file bytes into ordered extraction units.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8], doc_type: DocType) -> Result<Vec<PageText>>;
}

/// Default extractor backed by `pdf-extract` and a `quick-xml` DOCX reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl Extractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], doc_type: DocType) -> Result<Vec<PageText>> {
        match doc_type {
            DocType::Pdf => extract_pdf_pages(bytes),
            DocType::Docx => extract_docx(bytes),
        }
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| Error::Extraction(format!("PDF: {}", e)))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page: Some(i as i64 + 1),
            text,
        })
        .collect())
}

pub fn extract_docx(bytes: &[u8]) -> Result<Vec<PageText>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| Error::Extraction("DOCX: word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(
            "DOCX: word/document.xml exceeds size limit".to_string(),
        ));
    }

    let paragraphs = docx_paragraphs(&doc_xml)?;
    Ok(vec![PageText {
        page: None,
        text: paragraphs.join("\n"),
    }])
}

/// Collect the text of each `<w:p>` paragraph, dropping blank ones.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("DOCX: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}
