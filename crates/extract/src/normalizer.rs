use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::{Cursor, Read};

use crate::error::{ExtractError, Result};

/// Documents at or above this many characters are rejected, never trimmed.
pub const MAX_INPUT_CHARS: usize = 36_000;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Doc,
    PlainText,
}

impl DocumentKind {
    /// Map a declared MIME type to a document kind. Parameters such as `; charset=` are ignored.
    pub fn from_mime(mime: &str) -> Result<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            MIME_PDF => Ok(DocumentKind::Pdf),
            MIME_DOCX => Ok(DocumentKind::Docx),
            MIME_DOC => Ok(DocumentKind::Doc),
            "text/plain" => Ok(DocumentKind::PlainText),
            _ => Err(ExtractError::UnsupportedMimeType(mime.to_string())),
        }
    }
}

/// Turns uploaded bytes or query text into one plain-text string.
#[derive(Debug, Clone)]
pub struct DocumentNormalizer {
    max_chars: usize,
    allowed: Vec<DocumentKind>,
}

/// DOCX and DOC uploads only; PDF stays off until enabled.
impl Default for DocumentNormalizer {
    fn default() -> Self {
        Self::new(MAX_INPUT_CHARS, vec![DocumentKind::Docx, DocumentKind::Doc])
    }
}

impl DocumentNormalizer {
    pub fn new(max_chars: usize, allowed: Vec<DocumentKind>) -> Self {
        Self { max_chars, allowed }
    }

    pub fn with_pdf(mut self) -> Self {
        if !self.allowed.contains(&DocumentKind::Pdf) {
            self.allowed.push(DocumentKind::Pdf);
        }
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn allows(&self, kind: DocumentKind) -> bool {
        self.allowed.contains(&kind)
    }

    /// Normalize an uploaded document of a declared MIME type.
    pub fn normalize_bytes(&self, bytes: &[u8], mime: &str) -> Result<String> {
        let kind = DocumentKind::from_mime(mime)?;
        if !self.allows(kind) {
            return Err(ExtractError::UnsupportedMimeType(mime.to_string()));
        }

        let text = match kind {
            DocumentKind::Pdf => read_pdf_text(bytes)?,
            DocumentKind::Docx | DocumentKind::Doc => read_docx_text(bytes)?,
            DocumentKind::PlainText => String::from_utf8(bytes.to_vec())
                .map_err(|e| ExtractError::UnreadableDocument(format!("text is not UTF-8: {e}")))?,
        };

        self.check_length(&text)?;
        Ok(text)
    }

    /// Direct text passes through unchanged, subject to the length cap.
    pub fn normalize_text(&self, text: &str) -> Result<String> {
        self.check_length(text)?;
        Ok(text.to_string())
    }

    pub fn check_length(&self, text: &str) -> Result<()> {
        let length = text.chars().count();
        if length >= self.max_chars {
            return Err(ExtractError::InputTooLarge { length, limit: self.max_chars });
        }
        Ok(())
    }
}

/// Page texts in page order, joined by newline.
pub fn read_pdf_text(bytes: &[u8]) -> Result<String> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractError::UnreadableDocument(format!("invalid PDF: {e}")))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().keys() {
        let text = document
            .extract_text(&[*page_number])
            .map_err(|e| ExtractError::UnreadableDocument(format!("PDF page {page_number}: {e}")))?;
        pages.push(text);
    }

    Ok(pages.join("\n"))
}

/// Paragraph texts of `word/document.xml` in document order, joined by newline.
pub fn read_docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::UnreadableDocument(format!("not a Word document package: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::UnreadableDocument(format!("missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::UnreadableDocument(format!("unreadable document body: {e}")))?;

    Ok(docx_paragraphs(&xml)?.join("\n"))
}

// Paragraph texts in document order. Only `w:t` content is kept; tabs and breaks become whitespace.
fn docx_paragraphs(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ExtractError::UnreadableDocument(format!("malformed document body: {e}")))?;

        match event {
            Event::Start(tag) => match tag.name().as_ref() {
                b"w:p" => {
                    current.get_or_insert_with(String::new);
                }
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:p" if current.is_none() => paragraphs.push(String::new()),
                b"w:tab" => push_to(&mut current, "\t"),
                b"w:br" | b"w:cr" => push_to(&mut current, "\n"),
                _ => {}
            },
            Event::End(tag) => match tag.name().as_ref() {
                b"w:p" => {
                    if let Some(paragraph) = current.take() {
                        paragraphs.push(paragraph);
                    }
                }
                b"w:t" => in_text = false,
                _ => {}
            },
            Event::Text(text) if in_text => {
                let text = text
                    .unescape()
                    .map_err(|e| ExtractError::UnreadableDocument(format!("bad text in document body: {e}")))?;
                push_to(&mut current, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn push_to(paragraph: &mut Option<String>, piece: &str) {
    if let Some(text) = paragraph {
        text.push_str(piece);
    }
}
