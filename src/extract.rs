//! Text extraction for uploaded documents.
//!
//! Ingestion accepts raw bytes plus the client-supplied filename; this module
//! turns them into plain UTF-8 text. PDF goes through `pdf-extract`, DOCX is
//! unzipped and its `w:t` runs collected, `.txt`/`.md` pass through as UTF-8.
//! Anything else is an [`Error::UnsupportedFormat`]; a document whose
//! extraction yields only whitespace is [`Error::EmptyContent`] and nothing
//! gets written downstream.

use std::io::Read;

use crate::error::{Error, Result};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from an uploaded document, dispatching on the
/// filename extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let text = match ext.as_str() {
        "pdf" => extract_pdf(bytes)?,
        "docx" => extract_docx(bytes)?,
        "txt" | "md" => String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::UnsupportedFormat(format!("{} is not valid UTF-8", filename)))?,
        _ => return Err(Error::UnsupportedFormat(filename.to_string())),
    };

    if text.trim().is_empty() {
        return Err(Error::EmptyContent(format!(
            "no extractable text in {}",
            filename
        )));
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::UnsupportedFormat(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::UnsupportedFormat(format!("not a DOCX archive: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| Error::UnsupportedFormat("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| Error::UnsupportedFormat(format!("DOCX read failed: {}", e)))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::UnsupportedFormat(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    collect_text_runs(&doc_xml)
}

/// Walk the document XML and concatenate the text runs (`w:t` elements),
/// inserting newlines at paragraph ends (`w:p`).
fn collect_text_runs(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(Error::UnsupportedFormat(format!(
                    "DOCX XML parse failed: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_returns_error() {
        let err = extract_text(b"data", "image.png").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", "report.pdf").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", "notes.docx").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text("The sky is blue.".as_bytes(), "sky.txt").unwrap();
        assert_eq!(text, "The sky is blue.");
    }

    #[test]
    fn blank_text_is_empty_content() {
        let err = extract_text(b"   \n\t ", "blank.txt").unwrap_err();
        assert!(matches!(err, Error::EmptyContent(_)));
    }

    #[test]
    fn extension_casing_is_ignored() {
        let text = extract_text("hello".as_bytes(), "NOTES.TXT").unwrap();
        assert_eq!(text, "hello");
    }
}
