//! Page-oriented document parser (PDF).

use tracing::debug;

use convoq_core::{ConvoqError, DocumentFormat, FormatParser, ParsedSpan, Result};

/// Parser for page-oriented PDF documents.
///
/// Extracts text with `pdf-extract` and splits on form feeds when the
/// extractor emits page breaks; otherwise the whole document is page 1.
pub struct PdfParser;

impl FormatParser for PdfParser {
    fn parse(&self, raw: &[u8]) -> Result<Vec<ParsedSpan>> {
        let text = pdf_extract::extract_text_from_mem(raw)
            .map_err(|e| ConvoqError::corrupt_input(format!("PDF extraction failed: {}", e)))?;

        if text.trim().is_empty() {
            return Err(ConvoqError::corrupt_input("PDF contains no extractable text"));
        }

        let spans: Vec<ParsedSpan> = text
            .split('\x0c')
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(i, page)| ParsedSpan::text(page, Some(i as u32 + 1)))
            .collect();

        debug!("Extracted {} page span(s) from PDF", spans.len());

        if spans.is_empty() {
            return Err(ConvoqError::corrupt_input("PDF contains no extractable text"));
        }

        Ok(spans)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_corrupt() {
        let parser = PdfParser;
        let err = parser.parse(b"this is not a pdf").unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }
}
