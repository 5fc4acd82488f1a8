//! Plain-text parser.

use convoq_core::{ConvoqError, DocumentFormat, FormatParser, ParsedSpan, Result};

/// Parser for UTF-8 plain text.
///
/// Emits a single text span carrying the document verbatim, so downstream
/// chunking can reconstruct the original byte-for-byte.
pub struct PlainTextParser;

impl FormatParser for PlainTextParser {
    fn parse(&self, raw: &[u8]) -> Result<Vec<ParsedSpan>> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ConvoqError::corrupt_input(format!("invalid UTF-8: {}", e)))?;

        if text.trim().is_empty() {
            return Err(ConvoqError::corrupt_input("document contains no text"));
        }

        Ok(vec![ParsedSpan::text(text, None)])
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::PlainText
    }
}
