//! convoq-parse - Document format parsers
//!
//! One parser variant per declared document format, dispatched on the
//! `DocumentFormat` tag rather than runtime type inspection:
//!
//! - [`PlainTextParser`]: UTF-8 plain text.
//! - [`PdfParser`]: page-oriented PDF documents.
//! - [`WorkbookParser`]: tabular workbooks, one span per worksheet row.
//!
//! Parsing is a pure transformation. Unknown formats fail with
//! `UnsupportedFormat`; structurally unreadable input fails with
//! `CorruptInput` rather than silently truncating.

mod paged;
mod plain;
mod workbook;

pub use paged::PdfParser;
pub use plain::PlainTextParser;
pub use workbook::WorkbookParser;

use convoq_core::{DocumentFormat, FormatParser, ParsedSpan, Result};

/// Resolve the parser variant for a declared format.
pub fn parser_for(format: DocumentFormat) -> Box<dyn FormatParser> {
    match format {
        DocumentFormat::PlainText => Box::new(PlainTextParser),
        DocumentFormat::Pdf => Box::new(PdfParser),
        DocumentFormat::Workbook => Box::new(WorkbookParser),
    }
}

/// Parse raw bytes with the parser for the declared format.
pub fn parse(raw: &[u8], format: DocumentFormat) -> Result<Vec<ParsedSpan>> {
    parser_for(format).parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_matches_format() {
        for format in [
            DocumentFormat::PlainText,
            DocumentFormat::Pdf,
            DocumentFormat::Workbook,
        ] {
            assert_eq!(parser_for(format).format(), format);
        }
    }

    #[test]
    fn test_parse_dispatches() {
        let spans = parse(b"some text", DocumentFormat::PlainText).unwrap();
        assert_eq!(spans.len(), 1);
    }
}
