//! Tabular workbook parser (XLSX/ODS).

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::debug;

use convoq_core::{ConvoqError, DocumentFormat, FormatParser, ParsedSpan, Result};

/// Parser for tabular workbooks.
///
/// Emits one span per non-empty row, preserving worksheet identity and
/// 1-based row position so retrieval can report provenance like
/// "Sheet2 rows 10-14". Cells are pipe-joined within a row.
pub struct WorkbookParser;

impl FormatParser for WorkbookParser {
    fn parse(&self, raw: &[u8]) -> Result<Vec<ParsedSpan>> {
        let cursor = Cursor::new(raw.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor)
            .map_err(|e| ConvoqError::corrupt_input(format!("failed to open workbook: {}", e)))?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(ConvoqError::corrupt_input("workbook has no sheets"));
        }

        let mut spans = Vec::new();

        for sheet_name in &sheet_names {
            let range = match workbook.worksheet_range(sheet_name) {
                Ok(r) => r,
                Err(e) => {
                    return Err(ConvoqError::corrupt_input(format!(
                        "failed to read sheet '{}': {}",
                        sheet_name, e
                    )));
                }
            };

            if range.is_empty() {
                continue;
            }

            let start_row = range.start().map(|(r, _)| r).unwrap_or(0);

            for (idx, row) in range.rows().enumerate() {
                let cells: Vec<String> = row.iter().map(cell_to_string).collect();
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }

                let row_number = start_row + idx as u32 + 1;
                spans.push(ParsedSpan::row(cells.join(" | "), sheet_name.clone(), row_number));
            }
        }

        debug!(
            "Extracted {} row span(s) from {} sheet(s)",
            spans.len(),
            sheet_names.len()
        );

        if spans.is_empty() {
            return Err(ConvoqError::corrupt_input("workbook contains no data"));
        }

        Ok(spans)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Workbook
    }
}

/// Convert a calamine cell to a clean string representation.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                format!("{:.4}", f)
                    .trim_end_matches('0')
                    .trim_end_matches('.')
                    .to_string()
            }
        }
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#ERR:{:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_corrupt() {
        let parser = WorkbookParser;
        let err = parser.parse(b"not a workbook at all").unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell_to_string(&Data::String("name".into())), "name");
        assert_eq!(cell_to_string(&Data::Float(1500.0)), "1500");
        assert_eq!(cell_to_string(&Data::Float(0.5)), "0.5");
        assert_eq!(cell_to_string(&Data::Bool(true)), "TRUE");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
