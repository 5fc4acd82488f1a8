use convoq_core::{ChunkDraft, ChunkParams, Chunker, ParsedSpan, Provenance, Result, SpanKind};
use tracing::debug;

/// Sentence-boundary chunker with trailing overlap.
///
/// Text is split into sentence segments that cover the input exactly, so
/// concatenating the chunk contents minus their overlap prefixes recovers
/// the original span text verbatim. Table rows are packed whole and never
/// split.
pub struct SpanChunker;

/// Rough token estimate: four bytes per token, floor of one.
fn estimate_tokens(len: usize) -> usize {
    (len / 4).max(1)
}

impl Chunker for SpanChunker {
    fn chunk(&self, spans: &[ParsedSpan], params: &ChunkParams) -> Result<Vec<ChunkDraft>> {
        let mut drafts = Vec::new();
        let mut i = 0;
        while i < spans.len() {
            match &spans[i].kind {
                SpanKind::Text { page } => {
                    chunk_text(&spans[i].text, *page, params, &mut drafts);
                    i += 1;
                }
                SpanKind::Row { sheet, .. } => {
                    // Collect the run of consecutive rows from the same sheet.
                    let run_sheet = sheet.clone();
                    let mut rows: Vec<(u32, &str)> = Vec::new();
                    while i < spans.len() {
                        match &spans[i].kind {
                            SpanKind::Row { sheet, row } if *sheet == run_sheet => {
                                rows.push((*row, spans[i].text.as_str()));
                                i += 1;
                            }
                            _ => break,
                        }
                    }
                    chunk_rows(&run_sheet, &rows, params, &mut drafts);
                }
            }
        }
        debug!(spans = spans.len(), chunks = drafts.len(), "chunked spans");
        Ok(drafts)
    }
}

fn chunk_text(text: &str, page: Option<u32>, params: &ChunkParams, out: &mut Vec<ChunkDraft>) {
    if text.is_empty() {
        return;
    }
    let mut units: Vec<&str> = Vec::new();
    for sentence in split_sentences(text) {
        if estimate_tokens(sentence.len()) > params.max_tokens {
            units.extend(split_by_size(sentence, params.max_tokens));
        } else {
            units.push(sentence);
        }
    }

    let mut overlap = String::new();
    let mut body = String::new();
    for unit in units {
        let candidate = overlap.len() + body.len() + unit.len();
        if !body.is_empty() && estimate_tokens(candidate) > params.max_tokens {
            push_text_draft(out, &overlap, &body, page);
            overlap = tail_overlap(&body, params.overlap_tokens);
            body.clear();
        }
        body.push_str(unit);
    }
    if !body.is_empty() {
        push_text_draft(out, &overlap, &body, page);
    }
}

fn push_text_draft(out: &mut Vec<ChunkDraft>, overlap: &str, body: &str, page: Option<u32>) {
    let content = format!("{}{}", overlap, body);
    out.push(ChunkDraft {
        token_count: estimate_tokens(content.len()) as u32,
        overlap_len: overlap.len() as u32,
        content,
        provenance: Provenance::Text { page },
    });
}

/// Splits text into segments that cover it exactly. A segment ends after a
/// sentence terminator followed by whitespace, or after a newline.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let boundary = match c {
            '.' | '!' | '?' => match iter.peek() {
                Some((_, next)) => next.is_whitespace(),
                None => true,
            },
            '\n' => true,
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Hard-splits an oversized segment, preferring whitespace breaks. The
/// pieces cover the input exactly.
fn split_by_size(text: &str, max_tokens: usize) -> Vec<&str> {
    let target = max_tokens * 4;
    let mut parts = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + target).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end < text.len() {
            if let Some((i, c)) = text[start..end]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
            {
                let candidate = start + i + c.len_utf8();
                if candidate > start {
                    end = candidate;
                }
            }
        }
        if end == start {
            // Single char wider than the byte target.
            end = start
                + text[start..]
                    .chars()
                    .next()
                    .map(|c| c.len_utf8())
                    .unwrap_or(1);
        }
        parts.push(&text[start..end]);
        start = end;
    }
    parts
}

/// Trailing slice of `body` within the overlap token budget, aligned to a
/// char boundary.
fn tail_overlap(body: &str, overlap_tokens: usize) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }
    let budget = overlap_tokens * 4;
    if body.len() <= budget {
        return body.to_string();
    }
    let mut start = body.len() - budget;
    while !body.is_char_boundary(start) {
        start += 1;
    }
    body[start..].to_string()
}

fn chunk_rows(sheet: &str, rows: &[(u32, &str)], params: &ChunkParams, out: &mut Vec<ChunkDraft>) {
    let mut buf = String::new();
    let mut row_start = 0u32;
    let mut row_end = 0u32;
    for (row, text) in rows {
        let added = if buf.is_empty() {
            text.len()
        } else {
            buf.len() + 1 + text.len()
        };
        if !buf.is_empty() && estimate_tokens(added) > params.max_tokens {
            push_row_draft(out, sheet, row_start, row_end, &buf);
            buf.clear();
        }
        if buf.is_empty() {
            row_start = *row;
        } else {
            buf.push('\n');
        }
        buf.push_str(text);
        row_end = *row;
    }
    if !buf.is_empty() {
        push_row_draft(out, sheet, row_start, row_end, &buf);
    }
}

fn push_row_draft(out: &mut Vec<ChunkDraft>, sheet: &str, row_start: u32, row_end: u32, buf: &str) {
    out.push(ChunkDraft {
        content: buf.to_string(),
        token_count: estimate_tokens(buf.len()) as u32,
        overlap_len: 0,
        provenance: Provenance::Table {
            sheet: sheet.to_string(),
            row_start,
            row_end,
        },
    });
}
