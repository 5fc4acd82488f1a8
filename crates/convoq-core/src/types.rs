//! Core domain types for the conversation engine.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Declared document format, determines the parser variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// UTF-8 plain text, paragraph-oriented.
    PlainText,
    /// Page-oriented document (PDF).
    Pdf,
    /// Tabular workbook (XLSX/ODS), worksheet-structured.
    Workbook,
}

impl DocumentFormat {
    /// Resolve a declared-format tag. Unknown tags have no parser variant.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "text" | "txt" | "plain" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            "workbook" | "xlsx" | "xls" | "ods" => Some(Self::Workbook),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PlainText => "text",
            Self::Pdf => "pdf",
            Self::Workbook => "workbook",
        };
        write!(f, "{}", s)
    }
}

/// Ingestion status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Parsed,
    Embedded,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Embedded => "embedded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "parsed" => Some(Self::Parsed),
            "embedded" => Some(Self::Embedded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A workspace, the tenancy root. Every other entity is scoped to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Display name.
    pub name: String,

    /// Free-form system instructions merged verbatim into generation prompts.
    pub prompt_instructions: String,

    /// Optional assistant display name surfaced in prompts.
    pub bot_name: Option<String>,

    /// Active workflow template version. 0 until a template is set.
    pub workflow_version: u32,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

impl Workspace {
    pub fn new(name: &str) -> Self {
        Self {
            id: Ulid::new(),
            name: name.to_string(),
            prompt_instructions: String::new(),
            bot_name: None,
            workflow_version: 0,
            created_at: now_millis(),
        }
    }
}

/// A document in a workspace knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Owning workspace.
    pub workspace_id: Ulid,

    /// Declared source format.
    pub format: DocumentFormat,

    /// Raw byte size of the ingested payload.
    pub byte_size: u64,

    /// Blake3 hash of the raw bytes, for idempotent re-ingestion.
    pub content_hash: Option<[u8; 32]>,

    /// Ingestion status.
    pub status: DocumentStatus,

    /// Last ingestion error, when status is `failed`.
    pub error: Option<String>,

    /// Ingestion timestamp (Unix millis).
    pub created_at: u64,
}

impl Document {
    pub fn new(workspace_id: Ulid, format: DocumentFormat, raw: &[u8]) -> Self {
        Self {
            id: Ulid::new(),
            workspace_id,
            format,
            byte_size: raw.len() as u64,
            content_hash: Some(*blake3::hash(raw).as_bytes()),
            status: DocumentStatus::Pending,
            error: None,
            created_at: now_millis(),
        }
    }

    /// Hex form of the content hash, for display.
    pub fn content_hash_hex(&self) -> Option<String> {
        self.content_hash.map(hex::encode)
    }
}

/// Structural position of a parsed span within its source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SpanKind {
    /// Running text, optionally attributed to a page.
    Text { page: Option<u32> },
    /// A single worksheet row. Rows are atomic for chunking.
    Row { sheet: String, row: u32 },
}

/// One unit of parser output: a text span plus its structural position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSpan {
    pub text: String,
    pub kind: SpanKind,
}

impl ParsedSpan {
    pub fn text(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            kind: SpanKind::Text { page },
        }
    }

    pub fn row(text: impl Into<String>, sheet: impl Into<String>, row: u32) -> Self {
        Self {
            text: text.into(),
            kind: SpanKind::Row {
                sheet: sheet.into(),
                row,
            },
        }
    }
}

/// Structural provenance of a chunk, reported alongside retrieval results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Provenance {
    /// Running text, optionally from a known page.
    Text { page: Option<u32> },
    /// A contiguous row range of one worksheet.
    Table {
        sheet: String,
        row_start: u32,
        row_end: u32,
    },
}

impl Provenance {
    /// Human-readable provenance label, e.g. "Sheet2 rows 10-14".
    pub fn label(&self, seq: u32) -> String {
        match self {
            Self::Text { page: Some(p) } => format!("page {}", p),
            Self::Text { page: None } => format!("part {}", seq + 1),
            Self::Table {
                sheet,
                row_start,
                row_end,
            } => {
                if row_start == row_end {
                    format!("{} row {}", sheet, row_start)
                } else {
                    format!("{} rows {}-{}", sheet, row_start, row_end)
                }
            }
        }
    }
}

/// A chunk of a document, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Parent document.
    pub doc_id: Ulid,

    /// Owning workspace (denormalized for index-side tenancy filtering).
    pub workspace_id: Ulid,

    /// Sequence index within the document (0-based, contiguous).
    pub seq: u32,

    /// Chunk text, including any leading overlap carried from the
    /// previous chunk.
    pub content: String,

    /// Approximate token count.
    pub token_count: u32,

    /// Byte length of the leading overlap prefix. Stripping it from every
    /// chunk and concatenating reconstructs the original span text.
    pub overlap_len: u32,

    /// Structural provenance.
    pub provenance: Provenance,

    /// Embedding model version this chunk's vector was computed with,
    /// or None while the chunk is not yet embedded.
    pub embedded_model: Option<String>,
}

impl Chunk {
    pub fn new(
        doc_id: Ulid,
        workspace_id: Ulid,
        seq: u32,
        content: &str,
        token_count: u32,
        overlap_len: u32,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: Ulid::new(),
            doc_id,
            workspace_id,
            seq,
            content: content.to_string(),
            token_count,
            overlap_len,
            provenance,
            embedded_model: None,
        }
    }

    /// Human-readable provenance label.
    pub fn provenance_label(&self) -> String {
        self.provenance.label(self.seq)
    }
}

/// A chunk draft produced by the chunker, before ID assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub token_count: u32,
    /// Byte length of the leading overlap prefix.
    pub overlap_len: u32,
    pub provenance: Provenance,
}

/// Message direction relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

/// What grounded an AI-generated reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationTrace {
    /// Chunks whose content was included in the prompt.
    #[serde(default)]
    pub snippet_chunks: Vec<Ulid>,

    /// Workflow step in progress at composition time.
    #[serde(default)]
    pub active_step: Option<Ulid>,
}

/// A single message in a chat. Immutable once created; conversation order
/// is timestamp then id (ULIDs are time-ordered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Owning chat.
    pub chat_id: Ulid,

    /// Direction relative to the platform.
    pub direction: Direction,

    /// Message text.
    pub content: String,

    /// Timestamp (Unix millis).
    pub created_at: u64,

    /// Generation metadata, present on AI-generated outgoing messages.
    pub generation: Option<GenerationTrace>,
}

impl Message {
    pub fn incoming(chat_id: Ulid, content: &str, created_at: u64) -> Self {
        Self {
            id: Ulid::new(),
            chat_id,
            direction: Direction::Incoming,
            content: content.to_string(),
            created_at,
            generation: None,
        }
    }

    pub fn outgoing(chat_id: Ulid, content: &str, generation: Option<GenerationTrace>) -> Self {
        Self {
            id: Ulid::new(),
            chat_id,
            direction: Direction::Outgoing,
            content: content.to_string(),
            created_at: now_millis(),
            generation,
        }
    }
}

/// Derived qualification status of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    InProgress,
    Qualified,
    Unqualified,
}

impl QualificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Qualified => "qualified",
            Self::Unqualified => "unqualified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "qualified" => Some(Self::Qualified),
            "unqualified" => Some(Self::Unqualified),
            _ => None,
        }
    }
}

/// A chat with one customer identity, scoped to a workspace and phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Owning workspace.
    pub workspace_id: Ulid,

    /// Customer phone number.
    pub phone: String,

    /// Whether AI replies are enabled. When off the chat is in manual mode.
    pub ai_enabled: bool,

    /// Stored qualification status, updated only on change.
    pub qualification: QualificationStatus,

    /// Set when the last generation attempt failed and the turn awaits retry.
    pub pending_retry: bool,

    /// Workflow template version this chat is pinned to. Template updates
    /// never retroactively alter recorded progress.
    pub workflow_version: u32,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,

    /// Last activity timestamp (Unix millis).
    pub last_activity_at: u64,
}

impl Chat {
    pub fn new(workspace_id: Ulid, phone: &str, workflow_version: u32) -> Self {
        let now = now_millis();
        Self {
            id: Ulid::new(),
            workspace_id,
            phone: phone.to_string(),
            ai_enabled: true,
            qualification: QualificationStatus::InProgress,
            pending_retry: false,
            workflow_version,
            created_at: now,
            last_activity_at: now,
        }
    }
}

/// One step of a workspace workflow template. Templates are versioned;
/// a step row belongs to exactly one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Owning workspace.
    pub workspace_id: Ulid,

    /// Template version this step belongs to.
    pub version: u32,

    /// Position within the template (0-based).
    pub position: u32,

    /// Step description, surfaced in prompts to steer the conversation.
    pub description: String,

    /// Required steps gate qualification.
    pub required: bool,

    /// Completion keywords for the keyword predicate. Case-insensitive.
    pub keywords: Vec<String>,
}

impl WorkflowStep {
    pub fn new(
        workspace_id: Ulid,
        version: u32,
        position: u32,
        description: &str,
        required: bool,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            workspace_id,
            version,
            position,
            description: description.to_string(),
            required,
            keywords,
        }
    }
}

/// Per-step completion state. Completed and skipped are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    Completed,
    Skipped,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Terminal states never regress.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted)
    }
}

/// Recorded progress of one chat against one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub step_id: Ulid,
    pub state: StepState,
    /// The message that triggered the transition, if any.
    pub message_id: Option<Ulid>,
    pub updated_at: u64,
}

/// A grounded snippet returned by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub chunk_id: Ulid,
    pub doc_id: Ulid,
    /// Cosine similarity to the query (higher is better).
    pub score: f32,
    pub content: String,
    /// Human-readable provenance, e.g. "Sheet2 rows 10-14".
    pub provenance: String,
}

/// Statistics about the engine's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub workspaces: u64,
    pub documents: u64,
    pub chunks: u64,
    pub embedded_chunks: u64,
    pub chats: u64,
    pub messages: u64,
    pub storage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_tag() {
        assert_eq!(DocumentFormat::from_tag("txt"), Some(DocumentFormat::PlainText));
        assert_eq!(DocumentFormat::from_tag("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_tag("xlsx"), Some(DocumentFormat::Workbook));
        assert_eq!(DocumentFormat::from_tag("docx"), None);
    }

    #[test]
    fn test_provenance_labels() {
        let table = Provenance::Table {
            sheet: "Sheet2".to_string(),
            row_start: 10,
            row_end: 14,
        };
        assert_eq!(table.label(0), "Sheet2 rows 10-14");

        let page = Provenance::Text { page: Some(3) };
        assert_eq!(page.label(7), "page 3");

        let plain = Provenance::Text { page: None };
        assert_eq!(plain.label(4), "part 5");
    }

    #[test]
    fn test_step_state_terminality() {
        assert!(!StepState::NotStarted.is_terminal());
        assert!(StepState::Completed.is_terminal());
        assert!(StepState::Skipped.is_terminal());
    }

    #[test]
    fn test_document_hash() {
        let ws = Ulid::new();
        let a = Document::new(ws, DocumentFormat::PlainText, b"hello");
        let b = Document::new(ws, DocumentFormat::PlainText, b"hello");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.status, DocumentStatus::Pending);
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Parsed,
            DocumentStatus::Embedded,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_str(s.as_str()), Some(s));
        }
    }
}
