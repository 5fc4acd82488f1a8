//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::Result;
use crate::types::{
    Chat, Chunk, ChunkDraft, Document, DocumentFormat, DocumentStatus, Message, ParsedSpan,
    ProgressRecord, Stats, Workspace, WorkflowStep,
};

/// Storage layer trait. Every read is workspace-scoped except where an id
/// alone is unambiguous; implementations must never return rows belonging
/// to another workspace.
#[async_trait]
pub trait Store: Send + Sync {
    // Workspace operations
    async fn create_workspace(&self, workspace: Workspace) -> Result<()>;
    async fn get_workspace(&self, id: Ulid) -> Result<Option<Workspace>>;
    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;
    async fn update_workspace(&self, workspace: &Workspace) -> Result<()>;

    // Document operations
    async fn insert_document(&self, doc: Document) -> Result<()>;
    async fn get_document(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Document>>;
    async fn list_documents(&self, workspace_id: Ulid) -> Result<Vec<Document>>;
    async fn set_document_status(
        &self,
        id: Ulid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;
    /// Deletes the document, its chunks, and their vectors.
    async fn delete_document(&self, workspace_id: Ulid, id: Ulid) -> Result<()>;

    // Chunk operations
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn chunks_for_document(&self, doc_id: Ulid) -> Result<Vec<Chunk>>;
    /// Chunks of a document that have no vector yet, in sequence order.
    async fn unembedded_chunks(&self, doc_id: Ulid) -> Result<Vec<Chunk>>;
    async fn get_chunk(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Chunk>>;

    // Vector index operations
    /// Upsert vectors for chunks. Last writer wins per chunk id.
    async fn upsert_embeddings(
        &self,
        entries: &[(Ulid, Vec<f32>)],
        workspace_id: Ulid,
        model_version: &str,
    ) -> Result<()>;
    /// Nearest-neighbor search by cosine similarity, descending. The
    /// workspace filter is part of the index predicate; vectors computed
    /// with a different model version are never matched.
    async fn vector_search(
        &self,
        workspace_id: Ulid,
        vector: &[f32],
        k: u32,
        model_version: &str,
    ) -> Result<Vec<(Ulid, f32)>>;

    // Chat operations
    async fn create_chat(&self, chat: Chat) -> Result<()>;
    async fn get_chat(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Chat>>;
    async fn find_chat_by_phone(&self, workspace_id: Ulid, phone: &str) -> Result<Option<Chat>>;
    async fn update_chat(&self, chat: &Chat) -> Result<()>;
    async fn list_chats(&self, workspace_id: Ulid) -> Result<Vec<Chat>>;

    // Conversation memory
    /// Append a message and touch the chat's last-activity time.
    async fn append_message(&self, message: Message) -> Result<()>;
    /// The most recent `max_turns` messages, oldest first. Bounds prompt
    /// context; older messages stay persisted.
    async fn recent_messages(&self, chat_id: Ulid, max_turns: u32) -> Result<Vec<Message>>;
    /// Every message of the chat in conversation order, oldest first.
    /// Workflow evaluation reads the full accumulated conversation.
    async fn all_messages(&self, chat_id: Ulid) -> Result<Vec<Message>>;
    async fn count_messages(&self, chat_id: Ulid) -> Result<u64>;

    // Workflow operations
    /// Install a workflow template version. Steps are never mutated in
    /// place; a new version replaces the active one for future chats.
    async fn insert_workflow_steps(&self, steps: &[WorkflowStep]) -> Result<()>;
    async fn workflow_steps(&self, workspace_id: Ulid, version: u32) -> Result<Vec<WorkflowStep>>;
    async fn workflow_progress(&self, chat_id: Ulid) -> Result<Vec<ProgressRecord>>;
    /// Record a step transition. Terminal states are never overwritten.
    async fn record_step_progress(&self, chat_id: Ulid, record: &ProgressRecord) -> Result<()>;

    // Stats
    async fn stats(&self) -> Result<Stats>;
}

/// External embedding provider boundary. Provider-versioned; vectors from
/// different model versions are never compared.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. The batch must not exceed `max_batch`.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Provider model version tag, stored alongside vectors.
    fn model_version(&self) -> &str;

    /// Provider-imposed batch size limit.
    fn max_batch(&self) -> usize;
}

/// External language-generation gateway boundary.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a reply for the composed prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model name for diagnostics.
    fn model_name(&self) -> &str;
}

/// One parser variant per document format. Pure transformation: bytes in,
/// ordered spans out, no side effects.
pub trait FormatParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<Vec<ParsedSpan>>;
    fn format(&self) -> DocumentFormat;
}

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,

    /// Tokens of trailing context carried into the next chunk.
    pub overlap_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// Chunking strategy trait. Must be deterministic: identical spans and
/// parameters always yield an identical draft sequence.
pub trait Chunker: Send + Sync {
    fn chunk(&self, spans: &[ParsedSpan], params: &ChunkParams) -> Result<Vec<ChunkDraft>>;
}

/// Pluggable per-step completion condition, evaluated against the
/// accumulated conversation.
pub trait CompletionPredicate: Send + Sync {
    fn satisfied(&self, step: &WorkflowStep, conversation: &[Message]) -> bool;
}
