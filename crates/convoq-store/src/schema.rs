//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Workspaces table (tenancy root)
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    prompt_instructions TEXT NOT NULL DEFAULT '',
    bot_name TEXT,
    workflow_version INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

-- Documents table
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    format TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    content_hash BLOB,
    status TEXT NOT NULL,
    error TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id);

-- Chunks table
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    workspace_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    content TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    overlap_len INTEGER NOT NULL,
    provenance TEXT NOT NULL,
    embedded_model TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id);
CREATE INDEX IF NOT EXISTS idx_chunks_workspace ON chunks(workspace_id);

-- Chats table
CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    phone TEXT NOT NULL,
    ai_enabled INTEGER NOT NULL DEFAULT 1,
    qualification TEXT NOT NULL,
    pending_retry INTEGER NOT NULL DEFAULT 0,
    workflow_version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    last_activity_at INTEGER NOT NULL,
    UNIQUE(workspace_id, phone)
);

CREATE INDEX IF NOT EXISTS idx_chats_workspace ON chats(workspace_id);

-- Messages table, append-only
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    direction TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    generation TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);

-- Workflow step templates, versioned and immutable
CREATE TABLE IF NOT EXISTS workflow_steps (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    version INTEGER NOT NULL,
    position INTEGER NOT NULL,
    description TEXT NOT NULL,
    required INTEGER NOT NULL,
    keywords TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_steps_workspace_version
    ON workflow_steps(workspace_id, version, position);

-- Per-chat step progress
CREATE TABLE IF NOT EXISTS workflow_progress (
    chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    step_id TEXT NOT NULL,
    state TEXT NOT NULL,
    message_id TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (chat_id, step_id)
);
"#;

/// Schema for the sqlite-vec virtual table. The workspace id is a partition
/// key, so KNN queries are scoped per workspace inside the index itself.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    chunk_id TEXT PRIMARY KEY,
    workspace_id TEXT PARTITION KEY,
    embedding float[{dimension}] distance_metric=cosine
);
"#
    )
}

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
