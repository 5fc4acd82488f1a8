//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};
use ulid::Ulid;

use convoq_core::{
    Chat, Chunk, ConvoqError, Direction, Document, DocumentFormat, DocumentStatus, Message,
    ProgressRecord, QualificationStatus, Result, Stats, StepState, Store, WorkflowStep, Workspace,
};

use crate::schema::{vec_schema, SCHEMA, SCHEMA_VERSION};

/// Registers sqlite-vec as an auto extension for every new connection.
fn register_vec_extension() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// SQLite-based store implementation.
///
/// Uses a blocking Mutex for thread-safe access; statement work is short
/// enough that holding it across a call is fine for this workload.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,

    /// Vector dimension the vec table was created with.
    dimension: usize,
}

// Connection is protected by the Mutex.
unsafe impl Send for SqliteStore {}
unsafe impl Sync for SqliteStore {}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        register_vec_extension();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ConvoqError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, dimension, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()
            .map_err(|e| ConvoqError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, dimension, Path::new(":memory:"))
    }

    fn init(conn: Connection, dimension: usize, path: &Path) -> Result<Self> {
        Self::configure_connection(&conn)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvoqError::database(format!("Failed to initialize schema: {}", e)))?;

        conn.execute_batch(&vec_schema(dimension))
            .map_err(|e| ConvoqError::database(format!("Failed to create vec table: {}", e)))?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| ConvoqError::database(format!("Failed to set schema version: {}", e)))?;

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| ConvoqError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Vector dimension this store indexes.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConvoqError::database(e.to_string()))?;
        f(&conn)
    }
}

#[async_trait]
impl Store for SqliteStore {
    // Workspace operations

    async fn create_workspace(&self, workspace: Workspace) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO workspaces (id, name, prompt_instructions, bot_name,
                                        workflow_version, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    workspace.id.to_string(),
                    workspace.name,
                    workspace.prompt_instructions,
                    workspace.bot_name,
                    workspace.workflow_version,
                    workspace.created_at as i64,
                ],
            )
            .map_err(|e| ConvoqError::database(format!("Failed to create workspace: {}", e)))?;

            debug!("Created workspace: {}", workspace.id);
            Ok(())
        })
    }

    async fn get_workspace(&self, id: Ulid) -> Result<Option<Workspace>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, name, prompt_instructions, bot_name, workflow_version, created_at
                    FROM workspaces WHERE id = ?1
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![id.to_string()], Self::row_to_workspace)
                .optional()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(result)
        })
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, name, prompt_instructions, bot_name, workflow_version, created_at
                    FROM workspaces ORDER BY created_at
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let workspaces = stmt
                .query_map([], Self::row_to_workspace)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(workspaces)
        })
    }

    async fn update_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    r#"
                    UPDATE workspaces
                    SET name = ?2, prompt_instructions = ?3, bot_name = ?4, workflow_version = ?5
                    WHERE id = ?1
                    "#,
                    params![
                        workspace.id.to_string(),
                        workspace.name,
                        workspace.prompt_instructions,
                        workspace.bot_name,
                        workspace.workflow_version,
                    ],
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            if updated == 0 {
                return Err(ConvoqError::WorkspaceNotFound {
                    id: workspace.id.to_string(),
                });
            }
            Ok(())
        })
    }

    // Document operations

    async fn insert_document(&self, doc: Document) -> Result<()> {
        let content_hash = doc.content_hash.map(|h| h.to_vec());

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO documents (id, workspace_id, format, byte_size, content_hash,
                                       status, error, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    doc.id.to_string(),
                    doc.workspace_id.to_string(),
                    doc.format.to_string(),
                    doc.byte_size as i64,
                    content_hash,
                    doc.status.as_str(),
                    doc.error,
                    doc.created_at as i64,
                ],
            )
            .map_err(|e| ConvoqError::database(format!("Failed to insert document: {}", e)))?;

            debug!("Inserted document: {}", doc.id);
            Ok(())
        })
    }

    async fn get_document(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, format, byte_size, content_hash, status, error, created_at
                    FROM documents WHERE id = ?1 AND workspace_id = ?2
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let result = stmt
                .query_row(
                    params![id.to_string(), workspace_id.to_string()],
                    Self::row_to_document,
                )
                .optional()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(result)
        })
    }

    async fn list_documents(&self, workspace_id: Ulid) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, format, byte_size, content_hash, status, error, created_at
                    FROM documents
                    WHERE workspace_id = ?1
                    ORDER BY created_at DESC
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let documents = stmt
                .query_map(params![workspace_id.to_string()], Self::row_to_document)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(documents)
        })
    }

    async fn set_document_status(
        &self,
        id: Ulid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = error.map(String::from);
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE documents SET status = ?2, error = ?3 WHERE id = ?1",
                    params![id.to_string(), status.as_str(), error],
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            if updated == 0 {
                return Err(ConvoqError::DocumentNotFound { id: id.to_string() });
            }

            debug!("Document {} status -> {}", id, status.as_str());
            Ok(())
        })
    }

    async fn delete_document(&self, workspace_id: Ulid, id: Ulid) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            tx.execute(
                "DELETE FROM vec_chunks WHERE chunk_id IN (SELECT id FROM chunks WHERE doc_id = ?1)",
                params![id.to_string()],
            )
            .map_err(|e| ConvoqError::database(e.to_string()))?;

            // Chunks go via CASCADE
            let deleted = tx
                .execute(
                    "DELETE FROM documents WHERE id = ?1 AND workspace_id = ?2",
                    params![id.to_string(), workspace_id.to_string()],
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            if deleted == 0 {
                return Err(ConvoqError::DocumentNotFound { id: id.to_string() });
            }

            tx.commit().map_err(|e| ConvoqError::database(e.to_string()))?;

            debug!("Deleted document: {}", id);
            Ok(())
        })
    }

    // Chunk operations

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let rows: Vec<(Chunk, String)> = chunks
            .iter()
            .map(|c| Ok((c.clone(), serde_json::to_string(&c.provenance)?)))
            .collect::<Result<_>>()?;

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO chunks (id, doc_id, workspace_id, seq, content,
                                            token_count, overlap_len, provenance, embedded_model)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        "#,
                    )
                    .map_err(|e| ConvoqError::database(e.to_string()))?;

                for (chunk, provenance) in &rows {
                    stmt.execute(params![
                        chunk.id.to_string(),
                        chunk.doc_id.to_string(),
                        chunk.workspace_id.to_string(),
                        chunk.seq,
                        chunk.content,
                        chunk.token_count,
                        chunk.overlap_len,
                        provenance,
                        chunk.embedded_model,
                    ])
                    .map_err(|e| ConvoqError::database(format!("Failed to insert chunk: {}", e)))?;
                }
            }

            tx.commit().map_err(|e| ConvoqError::database(e.to_string()))?;

            debug!("Inserted {} chunks", rows.len());
            Ok(())
        })
    }

    async fn chunks_for_document(&self, doc_id: Ulid) -> Result<Vec<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, doc_id, workspace_id, seq, content, token_count,
                           overlap_len, provenance, embedded_model
                    FROM chunks WHERE doc_id = ?1 ORDER BY seq
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![doc_id.to_string()], Self::row_to_chunk)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(chunks)
        })
    }

    async fn unembedded_chunks(&self, doc_id: Ulid) -> Result<Vec<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, doc_id, workspace_id, seq, content, token_count,
                           overlap_len, provenance, embedded_model
                    FROM chunks
                    WHERE doc_id = ?1 AND embedded_model IS NULL
                    ORDER BY seq
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![doc_id.to_string()], Self::row_to_chunk)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(chunks)
        })
    }

    async fn get_chunk(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Chunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, doc_id, workspace_id, seq, content, token_count,
                           overlap_len, provenance, embedded_model
                    FROM chunks WHERE id = ?1 AND workspace_id = ?2
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let result = stmt
                .query_row(
                    params![id.to_string(), workspace_id.to_string()],
                    Self::row_to_chunk,
                )
                .optional()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(result)
        })
    }

    // Vector index operations

    async fn upsert_embeddings(
        &self,
        entries: &[(Ulid, Vec<f32>)],
        workspace_id: Ulid,
        model_version: &str,
    ) -> Result<()> {
        for (id, vector) in entries {
            if vector.len() != self.dimension {
                return Err(ConvoqError::invalid_argument(format!(
                    "vector for chunk {} has dimension {}, index expects {}",
                    id,
                    vector.len(),
                    self.dimension
                )));
            }
        }

        let workspace = workspace_id.to_string();
        let model = model_version.to_string();

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            {
                let mut delete = tx
                    .prepare("DELETE FROM vec_chunks WHERE chunk_id = ?1")
                    .map_err(|e| ConvoqError::database(e.to_string()))?;
                let mut insert = tx
                    .prepare(
                        "INSERT INTO vec_chunks (chunk_id, workspace_id, embedding) VALUES (?1, ?2, ?3)",
                    )
                    .map_err(|e| ConvoqError::database(e.to_string()))?;
                let mut mark = tx
                    .prepare(
                        "UPDATE chunks SET embedded_model = ?3 WHERE id = ?1 AND workspace_id = ?2",
                    )
                    .map_err(|e| ConvoqError::database(e.to_string()))?;

                for (id, vector) in entries {
                    let marked = mark
                        .execute(params![id.to_string(), workspace, model])
                        .map_err(|e| ConvoqError::database(e.to_string()))?;
                    if marked == 0 {
                        return Err(ConvoqError::tenancy_violation(format!(
                            "chunk {} does not belong to workspace {}",
                            id, workspace
                        )));
                    }

                    // Last writer wins per chunk id.
                    delete
                        .execute(params![id.to_string()])
                        .map_err(|e| ConvoqError::database(e.to_string()))?;
                    insert
                        .execute(params![id.to_string(), workspace, Self::vec_to_bytes(vector)])
                        .map_err(|e| {
                            ConvoqError::database(format!("Failed to insert embedding: {}", e))
                        })?;
                }
            }

            tx.commit().map_err(|e| ConvoqError::database(e.to_string()))?;

            debug!("Upserted {} embeddings", entries.len());
            Ok(())
        })
    }

    async fn vector_search(
        &self,
        workspace_id: Ulid,
        vector: &[f32],
        k: u32,
        model_version: &str,
    ) -> Result<Vec<(Ulid, f32)>> {
        if vector.len() != self.dimension {
            return Err(ConvoqError::invalid_argument(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let embedding_bytes = Self::vec_to_bytes(vector);
        let workspace = workspace_id.to_string();
        let model = model_version.to_string();

        self.with_conn(move |conn| {
            // The k constraint must sit on the vec0 scan itself; pushed
            // through a join it never reaches the virtual table and the
            // KNN query is rejected. Filter by model on the join after.
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT v.chunk_id, v.distance
                    FROM (
                        SELECT chunk_id, distance
                        FROM vec_chunks
                        WHERE embedding MATCH ?1
                        AND workspace_id = ?2
                        AND k = ?4
                        ORDER BY distance
                    ) v
                    JOIN chunks c ON c.id = v.chunk_id
                    WHERE c.embedded_model = ?3
                    ORDER BY v.distance
                    "#,
                )
                .map_err(|e| ConvoqError::retrieval_degraded(e.to_string()))?;

            let rows = stmt
                .query_map(params![embedding_bytes, workspace, model, k], |row| {
                    let id_str: String = row.get(0)?;
                    let distance: f64 = row.get(1)?;
                    let similarity = 1.0 - distance as f32;
                    Ok((
                        Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
                        similarity,
                    ))
                })
                .map_err(|e| ConvoqError::retrieval_degraded(e.to_string()))?;

            let results: Vec<_> = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::retrieval_degraded(e.to_string()))?;

            Ok(results)
        })
    }

    // Chat operations

    async fn create_chat(&self, chat: Chat) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO chats (id, workspace_id, phone, ai_enabled, qualification,
                                   pending_retry, workflow_version, created_at, last_activity_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    chat.id.to_string(),
                    chat.workspace_id.to_string(),
                    chat.phone,
                    chat.ai_enabled,
                    chat.qualification.as_str(),
                    chat.pending_retry,
                    chat.workflow_version,
                    chat.created_at as i64,
                    chat.last_activity_at as i64,
                ],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    ConvoqError::invalid_argument(format!(
                        "chat already exists for phone {} in this workspace",
                        chat.phone
                    ))
                } else {
                    ConvoqError::database(format!("Failed to create chat: {}", e))
                }
            })?;

            debug!("Created chat: {}", chat.id);
            Ok(())
        })
    }

    async fn get_chat(&self, workspace_id: Ulid, id: Ulid) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, phone, ai_enabled, qualification, pending_retry,
                           workflow_version, created_at, last_activity_at
                    FROM chats WHERE id = ?1 AND workspace_id = ?2
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let result = stmt
                .query_row(
                    params![id.to_string(), workspace_id.to_string()],
                    Self::row_to_chat,
                )
                .optional()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(result)
        })
    }

    async fn find_chat_by_phone(&self, workspace_id: Ulid, phone: &str) -> Result<Option<Chat>> {
        let phone = phone.to_string();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, phone, ai_enabled, qualification, pending_retry,
                           workflow_version, created_at, last_activity_at
                    FROM chats WHERE workspace_id = ?1 AND phone = ?2
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![workspace_id.to_string(), phone], Self::row_to_chat)
                .optional()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(result)
        })
    }

    async fn update_chat(&self, chat: &Chat) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    r#"
                    UPDATE chats
                    SET ai_enabled = ?3, qualification = ?4, pending_retry = ?5,
                        last_activity_at = ?6
                    WHERE id = ?1 AND workspace_id = ?2
                    "#,
                    params![
                        chat.id.to_string(),
                        chat.workspace_id.to_string(),
                        chat.ai_enabled,
                        chat.qualification.as_str(),
                        chat.pending_retry,
                        chat.last_activity_at as i64,
                    ],
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            if updated == 0 {
                return Err(ConvoqError::ChatNotFound {
                    id: chat.id.to_string(),
                });
            }
            Ok(())
        })
    }

    async fn list_chats(&self, workspace_id: Ulid) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, phone, ai_enabled, qualification, pending_retry,
                           workflow_version, created_at, last_activity_at
                    FROM chats WHERE workspace_id = ?1
                    ORDER BY last_activity_at DESC
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let chats = stmt
                .query_map(params![workspace_id.to_string()], Self::row_to_chat)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(chats)
        })
    }

    // Conversation memory

    async fn append_message(&self, message: Message) -> Result<()> {
        let generation = message
            .generation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            tx.execute(
                r#"
                INSERT INTO messages (id, chat_id, direction, content, created_at, generation)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.direction.as_str(),
                    message.content,
                    message.created_at as i64,
                    generation,
                ],
            )
            .map_err(|e| ConvoqError::database(format!("Failed to append message: {}", e)))?;

            let touched = tx
                .execute(
                    "UPDATE chats SET last_activity_at = MAX(last_activity_at, ?2) WHERE id = ?1",
                    params![message.chat_id.to_string(), message.created_at as i64],
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            if touched == 0 {
                return Err(ConvoqError::ChatNotFound {
                    id: message.chat_id.to_string(),
                });
            }

            tx.commit().map_err(|e| ConvoqError::database(e.to_string()))?;
            Ok(())
        })
    }

    async fn recent_messages(&self, chat_id: Ulid, max_turns: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, chat_id, direction, content, created_at, generation
                    FROM messages WHERE chat_id = ?1
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT ?2
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let mut messages = stmt
                .query_map(params![chat_id.to_string(), max_turns], Self::row_to_message)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            messages.reverse();
            Ok(messages)
        })
    }

    async fn all_messages(&self, chat_id: Ulid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, chat_id, direction, content, created_at, generation
                    FROM messages WHERE chat_id = ?1
                    ORDER BY created_at, rowid
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let messages = stmt
                .query_map(params![chat_id.to_string()], Self::row_to_message)
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(messages)
        })
    }

    async fn count_messages(&self, chat_id: Ulid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                    params![chat_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;
            Ok(count)
        })
    }

    // Workflow operations

    async fn insert_workflow_steps(&self, steps: &[WorkflowStep]) -> Result<()> {
        let rows: Vec<(WorkflowStep, String)> = steps
            .iter()
            .map(|s| Ok((s.clone(), serde_json::to_string(&s.keywords)?)))
            .collect::<Result<_>>()?;

        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT INTO workflow_steps (id, workspace_id, version, position,
                                                    description, required, keywords)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        "#,
                    )
                    .map_err(|e| ConvoqError::database(e.to_string()))?;

                for (step, keywords) in &rows {
                    stmt.execute(params![
                        step.id.to_string(),
                        step.workspace_id.to_string(),
                        step.version,
                        step.position,
                        step.description,
                        step.required,
                        keywords,
                    ])
                    .map_err(|e| {
                        ConvoqError::database(format!("Failed to insert workflow step: {}", e))
                    })?;
                }
            }

            tx.commit().map_err(|e| ConvoqError::database(e.to_string()))?;

            debug!("Inserted {} workflow steps", rows.len());
            Ok(())
        })
    }

    async fn workflow_steps(&self, workspace_id: Ulid, version: u32) -> Result<Vec<WorkflowStep>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, workspace_id, version, position, description, required, keywords
                    FROM workflow_steps
                    WHERE workspace_id = ?1 AND version = ?2
                    ORDER BY position
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let steps = stmt
                .query_map(
                    params![workspace_id.to_string(), version],
                    Self::row_to_step,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(steps)
        })
    }

    async fn workflow_progress(&self, chat_id: Ulid) -> Result<Vec<ProgressRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT step_id, state, message_id, updated_at
                    FROM workflow_progress WHERE chat_id = ?1
                    "#,
                )
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            let records = stmt
                .query_map(params![chat_id.to_string()], |row| {
                    let step_id: String = row.get(0)?;
                    let state: String = row.get(1)?;
                    let message_id: Option<String> = row.get(2)?;
                    Ok(ProgressRecord {
                        step_id: Ulid::from_string(&step_id).unwrap_or_else(|_| Ulid::nil()),
                        state: StepState::from_str(&state).unwrap_or(StepState::NotStarted),
                        message_id: message_id
                            .and_then(|s| Ulid::from_string(&s).ok()),
                        updated_at: row.get::<_, i64>(3)? as u64,
                    })
                })
                .map_err(|e| ConvoqError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ConvoqError::database(e.to_string()))?;

            Ok(records)
        })
    }

    async fn record_step_progress(&self, chat_id: Ulid, record: &ProgressRecord) -> Result<()> {
        self.with_conn(|conn| {
            // Terminal states stick: the upsert only replaces not_started.
            conn.execute(
                r#"
                INSERT INTO workflow_progress (chat_id, step_id, state, message_id, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(chat_id, step_id) DO UPDATE SET
                    state = excluded.state,
                    message_id = excluded.message_id,
                    updated_at = excluded.updated_at
                WHERE workflow_progress.state = 'not_started'
                "#,
                params![
                    chat_id.to_string(),
                    record.step_id.to_string(),
                    record.state.as_str(),
                    record.message_id.map(|m| m.to_string()),
                    record.updated_at as i64,
                ],
            )
            .map_err(|e| ConvoqError::database(e.to_string()))?;
            Ok(())
        })
    }

    // Stats

    async fn stats(&self) -> Result<Stats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(|e| ConvoqError::database(e.to_string()))
            };

            let workspaces = count("SELECT COUNT(*) FROM workspaces")?;
            let documents = count("SELECT COUNT(*) FROM documents")?;
            let chunks = count("SELECT COUNT(*) FROM chunks")?;
            let embedded_chunks =
                count("SELECT COUNT(*) FROM chunks WHERE embedded_model IS NOT NULL")?;
            let chats = count("SELECT COUNT(*) FROM chats")?;
            let messages = count("SELECT COUNT(*) FROM messages")?;

            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(Stats {
                workspaces,
                documents,
                chunks,
                embedded_chunks,
                chats,
                messages,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

// Helper methods
impl SqliteStore {
    fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
        let id_str: String = row.get(0)?;
        Ok(Workspace {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            name: row.get(1)?,
            prompt_instructions: row.get(2)?,
            bot_name: row.get(3)?,
            workflow_version: row.get(4)?,
            created_at: row.get::<_, i64>(5)? as u64,
        })
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let id_str: String = row.get(0)?;
        let workspace_str: String = row.get(1)?;
        let format_str: String = row.get(2)?;
        let content_hash: Option<Vec<u8>> = row.get(4)?;
        let status_str: String = row.get(5)?;

        Ok(Document {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            workspace_id: Ulid::from_string(&workspace_str).unwrap_or_else(|_| Ulid::nil()),
            format: DocumentFormat::from_tag(&format_str).unwrap_or(DocumentFormat::PlainText),
            byte_size: row.get::<_, i64>(3)? as u64,
            content_hash: content_hash.and_then(|v| v.try_into().ok()),
            status: DocumentStatus::from_str(&status_str).unwrap_or(DocumentStatus::Pending),
            error: row.get(6)?,
            created_at: row.get::<_, i64>(7)? as u64,
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let id_str: String = row.get(0)?;
        let doc_str: String = row.get(1)?;
        let workspace_str: String = row.get(2)?;
        let provenance_str: String = row.get(7)?;

        Ok(Chunk {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            doc_id: Ulid::from_string(&doc_str).unwrap_or_else(|_| Ulid::nil()),
            workspace_id: Ulid::from_string(&workspace_str).unwrap_or_else(|_| Ulid::nil()),
            seq: row.get(3)?,
            content: row.get(4)?,
            token_count: row.get(5)?,
            overlap_len: row.get(6)?,
            provenance: serde_json::from_str(&provenance_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
            })?,
            embedded_model: row.get(8)?,
        })
    }

    fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
        let id_str: String = row.get(0)?;
        let workspace_str: String = row.get(1)?;
        let qualification_str: String = row.get(4)?;

        Ok(Chat {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            workspace_id: Ulid::from_string(&workspace_str).unwrap_or_else(|_| Ulid::nil()),
            phone: row.get(2)?,
            ai_enabled: row.get(3)?,
            qualification: QualificationStatus::from_str(&qualification_str)
                .unwrap_or(QualificationStatus::InProgress),
            pending_retry: row.get(5)?,
            workflow_version: row.get(6)?,
            created_at: row.get::<_, i64>(7)? as u64,
            last_activity_at: row.get::<_, i64>(8)? as u64,
        })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let id_str: String = row.get(0)?;
        let chat_str: String = row.get(1)?;
        let direction_str: String = row.get(2)?;
        let generation_str: Option<String> = row.get(5)?;

        Ok(Message {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            chat_id: Ulid::from_string(&chat_str).unwrap_or_else(|_| Ulid::nil()),
            direction: Direction::from_str(&direction_str).unwrap_or(Direction::Incoming),
            content: row.get(3)?,
            created_at: row.get::<_, i64>(4)? as u64,
            generation: generation_str.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowStep> {
        let id_str: String = row.get(0)?;
        let workspace_str: String = row.get(1)?;
        let keywords_str: String = row.get(6)?;

        Ok(WorkflowStep {
            id: Ulid::from_string(&id_str).unwrap_or_else(|_| Ulid::nil()),
            workspace_id: Ulid::from_string(&workspace_str).unwrap_or_else(|_| Ulid::nil()),
            version: row.get(2)?,
            position: row.get(3)?,
            description: row.get(4)?,
            required: row.get(5)?,
            keywords: serde_json::from_str(&keywords_str).unwrap_or_default(),
        })
    }

    /// Convert f32 vector to bytes (little-endian).
    fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|f| f.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoq_core::{now_millis, Provenance};

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    async fn workspace_with_chunks(
        store: &SqliteStore,
        texts: &[&str],
    ) -> (Workspace, Document, Vec<Chunk>) {
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();

        let doc = Document::new(workspace.id, DocumentFormat::PlainText, b"payload");
        store.insert_document(doc.clone()).await.unwrap();

        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Chunk::new(
                    doc.id,
                    workspace.id,
                    i as u32,
                    t,
                    4,
                    0,
                    Provenance::Text { page: Some(1) },
                )
            })
            .collect();
        store.insert_chunks(&chunks).await.unwrap();

        (workspace, doc, chunks)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(4).unwrap();
        assert!(store.list_workspaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convoq.db");

        let workspace = Workspace::new("durable");
        {
            let store = SqliteStore::open(&path, 4).unwrap();
            store.create_workspace(workspace.clone()).await.unwrap();
        }

        let store = SqliteStore::open(&path, 4).unwrap();
        let got = store.get_workspace(workspace.id).await.unwrap().unwrap();
        assert_eq!(got.name, "durable");
    }

    #[tokio::test]
    async fn test_workspace_crud() {
        let store = SqliteStore::open_memory(4).unwrap();

        let mut workspace = Workspace::new("acme");
        workspace.prompt_instructions = "Be brief.".to_string();
        store.create_workspace(workspace.clone()).await.unwrap();

        let got = store.get_workspace(workspace.id).await.unwrap().unwrap();
        assert_eq!(got.name, "acme");
        assert_eq!(got.prompt_instructions, "Be brief.");
        assert_eq!(got.workflow_version, 0);

        workspace.bot_name = Some("Ada".to_string());
        workspace.workflow_version = 2;
        store.update_workspace(&workspace).await.unwrap();

        let got = store.get_workspace(workspace.id).await.unwrap().unwrap();
        assert_eq!(got.bot_name.as_deref(), Some("Ada"));
        assert_eq!(got.workflow_version, 2);
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();

        let doc = Document::new(workspace.id, DocumentFormat::Pdf, b"%PDF-1.4");
        store.insert_document(doc.clone()).await.unwrap();

        let got = store
            .get_document(workspace.id, doc.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.status, DocumentStatus::Pending);
        assert_eq!(got.content_hash, doc.content_hash);

        store
            .set_document_status(doc.id, DocumentStatus::Failed, Some("provider down"))
            .await
            .unwrap();
        let got = store
            .get_document(workspace.id, doc.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.status, DocumentStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("provider down"));

        // Scoped read from another workspace sees nothing
        let other = Workspace::new("other");
        store.create_workspace(other.clone()).await.unwrap();
        assert!(store.get_document(other.id, doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unembedded_chunks_shrink_as_vectors_land() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, doc, chunks) =
            workspace_with_chunks(&store, &["one", "two", "three"]).await;

        assert_eq!(store.unembedded_chunks(doc.id).await.unwrap().len(), 3);

        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 0))], workspace.id, "m1")
            .await
            .unwrap();

        let remaining = store.unembedded_chunks(doc.id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].seq, 1);
    }

    #[tokio::test]
    async fn test_vector_search_is_workspace_scoped() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (ws_a, _, chunks_a) = workspace_with_chunks(&store, &["alpha"]).await;
        let (ws_b, _, chunks_b) = workspace_with_chunks(&store, &["beta"]).await;

        store
            .upsert_embeddings(&[(chunks_a[0].id, unit(4, 0))], ws_a.id, "m1")
            .await
            .unwrap();
        store
            .upsert_embeddings(&[(chunks_b[0].id, unit(4, 0))], ws_b.id, "m1")
            .await
            .unwrap();

        let hits = store.vector_search(ws_a.id, &unit(4, 0), 10, "m1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, chunks_a[0].id);
        assert!(hits[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_and_bounds_candidates() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, _, chunks) =
            workspace_with_chunks(&store, &["exact", "close", "far"]).await;

        let diag = {
            let n = (2.0f32).sqrt().recip();
            vec![n, n, 0.0, 0.0]
        };
        store
            .upsert_embeddings(
                &[
                    (chunks[0].id, unit(4, 0)),
                    (chunks[1].id, diag),
                    (chunks[2].id, unit(4, 1)),
                ],
                workspace.id,
                "m1",
            )
            .await
            .unwrap();

        let hits = store
            .vector_search(workspace.id, &unit(4, 0), 2, "m1")
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, chunks[0].id);
        assert_eq!(hits[1].0, chunks[1].id);
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_vector_search_skips_other_model_versions() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, _, chunks) = workspace_with_chunks(&store, &["alpha", "beta"]).await;

        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 0))], workspace.id, "m1")
            .await
            .unwrap();
        store
            .upsert_embeddings(&[(chunks[1].id, unit(4, 0))], workspace.id, "m2")
            .await
            .unwrap();

        let hits = store
            .vector_search(workspace.id, &unit(4, 0), 10, "m2")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, chunks[1].id);
    }

    #[tokio::test]
    async fn test_upsert_rejects_foreign_chunks() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (_, _, chunks_a) = workspace_with_chunks(&store, &["alpha"]).await;
        let (ws_b, _, _) = workspace_with_chunks(&store, &["beta"]).await;

        let err = store
            .upsert_embeddings(&[(chunks_a[0].id, unit(4, 0))], ws_b.id, "m1")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TENANCY_VIOLATION");
    }

    #[tokio::test]
    async fn test_upsert_is_last_writer_wins() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, _, chunks) = workspace_with_chunks(&store, &["alpha"]).await;

        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 0))], workspace.id, "m1")
            .await
            .unwrap();
        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 1))], workspace.id, "m1")
            .await
            .unwrap();

        let hits = store
            .vector_search(workspace.id, &unit(4, 1), 10, "m1")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_delete_document_removes_chunks_and_vectors() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, doc, chunks) = workspace_with_chunks(&store, &["alpha"]).await;
        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 0))], workspace.id, "m1")
            .await
            .unwrap();

        store.delete_document(workspace.id, doc.id).await.unwrap();

        assert!(store.chunks_for_document(doc.id).await.unwrap().is_empty());
        let hits = store
            .vector_search(workspace.id, &unit(4, 0), 10, "m1")
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_chat_crud_and_phone_lookup() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();

        let chat = Chat::new(workspace.id, "+5511999990000", 1);
        store.create_chat(chat.clone()).await.unwrap();

        let found = store
            .find_chat_by_phone(workspace.id, "+5511999990000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, chat.id);
        assert!(found.ai_enabled);
        assert_eq!(found.qualification, QualificationStatus::InProgress);

        // Duplicate phone in the same workspace is rejected
        let dup = Chat::new(workspace.id, "+5511999990000", 1);
        assert!(store.create_chat(dup).await.is_err());

        let mut updated = found.clone();
        updated.ai_enabled = false;
        updated.qualification = QualificationStatus::Qualified;
        store.update_chat(&updated).await.unwrap();

        let got = store.get_chat(workspace.id, chat.id).await.unwrap().unwrap();
        assert!(!got.ai_enabled);
        assert_eq!(got.qualification, QualificationStatus::Qualified);
    }

    #[tokio::test]
    async fn test_recent_messages_bounded_and_ordered() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        let chat = Chat::new(workspace.id, "+1", 0);
        store.create_chat(chat.clone()).await.unwrap();

        for i in 0..30 {
            let msg = Message::incoming(chat.id, &format!("msg {}", i), now_millis() + i);
            store.append_message(msg).await.unwrap();
        }

        assert_eq!(store.count_messages(chat.id).await.unwrap(), 30);

        let recent = store.recent_messages(chat.id, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "msg 20");
        assert_eq!(recent[9].content, "msg 29");
    }

    #[tokio::test]
    async fn test_messages_order_by_timestamp_not_arrival() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        let chat = Chat::new(workspace.id, "+1", 0);
        store.create_chat(chat.clone()).await.unwrap();

        // Delivered out of order: the later-stamped message arrives first
        let base = now_millis();
        store
            .append_message(Message::incoming(chat.id, "second by time", base + 1000))
            .await
            .unwrap();
        store
            .append_message(Message::incoming(chat.id, "first by time", base))
            .await
            .unwrap();

        let recent = store.recent_messages(chat.id, 10).await.unwrap();
        assert_eq!(recent[0].content, "first by time");
        assert_eq!(recent[1].content, "second by time");
        assert!(recent[0].created_at <= recent[1].created_at);

        let all = store.all_messages(chat.id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first by time");
    }

    #[tokio::test]
    async fn test_generation_trace_round_trip() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        let chat = Chat::new(workspace.id, "+1", 0);
        store.create_chat(chat.clone()).await.unwrap();

        let trace = convoq_core::GenerationTrace {
            snippet_chunks: vec![Ulid::new()],
            active_step: Some(Ulid::new()),
        };
        let msg = Message::outgoing(chat.id, "reply", Some(trace.clone()));
        store.append_message(msg).await.unwrap();

        let recent = store.recent_messages(chat.id, 5).await.unwrap();
        let got = recent[0].generation.as_ref().unwrap();
        assert_eq!(got.snippet_chunks, trace.snippet_chunks);
        assert_eq!(got.active_step, trace.active_step);
    }

    #[tokio::test]
    async fn test_step_progress_is_monotone() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        let chat = Chat::new(workspace.id, "+1", 1);
        store.create_chat(chat.clone()).await.unwrap();

        let step_id = Ulid::new();
        store
            .record_step_progress(
                chat.id,
                &ProgressRecord {
                    step_id,
                    state: StepState::Completed,
                    message_id: None,
                    updated_at: now_millis(),
                },
            )
            .await
            .unwrap();

        // A later attempt to regress is a no-op
        store
            .record_step_progress(
                chat.id,
                &ProgressRecord {
                    step_id,
                    state: StepState::NotStarted,
                    message_id: None,
                    updated_at: now_millis() + 1,
                },
            )
            .await
            .unwrap();

        let progress = store.workflow_progress(chat.id).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].state, StepState::Completed);
    }

    #[tokio::test]
    async fn test_workflow_steps_versioned() {
        let store = SqliteStore::open_memory(4).unwrap();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();

        let v1 = vec![
            WorkflowStep::new(workspace.id, 1, 0, "Ask name", true, vec!["name".into()]),
            WorkflowStep::new(workspace.id, 1, 1, "Ask budget", true, vec!["budget".into()]),
        ];
        let v2 = vec![WorkflowStep::new(
            workspace.id,
            2,
            0,
            "Ask email",
            true,
            vec!["email".into()],
        )];
        store.insert_workflow_steps(&v1).await.unwrap();
        store.insert_workflow_steps(&v2).await.unwrap();

        let steps = store.workflow_steps(workspace.id, 1).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].description, "Ask name");
        assert_eq!(steps[1].position, 1);

        let steps = store.workflow_steps(workspace.id, 2).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].keywords, vec!["email".to_string()]);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = SqliteStore::open_memory(4).unwrap();
        let (workspace, _, chunks) = workspace_with_chunks(&store, &["a", "b"]).await;
        store
            .upsert_embeddings(&[(chunks[0].id, unit(4, 0))], workspace.id, "m1")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.workspaces, 1);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.embedded_chunks, 1);
        assert!(stats.storage_bytes > 0);
    }
}
