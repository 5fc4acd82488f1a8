//! The conversation engine.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use convoq_chunk::SpanChunker;
use convoq_core::{
    Chat, Chunk, ChunkParams, Chunker, ConvoqConfig, ConvoqError, Document, DocumentFormat,
    DocumentStatus, EmbeddingProvider, GenerationTrace, Generator, Message, QualificationStatus,
    Result, Store, WorkflowStep, Workspace,
};
use convoq_embed::EmbeddingGateway;
use convoq_retrieve::Retriever;
use convoq_workflow::{KeywordPredicate, WorkflowMachine};

use crate::compose::compose_prompt;

/// One step of a workflow template, as submitted by workspace config.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub description: String,
    pub required: bool,
    pub keywords: Vec<String>,
}

/// Result of one conversational turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub chat_id: Ulid,
    /// None when the chat is in manual mode.
    pub reply: Option<String>,
    pub qualification: QualificationStatus,
}

/// Multi-tenant conversation engine.
pub struct Engine<S: Store> {
    store: Arc<S>,
    gateway: Arc<EmbeddingGateway>,
    retriever: Retriever<S>,
    generator: Arc<dyn Generator>,
    config: ConvoqConfig,
    chat_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl<S: Store> Engine<S> {
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        config: ConvoqConfig,
    ) -> Self {
        let gateway = Arc::new(EmbeddingGateway::new(provider, &config.embedding));
        let retriever = Retriever::new(store.clone(), gateway.clone(), config.retrieval.clone());
        Self {
            store,
            gateway,
            retriever,
            generator,
            config,
            chat_locks: DashMap::new(),
        }
    }

    /// Direct access to the storage layer, for read-side surfaces.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // Workspace operations

    pub async fn create_workspace(
        &self,
        name: &str,
        prompt_instructions: Option<&str>,
        bot_name: Option<&str>,
    ) -> Result<Workspace> {
        let mut workspace = Workspace::new(name);
        if let Some(instructions) = prompt_instructions {
            workspace.prompt_instructions = instructions.to_string();
        }
        workspace.bot_name = bot_name.map(String::from);
        self.store.create_workspace(workspace.clone()).await?;
        info!(workspace = %workspace.id, name, "created workspace");
        Ok(workspace)
    }

    /// Install a new workflow template version. Existing chats stay pinned
    /// to the version they started with.
    pub async fn set_workflow(&self, workspace_id: Ulid, steps: Vec<StepSpec>) -> Result<u32> {
        let mut workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or(ConvoqError::WorkspaceNotFound {
                id: workspace_id.to_string(),
            })?;

        let version = workspace.workflow_version + 1;
        let rows: Vec<WorkflowStep> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                WorkflowStep::new(
                    workspace_id,
                    version,
                    i as u32,
                    &s.description,
                    s.required,
                    s.keywords.clone(),
                )
            })
            .collect();
        self.store.insert_workflow_steps(&rows).await?;

        workspace.workflow_version = version;
        self.store.update_workspace(&workspace).await?;
        info!(workspace = %workspace_id, version, steps = rows.len(), "workflow template installed");
        Ok(version)
    }

    // Document ingestion

    /// Ingest a document: parse, chunk, embed, index.
    ///
    /// Re-ingesting an unchanged payload returns the already-embedded
    /// document untouched. Parse and embedding failures are recorded on
    /// the document rather than surfaced; the returned status tells.
    pub async fn ingest_document(
        &self,
        workspace_id: Ulid,
        raw: &[u8],
        format_tag: &str,
    ) -> Result<Document> {
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or(ConvoqError::WorkspaceNotFound {
                id: workspace_id.to_string(),
            })?;

        let format = DocumentFormat::from_tag(format_tag)
            .ok_or_else(|| ConvoqError::unsupported_format(format_tag))?;

        let doc = Document::new(workspace.id, format, raw);
        for existing in self.store.list_documents(workspace_id).await? {
            if existing.content_hash == doc.content_hash
                && existing.status == DocumentStatus::Embedded
            {
                debug!(document = %existing.id, "payload unchanged, skipping re-ingestion");
                return Ok(existing);
            }
        }

        self.store.insert_document(doc.clone()).await?;

        let spans = match convoq_parse::parse(raw, format) {
            Ok(spans) => spans,
            Err(e @ (ConvoqError::CorruptInput { .. } | ConvoqError::UnsupportedFormat { .. })) => {
                warn!(document = %doc.id, error = %e, "parse failed");
                self.store
                    .set_document_status(doc.id, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                return self.fetch_document(workspace_id, doc.id).await;
            }
            Err(e) => return Err(e),
        };

        let params = ChunkParams {
            max_tokens: self.config.chunking.max_tokens,
            overlap_tokens: self.config.chunking.overlap_tokens,
        };
        let drafts = SpanChunker.chunk(&spans, &params)?;
        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                Chunk::new(
                    doc.id,
                    workspace_id,
                    i as u32,
                    &d.content,
                    d.token_count,
                    d.overlap_len,
                    d.provenance,
                )
            })
            .collect();
        self.store.insert_chunks(&chunks).await?;
        self.store
            .set_document_status(doc.id, DocumentStatus::Parsed, None)
            .await?;
        debug!(document = %doc.id, chunks = chunks.len(), "document parsed");

        self.embed_document(workspace_id, doc.id).await
    }

    /// Resume embedding for a document whose ingestion failed or was cut
    /// short. Only chunks without a vector are embedded.
    pub async fn resume_ingestion(&self, workspace_id: Ulid, doc_id: Ulid) -> Result<Document> {
        self.store
            .get_document(workspace_id, doc_id)
            .await?
            .ok_or(ConvoqError::DocumentNotFound {
                id: doc_id.to_string(),
            })?;
        self.embed_document(workspace_id, doc_id).await
    }

    /// Embeds pending chunks batch by batch, persisting vectors as each
    /// batch lands so a failure resumes from the chunk it stopped at.
    async fn embed_document(&self, workspace_id: Ulid, doc_id: Ulid) -> Result<Document> {
        let pending = self.store.unembedded_chunks(doc_id).await?;
        let batch_size = self.config.embedding.max_batch.max(1);

        for batch in pending.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            match self.gateway.embed_batch(&texts).await {
                Ok(vectors) => {
                    let entries: Vec<(Ulid, Vec<f32>)> =
                        batch.iter().zip(vectors).map(|(c, v)| (c.id, v)).collect();
                    self.store
                        .upsert_embeddings(&entries, workspace_id, self.gateway.model_version())
                        .await?;
                }
                Err(e) if e.is_transient() => {
                    warn!(document = %doc_id, error = %e, "embedding exhausted retries");
                    self.store
                        .set_document_status(doc_id, DocumentStatus::Failed, Some(&e.to_string()))
                        .await?;
                    return self.fetch_document(workspace_id, doc_id).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.store
            .set_document_status(doc_id, DocumentStatus::Embedded, None)
            .await?;
        info!(document = %doc_id, "document embedded");
        self.fetch_document(workspace_id, doc_id).await
    }

    async fn fetch_document(&self, workspace_id: Ulid, doc_id: Ulid) -> Result<Document> {
        self.store
            .get_document(workspace_id, doc_id)
            .await?
            .ok_or(ConvoqError::DocumentNotFound {
                id: doc_id.to_string(),
            })
    }

    // Chats

    /// Flip a chat's AI toggle. When off the chat runs in manual mode.
    pub async fn set_ai_enabled(
        &self,
        workspace_id: Ulid,
        chat_id: Ulid,
        enabled: bool,
    ) -> Result<Chat> {
        let mut chat = self
            .store
            .get_chat(workspace_id, chat_id)
            .await?
            .ok_or(ConvoqError::ChatNotFound {
                id: chat_id.to_string(),
            })?;
        chat.ai_enabled = enabled;
        self.store.update_chat(&chat).await?;
        Ok(chat)
    }

    /// Handle one inbound message: append it, retrieve grounding, compose,
    /// generate, evaluate workflow, and derive qualification.
    ///
    /// Turns for the same chat are serialized; acquiring the chat scope
    /// suspends when another turn is in flight.
    pub async fn handle_message(
        &self,
        workspace_id: Ulid,
        phone: &str,
        text: &str,
        timestamp: u64,
    ) -> Result<TurnOutcome> {
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or(ConvoqError::WorkspaceNotFound {
                id: workspace_id.to_string(),
            })?;

        let chat_id = self.find_or_create_chat(&workspace, phone).await?.id;
        let lock = self.chat_lock(chat_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.run_turn(&workspace, chat_id, text, timestamp).await
        };

        // Drop the lock entry unless another turn is already waiting on it.
        self.chat_locks
            .remove_if(&chat_id, |_, entry| Arc::strong_count(entry) <= 2);

        outcome
    }

    async fn run_turn(
        &self,
        workspace: &Workspace,
        chat_id: Ulid,
        text: &str,
        timestamp: u64,
    ) -> Result<TurnOutcome> {
        let workspace_id = workspace.id;

        // Flags are read at the start of the turn, under the chat scope.
        let mut chat = self
            .store
            .get_chat(workspace_id, chat_id)
            .await?
            .ok_or(ConvoqError::ChatNotFound {
                id: chat_id.to_string(),
            })?;

        let incoming = Message::incoming(chat.id, text, timestamp);
        let incoming_id = incoming.id;
        self.store.append_message(incoming).await?;

        if !chat.ai_enabled {
            debug!(chat = %chat.id, "manual mode, message stored without reply");
            return Ok(TurnOutcome {
                chat_id: chat.id,
                reply: None,
                qualification: chat.qualification,
            });
        }

        let snippets = self.retriever.retrieve(workspace_id, text).await?;

        let steps = self
            .store
            .workflow_steps(workspace_id, chat.workflow_version)
            .await?;
        let machine = WorkflowMachine::new(steps, Box::new(KeywordPredicate));
        let progress = self.store.workflow_progress(chat.id).await?;
        let active = machine.active_step(&progress);

        let mut history = self
            .store
            .recent_messages(chat.id, self.config.conversation.max_turns)
            .await?;
        if history.last().map(|m| m.id) == Some(incoming_id) {
            history.pop();
        }

        let prompt = compose_prompt(workspace, active, &snippets, &history, text);

        let deadline = Duration::from_millis(self.config.generation.timeout_ms);
        let reply = match tokio::time::timeout(deadline, self.generator.generate(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(chat = %chat.id, error = %e, "generation failed, turn pending retry");
                chat.pending_retry = true;
                self.store.update_chat(&chat).await?;
                return Err(e);
            }
            Err(_) => {
                warn!(chat = %chat.id, "generation deadline exceeded, turn pending retry");
                chat.pending_retry = true;
                self.store.update_chat(&chat).await?;
                return Err(ConvoqError::generation_failed("gateway deadline exceeded"));
            }
        };

        let trace = GenerationTrace {
            snippet_chunks: snippets.iter().map(|s| s.chunk_id).collect(),
            active_step: active.map(|s| s.id),
        };
        let outgoing = Message::outgoing(chat.id, &reply, Some(trace));
        self.store.append_message(outgoing).await?;

        // Completion predicates see the whole accumulated conversation;
        // the bounded window only caps prompt context.
        let conversation = self.store.all_messages(chat.id).await?;
        let transitions = machine.evaluate(&progress, &conversation, Some(incoming_id));
        for transition in &transitions {
            self.store.record_step_progress(chat.id, transition).await?;
        }

        // Qualification is derived; the stored status moves only on change
        // and only for chats with an actual template.
        let mut qualification = chat.qualification;
        if !machine.steps().is_empty() {
            let progress = self.store.workflow_progress(chat.id).await?;
            qualification = machine.qualification(&progress);
        }

        if qualification != chat.qualification || chat.pending_retry {
            if qualification != chat.qualification {
                info!(chat = %chat.id, status = qualification.as_str(), "qualification changed");
            }
            chat.qualification = qualification;
            chat.pending_retry = false;
            self.store.update_chat(&chat).await?;
        }

        Ok(TurnOutcome {
            chat_id: chat.id,
            reply: Some(reply),
            qualification,
        })
    }

    async fn find_or_create_chat(&self, workspace: &Workspace, phone: &str) -> Result<Chat> {
        if let Some(chat) = self.store.find_chat_by_phone(workspace.id, phone).await? {
            return Ok(chat);
        }
        let chat = Chat::new(workspace.id, phone, workspace.workflow_version);
        match self.store.create_chat(chat.clone()).await {
            Ok(()) => {
                info!(chat = %chat.id, workspace = %workspace.id, "created chat");
                Ok(chat)
            }
            // Lost a creation race; the winner's row is authoritative.
            Err(_) => self
                .store
                .find_chat_by_phone(workspace.id, phone)
                .await?
                .ok_or_else(|| ConvoqError::internal("chat lookup failed after create race")),
        }
    }

    fn chat_lock(&self, chat_id: Ulid) -> Arc<Mutex<()>> {
        self.chat_locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
