//! Semantic retrieval over a workspace knowledge base.
//!
//! Retrieval is fail-soft: a provider outage or index failure yields an
//! empty snippet list so the conversation can continue ungrounded. The one
//! exception is a tenancy violation, which always propagates.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use ulid::Ulid;

use convoq_core::{ConvoqError, Result, RetrievalConfig, Snippet, Store};
use convoq_embed::EmbeddingGateway;

/// Retrieves grounded snippets for an incoming message.
pub struct Retriever<S: Store> {
    store: Arc<S>,
    gateway: Arc<EmbeddingGateway>,
    config: RetrievalConfig,
}

impl<S: Store> Retriever<S> {
    pub fn new(store: Arc<S>, gateway: Arc<EmbeddingGateway>, config: RetrievalConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Top snippets for a query, scoped to one workspace.
    ///
    /// Candidates are over-fetched, filtered by the similarity floor,
    /// capped per document, and truncated to `top_k`.
    pub async fn retrieve(&self, workspace_id: Ulid, query: &str) -> Result<Vec<Snippet>> {
        let vector = match self.gateway.embed_query(query).await {
            Ok(v) => v,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "query embedding failed, retrieval degraded to empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let overfetch = self.config.top_k.saturating_mul(2).max(self.config.top_k);
        let hits = match self
            .store
            .vector_search(workspace_id, &vector, overfetch, self.gateway.model_version())
            .await
        {
            Ok(hits) => hits,
            Err(ConvoqError::RetrievalDegraded { reason }) => {
                warn!(%reason, "vector search failed, retrieval degraded to empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut per_document: HashMap<Ulid, u32> = HashMap::new();
        let mut snippets = Vec::new();
        for (chunk_id, score) in hits {
            if score < self.config.min_score {
                continue;
            }
            let chunk = self
                .store
                .get_chunk(workspace_id, chunk_id)
                .await?
                .ok_or_else(|| {
                    ConvoqError::tenancy_violation(format!(
                        "index returned chunk {} not visible in workspace {}",
                        chunk_id, workspace_id
                    ))
                })?;

            let seen = per_document.entry(chunk.doc_id).or_insert(0);
            if *seen >= self.config.max_per_document {
                continue;
            }
            *seen += 1;

            snippets.push(Snippet {
                chunk_id: chunk.id,
                doc_id: chunk.doc_id,
                score,
                provenance: chunk.provenance_label(),
                content: chunk.content,
            });
            if snippets.len() as u32 >= self.config.top_k {
                break;
            }
        }

        debug!(
            workspace = %workspace_id,
            snippets = snippets.len(),
            "retrieval complete"
        );
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convoq_core::{
        Chunk, Document, DocumentFormat, EmbeddingConfig, EmbeddingProvider, Provenance, Workspace,
    };
    use convoq_embed::MockEmbedding;
    use convoq_store::SqliteStore;

    const DIM: usize = 64;

    fn gateway() -> Arc<EmbeddingGateway> {
        let config = EmbeddingConfig {
            backoff_ms: 1,
            ..EmbeddingConfig::default()
        };
        Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedding::new(DIM)),
            &config,
        ))
    }

    async fn seed_document(
        store: &SqliteStore,
        gateway: &EmbeddingGateway,
        workspace_id: Ulid,
        texts: &[&str],
    ) -> Ulid {
        let doc = Document::new(workspace_id, DocumentFormat::PlainText, b"raw");
        store.insert_document(doc.clone()).await.unwrap();

        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Chunk::new(
                    doc.id,
                    workspace_id,
                    i as u32,
                    t,
                    4,
                    0,
                    Provenance::Text { page: Some(1) },
                )
            })
            .collect();
        store.insert_chunks(&chunks).await.unwrap();

        let vectors = gateway.embed_batch(texts).await.unwrap();
        let entries: Vec<(Ulid, Vec<f32>)> = chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| (c.id, v))
            .collect();
        store
            .upsert_embeddings(&entries, workspace_id, gateway.model_version())
            .await
            .unwrap();
        doc.id
    }

    #[tokio::test]
    async fn returns_matching_snippet_with_provenance() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let gw = gateway();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        seed_document(
            &store,
            &gw,
            workspace.id,
            &["shipping takes three days", "returns accepted for 30 days"],
        )
        .await;

        let retriever = Retriever::new(store, gw, RetrievalConfig::default());
        let snippets = retriever
            .retrieve(workspace.id, "shipping takes three days")
            .await
            .unwrap();

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].content, "shipping takes three days");
        assert_eq!(snippets[0].provenance, "page 1");
        assert!(snippets[0].score > 0.99);
    }

    #[tokio::test]
    async fn low_similarity_candidates_are_dropped() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let gw = gateway();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        seed_document(&store, &gw, workspace.id, &["completely unrelated content"]).await;

        let retriever = Retriever::new(store, gw, RetrievalConfig::default());
        let snippets = retriever
            .retrieve(workspace.id, "what is the shipping cost")
            .await
            .unwrap();

        assert!(snippets.is_empty());
    }

    #[tokio::test]
    async fn respects_per_document_cap() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let gw = gateway();
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();
        // Four identical chunks in one document all match perfectly
        seed_document(
            &store,
            &gw,
            workspace.id,
            &["refund policy", "refund policy", "refund policy", "refund policy"],
        )
        .await;

        let config = RetrievalConfig {
            top_k: 5,
            min_score: 0.35,
            max_per_document: 2,
        };
        let retriever = Retriever::new(store, gw, config);
        let snippets = retriever.retrieve(workspace.id, "refund policy").await.unwrap();

        assert_eq!(snippets.len(), 2);
    }

    #[tokio::test]
    async fn never_returns_other_workspace_content() {
        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let gw = gateway();
        let ws_a = Workspace::new("a");
        let ws_b = Workspace::new("b");
        store.create_workspace(ws_a.clone()).await.unwrap();
        store.create_workspace(ws_b.clone()).await.unwrap();
        seed_document(&store, &gw, ws_a.id, &["secret pricing sheet"]).await;

        let retriever = Retriever::new(store, gw, RetrievalConfig::default());
        let snippets = retriever
            .retrieve(ws_b.id, "secret pricing sheet")
            .await
            .unwrap();

        assert!(snippets.is_empty());
    }

    #[tokio::test]
    async fn degrades_to_empty_when_provider_is_down() {
        struct DownProvider;

        #[async_trait]
        impl EmbeddingProvider for DownProvider {
            async fn embed(&self, _texts: &[&str]) -> convoq_core::Result<Vec<Vec<f32>>> {
                Err(ConvoqError::embedding_unavailable("outage"))
            }
            fn dimension(&self) -> usize {
                DIM
            }
            fn model_version(&self) -> &str {
                "down-v1"
            }
            fn max_batch(&self) -> usize {
                8
            }
        }

        let store = Arc::new(SqliteStore::open_memory(DIM).unwrap());
        let workspace = Workspace::new("test");
        store.create_workspace(workspace.clone()).await.unwrap();

        let config = EmbeddingConfig {
            max_attempts: 2,
            backoff_ms: 1,
            ..EmbeddingConfig::default()
        };
        let gw = Arc::new(EmbeddingGateway::new(Arc::new(DownProvider), &config));
        let retriever = Retriever::new(store, gw, RetrievalConfig::default());

        let snippets = retriever.retrieve(workspace.id, "anything").await.unwrap();
        assert!(snippets.is_empty());
    }
}
