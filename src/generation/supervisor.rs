use std::sync::Arc;

use log::{error, info};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::direct::DirectModelPipeline;
use super::rag::RetrievalAugmentedPipeline;
use super::registry::GenerationRegistry;
use super::{
    select_pipeline, ChunkPayload, ChunkSender, GenerationPipeline, PipelineKind, StreamChunk,
};
use crate::llm::agent::AgentModel;
use crate::llm::ModelClient;
use crate::models::MessageRole;
use crate::retrieval::RetrievalClient;
use crate::store::ChatStore;

const CHANNEL_CAPACITY: usize = 100;

/// Owns the lifecycle of every generation: persists the user's message,
/// runs the selected pipeline on a spawned task, persists the reply, and
/// terminates the output channel with the `[DONE]` sentinel no matter how
/// the pipeline ended.
#[derive(Clone)]
pub struct GenerationSupervisor {
    store: Arc<dyn ChatStore>,
    model: Arc<dyn ModelClient>,
    agent: Arc<dyn AgentModel>,
    retrieval: Arc<dyn RetrievalClient>,
    registry: GenerationRegistry,
    rag_enabled: bool,
}

impl GenerationSupervisor {
    pub fn new(
        store: Arc<dyn ChatStore>,
        model: Arc<dyn ModelClient>,
        agent: Arc<dyn AgentModel>,
        retrieval: Arc<dyn RetrievalClient>,
        registry: GenerationRegistry,
        rag_enabled: bool,
    ) -> Self {
        GenerationSupervisor {
            store,
            model,
            agent,
            retrieval,
            registry,
            rag_enabled,
        }
    }

    /// Kicks off a generation. The handle is registered before the task is
    /// spawned, so an interrupt arriving immediately after the caller
    /// learns the id always finds the entry.
    pub fn start(
        &self,
        chat_id: i32,
        user_text: String,
        attachment_ids: Vec<String>,
        pipeline_override: Option<String>,
    ) -> (String, mpsc::Receiver<StreamChunk>) {
        let suffix: u16 = rand::thread_rng().gen_range(100..1000);
        let generation_id = format!("{chat_id}_{suffix}");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = self.registry.register(&generation_id);
        let token = handle.token();

        let supervisor = self.clone();
        let id = generation_id.clone();
        tokio::spawn(async move {
            supervisor
                .run(chat_id, &user_text, &attachment_ids, pipeline_override, &tx, &token)
                .await;
            handle.mark_finished();
            supervisor.registry.finish(&id);
        });

        (generation_id, rx)
    }

    /// Always ends by sending the sentinel, whatever happened before.
    async fn run(
        &self,
        chat_id: i32,
        user_text: &str,
        attachment_ids: &[String],
        pipeline_override: Option<String>,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) {
        if let Err(e) = self
            .generate(chat_id, user_text, attachment_ids, pipeline_override, tx, token)
            .await
        {
            error!("generation for chat {chat_id} failed: {e}");
            tx.send(StreamChunk::Fragment(ChunkPayload::Error {
                error: e.to_string(),
                text: Some("An error occurred during generation.".to_string()),
            }))
            .await
            .ok();
        }
        tx.send(StreamChunk::Done).await.ok();
    }

    async fn generate(
        &self,
        chat_id: i32,
        user_text: &str,
        attachment_ids: &[String],
        pipeline_override: Option<String>,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.store
            .create_message(chat_id, MessageRole::User, user_text, attachment_ids)
            .await?;

        let kind = select_pipeline(pipeline_override.as_deref(), self.rag_enabled);
        let response = self
            .pipeline_for(kind)
            .generate(chat_id, user_text, tx, token)
            .await;

        if token.is_cancelled() {
            info!("generation for chat {chat_id} cancelled, partial reply discarded");
            return Ok(());
        }

        // Pipelines report their own failures on the stream; an errored or
        // empty reply is simply not persisted.
        if response.error.is_none() && !response.content.is_empty() {
            self.store
                .create_message(chat_id, MessageRole::Model, &response.content, &[])
                .await?;
        }
        Ok(())
    }

    fn pipeline_for(&self, kind: PipelineKind) -> GenerationPipeline {
        match kind {
            PipelineKind::DirectModel => GenerationPipeline::Direct(DirectModelPipeline::new(
                self.store.clone(),
                self.model.clone(),
            )),
            PipelineKind::RetrievalAugmented => {
                GenerationPipeline::RetrievalAugmented(RetrievalAugmentedPipeline::new(
                    self.agent.clone(),
                    self.retrieval.clone(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::generation::direct::tests::ScriptedModelClient;
    use crate::llm::agent::{AgentReply, AgentTurn};
    use crate::retrieval::Passage;
    use crate::store::testing::MemoryStore;

    struct UnusedAgent;

    #[async_trait]
    impl AgentModel for UnusedAgent {
        async fn complete(&self, _turns: &[AgentTurn]) -> anyhow::Result<AgentReply> {
            Err(anyhow!("agent should not be invoked"))
        }
    }

    struct UnusedRetrieval;

    #[async_trait]
    impl RetrievalClient for UnusedRetrieval {
        async fn search(&self, _query: &str) -> anyhow::Result<Vec<Passage>> {
            Err(anyhow!("retrieval should not be invoked"))
        }
    }

    fn supervisor(
        store: Arc<MemoryStore>,
        model: ScriptedModelClient,
        registry: GenerationRegistry,
    ) -> GenerationSupervisor {
        GenerationSupervisor::new(
            store,
            Arc::new(model),
            Arc::new(UnusedAgent),
            Arc::new(UnusedRetrieval),
            registry,
            false,
        )
    }

    async fn collect(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn happy_path_persists_both_messages_and_ends_with_sentinel() {
        let store = Arc::new(MemoryStore::with_chat(1));
        let registry = GenerationRegistry::new();
        let supervisor = supervisor(
            store.clone(),
            ScriptedModelClient {
                fragments: vec!["2+2 ", "= ", "4"],
                fail: false,
            },
            registry.clone(),
        );

        let (generation_id, rx) =
            supervisor.start(1, "what is 2+2?".to_string(), vec![], None);
        assert!(generation_id.starts_with("1_"));

        let chunks = collect(rx).await;
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
        assert_eq!(
            chunks.iter().filter(|c| **c == StreamChunk::Done).count(),
            1
        );
        assert_eq!(chunks.len(), 4); // three fragments plus the sentinel

        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what is 2+2?");
        assert!(messages[0].is_user());
        assert_eq!(messages[1].content, "2+2 = 4");
        assert!(!messages[1].is_user());

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_attachment_ids_are_skipped_on_the_user_message() {
        let store = Arc::new(MemoryStore::with_chat(1));
        let supervisor = supervisor(
            store.clone(),
            ScriptedModelClient {
                fragments: vec!["ok"],
                fail: false,
            },
            GenerationRegistry::new(),
        );

        let (_, rx) = supervisor.start(
            1,
            "see attached".to_string(),
            vec!["missing-id".to_string()],
            None,
        );
        collect(rx).await;

        let messages = store.messages();
        assert!(store.linked_attachment_ids(messages[0].id).is_empty());
    }

    #[tokio::test]
    async fn model_failure_still_ends_with_sentinel_and_persists_no_reply() {
        let store = Arc::new(MemoryStore::with_chat(1));
        let supervisor = supervisor(
            store.clone(),
            ScriptedModelClient {
                fragments: vec![],
                fail: true,
            },
            GenerationRegistry::new(),
        );

        let (_, rx) = supervisor.start(1, "hello".to_string(), vec![], None);
        let chunks = collect(rx).await;

        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
        let errors = chunks
            .iter()
            .filter(|c| matches!(c, StreamChunk::Fragment(ChunkPayload::Error { .. })))
            .count();
        assert_eq!(errors, 1);

        // Only the user message was persisted.
        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_user());
    }

    #[tokio::test]
    async fn cancelled_generation_discards_the_partial_reply() {
        let store = Arc::new(MemoryStore::with_chat(1));
        let registry = GenerationRegistry::new();
        let supervisor = supervisor(
            store.clone(),
            ScriptedModelClient {
                fragments: vec!["partial"],
                fail: false,
            },
            registry.clone(),
        );

        let (generation_id, rx) = supervisor.start(1, "hello".to_string(), vec![], None);
        registry.cancel(&generation_id);
        let chunks = collect(rx).await;

        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
        // The user message stays; no model message is written.
        let messages = store.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_user());
    }

    #[tokio::test]
    async fn missing_chat_surfaces_an_error_then_the_sentinel() {
        // MemoryStore::create_message does not enforce chat existence, so
        // drive the error path through the failing model instead.
        let store = Arc::new(MemoryStore::with_chat(5));
        let supervisor = supervisor(
            store.clone(),
            ScriptedModelClient {
                fragments: vec![],
                fail: true,
            },
            GenerationRegistry::new(),
        );

        let (_, rx) = supervisor.start(5, "q".to_string(), vec![], None);
        let chunks = collect(rx).await;

        assert!(matches!(
            chunks.first(),
            Some(StreamChunk::Fragment(ChunkPayload::Error { .. }))
        ));
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));
    }
}
