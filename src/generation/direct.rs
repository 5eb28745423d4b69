use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use super::attachments::expand_attachment;
use super::{ChunkPayload, ChunkSender, PipelineResponse, StreamChunk};
use crate::llm::{ModelClient, PromptPart, PromptTurn, TurnRole};
use crate::store::ChatStore;

/// Fixed system instruction for the direct pipeline.
pub const MATH_TUTOR_SYSTEM_INSTRUCTION: &str = "\
You are a world-class AI assistant specializing in Olympic-level Linear Algebra. \
Your sole purpose is to help candidates train for high-level mathematics competitions. \
You are an expert in topics like vector spaces, linear transformations, eigenvalues, \
eigenvectors, matrix decompositions, and canonical forms.

Operating principles:
- Keep an academic, precise and professional tone.
- Every mathematical expression MUST be formatted in LaTeX. Use $$...$$ for \
standalone equations and $...$ for inline formulas.
- When a solution or explanation requires several steps, lay them out logically \
with numbered lists or bullet points.
- Your goal is not only the answer but demonstrating elegant and efficient \
mathematical reasoning.";

/// Turns conversation history plus attachments into one prompt and streams
/// the model's reply fragment by fragment.
pub struct DirectModelPipeline {
    store: Arc<dyn ChatStore>,
    model: Arc<dyn ModelClient>,
    system_instruction: String,
}

impl DirectModelPipeline {
    pub fn new(store: Arc<dyn ChatStore>, model: Arc<dyn ModelClient>) -> Self {
        DirectModelPipeline {
            store,
            model,
            system_instruction: MATH_TUTOR_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    pub async fn generate(
        &self,
        chat_id: i32,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) -> PipelineResponse {
        match self.run(chat_id, tx, token).await {
            Ok(content) => PipelineResponse::ok(content.trim()),
            Err(e) => {
                error!("direct pipeline failed for chat {chat_id}: {e}");
                let message = e.to_string();
                tx.send(StreamChunk::Fragment(ChunkPayload::Error {
                    error: message.clone(),
                    text: None,
                }))
                .await
                .ok();
                PipelineResponse::error(message)
            }
        }
    }

    async fn run(
        &self,
        chat_id: i32,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) -> Result<String> {
        // History already includes the just-persisted user message.
        let history = self.store.history_with_attachments(chat_id).await?;

        let mut turns = Vec::with_capacity(history.len());
        for (message, files) in &history {
            let mut parts = vec![PromptPart::Text(message.content.clone())];
            for attachment in files {
                if let Some(extra) =
                    expand_attachment(self.store.as_ref(), self.model.as_ref(), attachment).await
                {
                    parts.extend(extra);
                }
            }
            turns.push(PromptTurn {
                role: if message.is_user() {
                    TurnRole::User
                } else {
                    TurnRole::Model
                },
                parts,
            });
        }

        if token.is_cancelled() {
            return Ok(String::new());
        }

        info!("sending request to model for chat {chat_id}");
        let mut stream = self
            .model
            .stream_generate(turns, &self.system_instruction)
            .await?;

        let mut content = String::new();
        while let Some(item) = stream.next().await {
            if token.is_cancelled() {
                info!("generation for chat {chat_id} cancelled mid-stream");
                break;
            }
            let fragment = item?;
            if fragment.is_empty() {
                continue;
            }
            content.push_str(&fragment);
            tx.send(StreamChunk::Fragment(ChunkPayload::Text { text: fragment }))
                .await
                .ok();
        }

        Ok(content)
    }
}
