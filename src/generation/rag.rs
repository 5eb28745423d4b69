use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{ChunkPayload, ChunkSender, PipelineResponse, StreamChunk};
use crate::llm::agent::{AgentModel, AgentToolCall, AgentTurn, RETRIEVER_TOOL_NAME};
use crate::retrieval::RetrievalClient;

/// Upper bound on agent invocations per generation. The agent/tool loop
/// would otherwise ping-pong without limit on a model that keeps
/// requesting retrievals.
pub const MAX_AGENT_HOPS: usize = 8;

/// Rough character budget for trimmed history handed to the agent.
const PROMPT_CHAR_BUDGET: usize = 24_000;

/// Answers with a retrieval-augmented workflow: the agent may request the
/// retriever tool, whose results loop back as tool turns until the agent
/// produces a final answer with no further tool calls.
pub struct RetrievalAugmentedPipeline {
    agent: Arc<dyn AgentModel>,
    retrieval: Arc<dyn RetrievalClient>,
}

enum RagState {
    Agent,
    RunToolRetriever(AgentToolCall),
    HumanReview(AgentToolCall),
}

impl RetrievalAugmentedPipeline {
    pub fn new(agent: Arc<dyn AgentModel>, retrieval: Arc<dyn RetrievalClient>) -> Self {
        RetrievalAugmentedPipeline { agent, retrieval }
    }

    pub async fn generate(
        &self,
        user_text: &str,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) -> PipelineResponse {
        match self.run(user_text, tx, token).await {
            Ok((content, artifacts)) => PipelineResponse::with_artifacts(content.trim(), artifacts),
            Err(e) => {
                error!("retrieval-augmented pipeline failed: {e}");
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
        user_text: &str,
        tx: &ChunkSender,
        token: &CancellationToken,
    ) -> Result<(String, Vec<String>)> {
        let mut turns = vec![AgentTurn::user(user_text)];
        let mut content = String::new();
        let mut artifacts: Vec<String> = Vec::new();
        let mut prompt_tokens = 0usize;
        let mut completion_tokens = 0usize;

        let mut state = RagState::Agent;
        let mut hops = 0usize;

        loop {
            if token.is_cancelled() {
                info!("retrieval-augmented generation cancelled");
                break;
            }

            match state {
                RagState::Agent => {
                    hops += 1;
                    if hops > MAX_AGENT_HOPS {
                        warn!("agent loop hit the {MAX_AGENT_HOPS}-hop bound, stopping");
                        break;
                    }

                    let mut request = vec![AgentTurn::system(build_system_message("None"))];
                    request.extend(trim_to_budget(&turns, PROMPT_CHAR_BUDGET));
                    prompt_tokens += approx_tokens(&request);

                    let reply = self.agent.complete(&request).await?;
                    completion_tokens += reply.content.len() / 4;

                    if !reply.content.is_empty() {
                        content.push_str(&reply.content);
                        tx.send(StreamChunk::Fragment(ChunkPayload::Text {
                            text: reply.content.clone(),
                        }))
                        .await
                        .ok();
                    }

                    match reply.tool_calls.into_iter().next() {
                        None => break,
                        Some(call) => {
                            turns.push(AgentTurn::assistant(
                                reply.content,
                                vec![call.clone()],
                            ));
                            state = if call.name == RETRIEVER_TOOL_NAME {
                                RagState::RunToolRetriever(call)
                            } else {
                                RagState::HumanReview(call)
                            };
                        }
                    }
                }
                RagState::RunToolRetriever(call) => {
                    let query = parse_query(&call.arguments);
                    let passages = self.retrieval.search(&query).await?;

                    let mut fresh: Vec<String> = Vec::new();
                    for passage in &passages {
                        if !artifacts.contains(&passage.source) && !fresh.contains(&passage.source)
                        {
                            fresh.push(passage.source.clone());
                        }
                    }
                    artifacts.extend(fresh.iter().cloned());
                    if !fresh.is_empty() {
                        tx.send(StreamChunk::Fragment(ChunkPayload::Artifacts {
                            artifacts: fresh,
                        }))
                        .await
                        .ok();
                    }

                    let context = passages
                        .iter()
                        .map(|p| p.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    turns.push(AgentTurn::tool(context, call.id));
                    state = RagState::Agent;
                }
                RagState::HumanReview(call) => {
                    warn!("model requested unsupported tool {:?}", call.name);
                    turns.push(AgentTurn::tool(
                        format!("Tool {:?} is not available.", call.name),
                        call.id,
                    ));
                    state = RagState::Agent;
                }
            }
        }

        info!(
            "retrieval-augmented generation done after {hops} hop(s), \
             ~{prompt_tokens} prompt / ~{completion_tokens} completion tokens"
        );
        Ok((content, artifacts))
    }
}

fn parse_query(arguments: &str) -> String {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|v| v["query"].as_str().map(str::to_string))
        .unwrap_or_default()
}

/// System message template: persona, current time, running conversation
/// summary, formatting rules.
fn build_system_message(summary: &str) -> String {
    format!(
        "You are an AI assistant specialized in Olympic-level Linear Algebra, \
         answering from a curated knowledge base.\n\
         Current time: {}.\n\
         Conversation summary so far: {summary}.\n\
         Use the retrieval tool when the question needs supporting material. \
         Answer only from retrieved content when it is available, cite the \
         source names you used, and format all mathematics in LaTeX.",
        Utc::now().to_rfc3339()
    )
}

/// Keeps the most recent turns whose cumulative size fits the budget; the
/// newest turn is always kept. A leading tool turn is dropped so the
/// window never starts with a response to a call outside it.
fn trim_to_budget(turns: &[AgentTurn], budget: usize) -> Vec<AgentTurn> {
    let mut total = 0usize;
    let mut start = turns.len();
    for (i, turn) in turns.iter().enumerate().rev() {
        total += turn.content.len();
        if total > budget && start < turns.len() {
            break;
        }
        start = i;
    }
    let mut window = &turns[start..];
    while let Some(first) = window.first() {
        if first.tool_call_id.is_some() {
            window = &window[1..];
        } else {
            break;
        }
    }
    window.to_vec()
}

fn approx_tokens(turns: &[AgentTurn]) -> usize {
    turns.iter().map(|t| t.content.len() / 4).sum()
}
