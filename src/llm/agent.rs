use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionToolType, CreateChatCompletionRequest, FunctionCall, FunctionObject,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use serde_json::json;

/// Name of the one tool the agent is allowed to call.
pub const RETRIEVER_TOOL_NAME: &str = "retrieve_linear_algebra_concepts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of the agent conversation, provider-neutral.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub role: AgentRole,
    pub content: String,
    pub tool_calls: Vec<AgentToolCall>,
    /// Set on `Tool` turns: which call this responds to.
    pub tool_call_id: Option<String>,
}

impl AgentTurn {
    pub fn system(content: impl Into<String>) -> Self {
        AgentTurn {
            role: AgentRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        AgentTurn {
            role: AgentRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<AgentToolCall>) -> Self {
        AgentTurn {
            role: AgentRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        AgentTurn {
            role: AgentRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub tool_calls: Vec<AgentToolCall>,
}

/// One tool-capable completion hop of the retrieval-augmented agent.
#[async_trait]
pub trait AgentModel: Send + Sync {
    async fn complete(&self, turns: &[AgentTurn]) -> Result<AgentReply>;
}

pub struct OpenAiAgentModel {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl OpenAiAgentModel {
    pub fn new(model: String) -> Self {
        OpenAiAgentModel {
            client: OpenAIClient::new(),
            model,
        }
    }

    fn retriever_tool() -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: RETRIEVER_TOOL_NAME.to_string(),
                description: Some(
                    "Retrieve relevant linear algebra material from the knowledge base."
                        .to_string(),
                ),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The query to search for relevant documents."
                        }
                    },
                    "required": ["query"]
                })),
                strict: None,
            },
        }
    }

    fn encode_turn(turn: &AgentTurn) -> ChatCompletionRequestMessage {
        match turn.role {
            AgentRole::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: turn.content.clone().into(),
                    name: None,
                })
            }
            AgentRole::User => {
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: turn.content.clone().into(),
                    name: None,
                })
            }
            #[allow(deprecated)]
            AgentRole::Assistant => {
                let tool_calls = if turn.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        turn.tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                };
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: if turn.content.is_empty() {
                        None
                    } else {
                        Some(turn.content.clone().into())
                    },
                    name: None,
                    tool_calls,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
            AgentRole::Tool => {
                ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                    content: turn.content.clone().into(),
                    tool_call_id: turn.tool_call_id.clone().unwrap_or_default(),
                })
            }
        }
    }
}

#[async_trait]
impl AgentModel for OpenAiAgentModel {
    async fn complete(&self, turns: &[AgentTurn]) -> Result<AgentReply> {
        let messages: Vec<ChatCompletionRequestMessage> =
            turns.iter().map(Self::encode_turn).collect();

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: Some(vec![Self::retriever_tool()]),
            max_completion_tokens: Some(1500),
            temperature: Some(0.7),
            ..Default::default()
        };

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| AgentToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(AgentReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}
