pub mod agent;
pub mod gemini;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One role-tagged turn of an assembled prompt.
#[derive(Debug, Clone)]
pub struct PromptTurn {
    pub role: TurnRole,
    pub parts: Vec<PromptPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// A piece of prompt content: plain text, inline binary, or a reference
/// into the provider's file store.
#[derive(Debug, Clone)]
pub enum PromptPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
    RemoteRef { file_id: String, mime_type: String },
}

pub type FragmentStream = BoxStream<'static, Result<String>>;

/// The external model, consumed as an opaque asynchronous capability:
/// given assembled turns, produce a sequence of text fragments.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_generate(
        &self,
        turns: Vec<PromptTurn>,
        system_instruction: &str,
    ) -> Result<FragmentStream>;

    /// Uploads a local file to the provider's file store and returns the
    /// reference id to use in prompts.
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<String>;
}
