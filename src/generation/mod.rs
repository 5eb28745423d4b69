pub mod attachments;
pub mod direct;
pub mod rag;
pub mod registry;
pub mod supervisor;
pub mod transcoder;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use registry::{GenerationHandle, GenerationRegistry};
pub use supervisor::GenerationSupervisor;
pub use transcoder::SseTranscoder;

/// One item on a generation's output channel: either a payload the client
/// should see, or the terminal sentinel. Pipelines only ever emit
/// fragments; the sentinel is the supervisor's job.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Fragment(ChunkPayload),
    Done,
}

/// Wire shape of one streamed event. Serializes to exactly one of
/// `{"generation_id"}`, `{"error", "text"?}`, `{"text"}` or
/// `{"artifacts"}`. Variant order matters for untagged deserialization:
/// `Error` must be tried before `Text` so `{"error", "text"}` does not
/// collapse into a plain text fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkPayload {
    GenerationId {
        generation_id: String,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Text {
        text: String,
    },
    Artifacts {
        artifacts: Vec<String>,
    },
}

pub type ChunkSender = mpsc::Sender<StreamChunk>;

/// Outcome of one generation attempt. Never partially valid: either
/// `error` is set and `content` is empty, or `content` holds the full
/// assembled reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineResponse {
    pub content: String,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
}

impl PipelineResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        PipelineResponse {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_artifacts(content: impl Into<String>, artifacts: Vec<String>) -> Self {
        PipelineResponse {
            content: content.into(),
            artifacts,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PipelineResponse {
            content: String::new(),
            artifacts: Vec::new(),
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    DirectModel,
    RetrievalAugmented,
}

/// Picks the generation strategy: an explicit per-request override wins,
/// then the process-wide flag, then the direct-model default. Pure
/// function, no I/O.
pub fn select_pipeline(requested: Option<&str>, rag_enabled: bool) -> PipelineKind {
    let default = if rag_enabled {
        PipelineKind::RetrievalAugmented
    } else {
        PipelineKind::DirectModel
    };

    match requested {
        Some(name) => match name.to_ascii_lowercase().as_str() {
            "rag" => PipelineKind::RetrievalAugmented,
            "gemini" | "direct" => PipelineKind::DirectModel,
            other => {
                warn!("unknown pipeline override {other:?}, using configured default");
                default
            }
        },
        None => default,
    }
}

/// Closed dispatch over the two generation strategies.
pub enum GenerationPipeline {
    Direct(direct::DirectModelPipeline),
    RetrievalAugmented(rag::RetrievalAugmentedPipeline),
}

impl GenerationPipeline {
    pub async fn generate(
        &self,
        chat_id: i32,
        user_text: &str,
        tx: &ChunkSender,
        token: &tokio_util::sync::CancellationToken,
    ) -> PipelineResponse {
        match self {
            GenerationPipeline::Direct(pipeline) => pipeline.generate(chat_id, tx, token).await,
            GenerationPipeline::RetrievalAugmented(pipeline) => {
                pipeline.generate(user_text, tx, token).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_beats_flag() {
        assert_eq!(
            select_pipeline(Some("rag"), false),
            PipelineKind::RetrievalAugmented
        );
        assert_eq!(
            select_pipeline(Some("gemini"), true),
            PipelineKind::DirectModel
        );
        assert_eq!(
            select_pipeline(Some("direct"), true),
            PipelineKind::DirectModel
        );
    }

    #[test]
    fn flag_beats_default() {
        assert_eq!(select_pipeline(None, true), PipelineKind::RetrievalAugmented);
        assert_eq!(select_pipeline(None, false), PipelineKind::DirectModel);
    }

    #[test]
    fn unknown_override_falls_through_to_flag() {
        assert_eq!(select_pipeline(Some("llama"), false), PipelineKind::DirectModel);
        assert_eq!(
            select_pipeline(Some("llama"), true),
            PipelineKind::RetrievalAugmented
        );
    }

    #[test]
    fn payload_wire_shapes() {
        let text = ChunkPayload::Text { text: "4".into() };
        assert_eq!(serde_json::to_string(&text).unwrap(), r#"{"text":"4"}"#);

        let artifacts = ChunkPayload::Artifacts {
            artifacts: vec!["doc.pdf".into()],
        };
        assert_eq!(
            serde_json::to_string(&artifacts).unwrap(),
            r#"{"artifacts":["doc.pdf"]}"#
        );

        let bare_error = ChunkPayload::Error {
            error: "boom".into(),
            text: None,
        };
        assert_eq!(serde_json::to_string(&bare_error).unwrap(), r#"{"error":"boom"}"#);

        let id = ChunkPayload::GenerationId {
            generation_id: "7_123".into(),
        };
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            r#"{"generation_id":"7_123"}"#
        );
    }

    #[test]
    fn error_with_text_does_not_deserialize_as_text() {
        let parsed: ChunkPayload =
            serde_json::from_str(r#"{"error":"boom","text":"An error occurred."}"#).unwrap();
        assert_eq!(
            parsed,
            ChunkPayload::Error {
                error: "boom".into(),
                text: Some("An error occurred.".into()),
            }
        );
    }
}
