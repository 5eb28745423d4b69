use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use log::info;
use serde::{Deserialize, Serialize};

use crate::crud;
use crate::error::ApiError;
use crate::generation::{ChunkPayload, SseTranscoder};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserMessageInput {
    pub content: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Optional per-request pipeline override ("rag", "gemini", "direct").
    pub pipeline: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InterruptRequest {
    pub generation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InterruptResponse {
    pub status: &'static str,
    pub message: String,
}

/// Accepts a user message and streams the reply as SSE. The first data
/// frame carries the generation id so the client can interrupt; the last
/// one is always `[DONE]`.
pub async fn stream_chat_response(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
    Json(input): Json<UserMessageInput>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if input.content.trim().is_empty() && input.file_ids.is_empty() {
        return Err(ApiError::Validation(
            "message content must not be empty".to_string(),
        ));
    }

    crud::chats::get_chat(&state.pool, chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chat {chat_id} not found")))?;

    let (generation_id, receiver) =
        state
            .supervisor
            .start(chat_id, input.content, input.file_ids, input.pipeline);
    info!("started generation {generation_id} for chat {chat_id}");

    let id_payload = ChunkPayload::GenerationId {
        generation_id: generation_id.clone(),
    };
    let first = stream::once(async move {
        Ok(Event::default().data(
            serde_json::to_string(&id_payload)
                .unwrap_or_else(|_| String::from(r#"{"generation_id":""}"#)),
        ))
    });

    let transcoder = SseTranscoder::new(receiver, state.registry.clone(), generation_id);
    Ok(Sse::new(first.chain(transcoder).boxed()))
}

/// Stops a running generation. With an explicit id only that generation is
/// cancelled; without one, everything in flight for the chat.
pub async fn interrupt_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
    Json(request): Json<InterruptRequest>,
) -> Json<InterruptResponse> {
    match request.generation_id {
        Some(generation_id) => {
            if state.registry.cancel(&generation_id) {
                Json(InterruptResponse {
                    status: "success",
                    message: format!("generation {generation_id} interrupted"),
                })
            } else {
                Json(InterruptResponse {
                    status: "warning",
                    message: "No active generation found".to_string(),
                })
            }
        }
        None => {
            let cancelled = state.registry.cancel_all_for_chat(chat_id);
            if cancelled > 0 {
                Json(InterruptResponse {
                    status: "success",
                    message: format!("interrupted {cancelled} generation(s) for chat {chat_id}"),
                })
            } else {
                Json(InterruptResponse {
                    status: "warning",
                    message: "No active generation found".to_string(),
                })
            }
        }
    }
}
