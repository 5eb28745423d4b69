use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::crud;
use crate::error::ApiError;
use crate::models::{Chat, Message};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChatRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let chat = crud::chats::create_chat(&state.pool, body.title).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let chats = crud::chats::list_chats(&state.pool, params.limit, params.offset).await?;
    Ok(Json(chats))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
) -> Result<Json<Chat>, ApiError> {
    let chat = crud::chats::get_chat(&state.pool, chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chat {chat_id} not found")))?;
    Ok(Json(chat))
}

pub async fn update_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
    Json(body): Json<UpdateChatRequest>,
) -> Result<Json<Chat>, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".to_string()));
    }
    let chat = crud::chats::update_chat_title(&state.pool, chat_id, body.title.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chat {chat_id} not found")))?;
    Ok(Json(chat))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    // Anything still streaming for this chat stops first.
    state.registry.cancel_all_for_chat(chat_id);

    if crud::chats::delete_chat(&state.pool, chat_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("chat {chat_id} not found")))
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<i32>,
) -> Result<Json<Vec<Message>>, ApiError> {
    crud::chats::get_chat(&state.pool, chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chat {chat_id} not found")))?;

    let messages = crud::messages::messages_for_chat(&state.pool, chat_id).await?;
    Ok(Json(messages))
}
