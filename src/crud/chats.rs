use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use log::info;

use crate::database::db::DbPool;
use crate::models::{Chat, NewChat};
use crate::schema::{chats, message_attachments, messages};

pub async fn create_chat(pool: &DbPool, title: Option<String>) -> Result<Chat> {
    let mut conn = pool.get().await?;

    let new_chat = NewChat {
        title: title.unwrap_or_else(|| "New Chat".to_string()),
    };

    let chat: Chat = diesel::insert_into(chats::table)
        .values(&new_chat)
        .get_result(&mut conn)
        .await?;

    info!("created chat {}", chat.id);
    Ok(chat)
}

pub async fn get_chat(pool: &DbPool, chat_id: i32) -> Result<Option<Chat>> {
    let mut conn = pool.get().await?;

    let chat = chats::table
        .find(chat_id)
        .first::<Chat>(&mut conn)
        .await
        .optional()?;

    Ok(chat)
}

pub async fn list_chats(pool: &DbPool, limit: i64, offset: i64) -> Result<Vec<Chat>> {
    let mut conn = pool.get().await?;

    let results = chats::table
        .order(chats::create_time.desc())
        .limit(limit)
        .offset(offset)
        .load::<Chat>(&mut conn)
        .await?;

    Ok(results)
}

pub async fn update_chat_title(pool: &DbPool, chat_id: i32, title: &str) -> Result<Option<Chat>> {
    let mut conn = pool.get().await?;

    let chat = diesel::update(chats::table.find(chat_id))
        .set(chats::title.eq(title))
        .get_result::<Chat>(&mut conn)
        .await
        .optional()?;

    Ok(chat)
}

/// Deletes a chat together with its messages and their attachment links.
/// Attachment rows and files on disk are left to the cleanup task, since an
/// attachment may still be linked from another chat's messages.
pub async fn delete_chat(pool: &DbPool, chat_id: i32) -> Result<bool> {
    let mut conn = pool.get().await?;

    let message_ids: Vec<i32> = messages::table
        .filter(messages::chat_id.eq(chat_id))
        .select(messages::id)
        .load(&mut conn)
        .await?;

    diesel::delete(
        message_attachments::table.filter(message_attachments::message_id.eq_any(&message_ids)),
    )
    .execute(&mut conn)
    .await?;

    diesel::delete(messages::table.filter(messages::chat_id.eq(chat_id)))
        .execute(&mut conn)
        .await?;

    let deleted = diesel::delete(chats::table.find(chat_id))
        .execute(&mut conn)
        .await?;

    if deleted > 0 {
        info!("deleted chat {chat_id} at {}", Utc::now());
    }
    Ok(deleted > 0)
}
