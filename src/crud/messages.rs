use std::collections::HashMap;

use anyhow::Result;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use log::warn;

use crate::database::db::DbPool;
use crate::models::{Attachment, Message, MessageRole, NewMessage};
use crate::schema::{attachments, message_attachments, messages};

/// Persists a message and links every attachment id that resolves to an
/// existing attachment row. Unknown ids are logged and skipped.
pub async fn create_message(
    pool: &DbPool,
    chat_id: i32,
    role: MessageRole,
    content: &str,
    attachment_ids: &[String],
) -> Result<Message> {
    let mut conn = pool.get().await?;

    let message: Message = diesel::insert_into(messages::table)
        .values(NewMessage::new(chat_id, role, content))
        .get_result(&mut conn)
        .await?;

    if !attachment_ids.is_empty() {
        let known: Vec<String> = attachments::table
            .filter(attachments::id.eq_any(attachment_ids))
            .select(attachments::id)
            .load(&mut conn)
            .await?;

        for id in attachment_ids {
            if !known.contains(id) {
                warn!("attachment {id} not found, skipping link to message {}", message.id);
            }
        }

        let links: Vec<_> = known
            .iter()
            .map(|id| {
                (
                    message_attachments::message_id.eq(message.id),
                    message_attachments::attachment_id.eq(id),
                )
            })
            .collect();
        diesel::insert_into(message_attachments::table)
            .values(&links)
            .execute(&mut conn)
            .await?;
    }

    Ok(message)
}

pub async fn messages_for_chat(pool: &DbPool, chat_id: i32) -> Result<Vec<Message>> {
    let mut conn = pool.get().await?;

    let history = messages::table
        .filter(messages::chat_id.eq(chat_id))
        .order((messages::created_at.asc(), messages::id.asc()))
        .load::<Message>(&mut conn)
        .await?;

    Ok(history)
}

/// Chronological history with each message's attachments, for prompt
/// context assembly.
pub async fn messages_with_attachments(
    pool: &DbPool,
    chat_id: i32,
) -> Result<Vec<(Message, Vec<Attachment>)>> {
    let history = messages_for_chat(pool, chat_id).await?;
    let message_ids: Vec<i32> = history.iter().map(|m| m.id).collect();

    let mut conn = pool.get().await?;
    let linked: Vec<(i32, Attachment)> = message_attachments::table
        .inner_join(attachments::table)
        .filter(message_attachments::message_id.eq_any(&message_ids))
        .select((message_attachments::message_id, attachments::all_columns))
        .load(&mut conn)
        .await?;

    let mut by_message: HashMap<i32, Vec<Attachment>> = HashMap::new();
    for (message_id, attachment) in linked {
        by_message.entry(message_id).or_default().push(attachment);
    }

    Ok(history
        .into_iter()
        .map(|m| {
            let files = by_message.remove(&m.id).unwrap_or_default();
            (m, files)
        })
        .collect())
}
