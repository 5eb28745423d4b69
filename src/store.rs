use anyhow::Result;
use async_trait::async_trait;

use crate::crud;
use crate::database::db::DbPool;
use crate::models::{Attachment, Message, MessageRole};

/// Persistence capability consumed by the generation pipelines. The
/// supervisor and pipelines only ever talk to this trait, so tests can run
/// them against an in-memory store.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn chat_exists(&self, chat_id: i32) -> Result<bool>;

    /// Persists a message, linking every attachment id that resolves.
    /// Unknown ids are skipped, not fatal.
    async fn create_message(
        &self,
        chat_id: i32,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> Result<Message>;

    /// Chronological history with each message's attachments.
    async fn history_with_attachments(&self, chat_id: i32)
        -> Result<Vec<(Message, Vec<Attachment>)>>;

    async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>>;

    /// Records a fresh remote-store upload; expiry is derived from now.
    async fn record_remote_upload(
        &self,
        attachment_id: &str,
        remote_file_id: &str,
    ) -> Result<Option<Attachment>>;
}

/// Production store backed by the diesel CRUD layer.
#[derive(Clone)]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        PgChatStore { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn chat_exists(&self, chat_id: i32) -> Result<bool> {
        Ok(crud::chats::get_chat(&self.pool, chat_id).await?.is_some())
    }

    async fn create_message(
        &self,
        chat_id: i32,
        role: MessageRole,
        content: &str,
        attachment_ids: &[String],
    ) -> Result<Message> {
        crud::messages::create_message(&self.pool, chat_id, role, content, attachment_ids).await
    }

    async fn history_with_attachments(
        &self,
        chat_id: i32,
    ) -> Result<Vec<(Message, Vec<Attachment>)>> {
        crud::messages::messages_with_attachments(&self.pool, chat_id).await
    }

    async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>> {
        crud::attachments::get_attachment(&self.pool, attachment_id).await
    }

    async fn record_remote_upload(
        &self,
        attachment_id: &str,
        remote_file_id: &str,
    ) -> Result<Option<Attachment>> {
        crud::attachments::update_remote_info(&self.pool, attachment_id, remote_file_id).await
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::models::attachments::remote_expiry_from;

    #[derive(Default)]
    struct Inner {
        next_message_id: i32,
        messages: Vec<(Message, Vec<String>)>,
        attachments: HashMap<String, Attachment>,
        chats: Vec<i32>,
    }

    /// In-memory `ChatStore` for pipeline and supervisor tests.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn with_chat(chat_id: i32) -> Self {
            let store = MemoryStore::default();
            store.inner.lock().unwrap().chats.push(chat_id);
            store
        }

        pub fn add_attachment(&self, attachment: Attachment) {
            self.inner
                .lock()
                .unwrap()
                .attachments
                .insert(attachment.id.clone(), attachment);
        }

        pub fn messages(&self) -> Vec<Message> {
            self.inner
                .lock()
                .unwrap()
                .messages
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }

        pub fn linked_attachment_ids(&self, message_id: i32) -> Vec<String> {
            self.inner
                .lock()
                .unwrap()
                .messages
                .iter()
                .find(|(m, _)| m.id == message_id)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default()
        }

        pub fn attachment(&self, id: &str) -> Option<Attachment> {
            self.inner.lock().unwrap().attachments.get(id).cloned()
        }
    }

    #[async_trait]
    impl ChatStore for MemoryStore {
        async fn chat_exists(&self, chat_id: i32) -> Result<bool> {
            Ok(self.inner.lock().unwrap().chats.contains(&chat_id))
        }

        async fn create_message(
            &self,
            chat_id: i32,
            role: MessageRole,
            content: &str,
            attachment_ids: &[String],
        ) -> Result<Message> {
            let mut inner = self.inner.lock().unwrap();
            inner.next_message_id += 1;
            let message = Message {
                id: inner.next_message_id,
                chat_id,
                role: role.as_str().to_string(),
                content: content.to_string(),
                created_at: Some(Utc::now().naive_utc()),
            };
            let linked: Vec<String> = attachment_ids
                .iter()
                .filter(|id| inner.attachments.contains_key(*id))
                .cloned()
                .collect();
            inner.messages.push((message.clone(), linked));
            Ok(message)
        }

        async fn history_with_attachments(
            &self,
            chat_id: i32,
        ) -> Result<Vec<(Message, Vec<Attachment>)>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .messages
                .iter()
                .filter(|(m, _)| m.chat_id == chat_id)
                .map(|(m, ids)| {
                    let files = ids
                        .iter()
                        .filter_map(|id| inner.attachments.get(id).cloned())
                        .collect();
                    (m.clone(), files)
                })
                .collect())
        }

        async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>> {
            Ok(self.inner.lock().unwrap().attachments.get(attachment_id).cloned())
        }

        async fn record_remote_upload(
            &self,
            attachment_id: &str,
            remote_file_id: &str,
        ) -> Result<Option<Attachment>> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(attachment) = inner.attachments.get_mut(attachment_id) {
                let now = Utc::now().naive_utc();
                attachment.remote_file_id = Some(remote_file_id.to_string());
                attachment.remote_uploaded_at = Some(now);
                attachment.remote_expires_at = Some(remote_expiry_from(now));
                return Ok(Some(attachment.clone()));
            }
            Ok(None)
        }
    }
}
