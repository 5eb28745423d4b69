use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{chats, messages};

#[derive(Debug, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = chats)]
pub struct Chat {
    pub id: i32,
    pub title: String,
    pub create_time: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = chats)]
pub struct NewChat {
    pub title: String,
}

/// Who authored a message. Stored as text in the database, kept as a
/// closed enum everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Associations)]
#[diesel(belongs_to(Chat, foreign_key = chat_id))]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i32,
    pub chat_id: i32,
    pub role: String,
    pub content: String,
    pub created_at: Option<NaiveDateTime>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User.as_str()
    }
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub chat_id: i32,
    pub role: String,
    pub content: String,
}

impl NewMessage {
    pub fn new(chat_id: i32, role: MessageRole, content: impl Into<String>) -> Self {
        NewMessage {
            chat_id,
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}
