pub mod chats;
pub mod files;
pub mod streaming;
