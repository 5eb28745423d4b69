pub mod attachments;
pub mod chats;

pub use attachments::{Attachment, NewAttachment, ProcessingMethod};
pub use chats::{Chat, Message, MessageRole, NewChat, NewMessage};
