pub mod chat_index;
pub mod message;
pub mod user;

pub use chat_index::{ChatIndex, ConversationSummary, IndexEntry};
pub use message::{Conversation, Message, MessageContent};
pub use user::UserProfile;
