//! Application-wide constants
//!
//! Centralized location for magic strings that are used across
//! multiple modules.

/// Preview text recorded on index entries when the payload is not text.
pub const ATTACHMENT_PREVIEW: &str = "Attachment";

/// Document collections used by the chat client
pub mod collections {
    /// User profiles, keyed by user id
    pub const USERS: &str = "users";
    /// Per-user chat index documents, keyed by owner user id
    pub const USER_CHATS: &str = "userchats";
    /// Conversations (message sequences), keyed by conversation id
    pub const CHATS: &str = "chats";
}
