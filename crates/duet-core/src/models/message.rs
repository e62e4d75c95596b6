use serde::{Deserialize, Serialize};

use crate::constants::ATTACHMENT_PREVIEW;

/// One message in a conversation. Messages are append-only: never edited,
/// never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: String,
    #[serde(flatten)]
    pub content: MessageContent,
    /// Unix seconds
    pub sent_at: u64,
}

/// A message carries text or an attachment URL, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text { text: String },
    Attachment { attachment: String },
}

impl Message {
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>, sent_at: u64) -> Self {
        Self {
            sender_id: sender_id.into(),
            content: MessageContent::Text { text: text.into() },
            sent_at,
        }
    }

    pub fn attachment(sender_id: impl Into<String>, url: impl Into<String>, sent_at: u64) -> Self {
        Self {
            sender_id: sender_id.into(),
            content: MessageContent::Attachment { attachment: url.into() },
            sent_at,
        }
    }

    /// Short preview recorded on both participants' index entries.
    pub fn preview(&self) -> &str {
        match &self.content {
            MessageContent::Text { text } => text,
            MessageContent::Attachment { .. } => ATTACHMENT_PREVIEW,
        }
    }

    pub fn attachment_url(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Attachment { attachment } => Some(attachment),
            MessageContent::Text { .. } => None,
        }
    }
}

/// A two-party message thread. The `messages` array grows monotonically via
/// the store's atomic array append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub created_at: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
}
