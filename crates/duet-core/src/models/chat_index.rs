use serde::{Deserialize, Serialize};

use super::user::UserProfile;

/// One user's stored view of a single conversation.
///
/// Both participants hold an entry with the same `conversation_id`; the
/// entries are personal (seen/hidden are entry-local) and are kept in step
/// by the reconciliation routine on every send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub conversation_id: String,
    pub peer_id: String,
    #[serde(default)]
    pub last_message: String,
    /// True once the owner opened the conversation after the last update
    #[serde(default)]
    pub seen: bool,
    /// Soft delete: removed from the owner's visible list, data untouched
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub updated_at: u64,
}

/// The per-user index document: every conversation the owner participates in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatIndex {
    #[serde(default)]
    pub chats: Vec<IndexEntry>,
}

impl ChatIndex {
    pub fn entry(&self, conversation_id: &str) -> Option<&IndexEntry> {
        self.chats.iter().find(|e| e.conversation_id == conversation_id)
    }

    pub fn entry_mut(&mut self, conversation_id: &str) -> Option<&mut IndexEntry> {
        self.chats.iter_mut().find(|e| e.conversation_id == conversation_id)
    }
}

/// An index entry joined with the resolved peer profile; what list views
/// consume. Hidden entries are filtered out before this type is built.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub peer: UserProfile,
    pub last_message: String,
    pub seen: bool,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(conversation_id: &str, peer_id: &str) -> IndexEntry {
        IndexEntry {
            conversation_id: conversation_id.to_string(),
            peer_id: peer_id.to_string(),
            last_message: String::new(),
            seen: false,
            hidden: false,
            updated_at: 0,
        }
    }

    #[test]
    fn test_entry_lookup_by_conversation_id() {
        let mut index = ChatIndex {
            chats: vec![entry("c1", "u2"), entry("c2", "u3")],
        };

        assert_eq!(index.entry("c2").unwrap().peer_id, "u3");
        assert!(index.entry("c9").is_none());

        index.entry_mut("c1").unwrap().seen = true;
        assert!(index.entry("c1").unwrap().seen);
    }

    #[test]
    fn test_decodes_entry_without_flag_fields() {
        // Entries written by the conversation-creation path carry no flags
        let raw = r#"{"chats":[{"conversation_id":"c1","peer_id":"u2"}]}"#;
        let index: ChatIndex = serde_json::from_str(raw).unwrap();

        let entry = index.entry("c1").unwrap();
        assert!(!entry.seen);
        assert!(!entry.hidden);
        assert_eq!(entry.last_message, "");
        assert_eq!(entry.updated_at, 0);
    }

    #[test]
    fn test_decodes_empty_index_document() {
        let index: ChatIndex = serde_json::from_str("{}").unwrap();
        assert!(index.chats.is_empty());
    }
}
