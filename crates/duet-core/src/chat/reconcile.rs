//! Reconciliation: keeping both participants' index entries consistent
//! after a new message.
//!
//! A delivery touches three documents: the conversation (message append) and
//! each participant's chat index. [`deliver`] commits all three as one batch,
//! so a send either lands everywhere or nowhere.

use std::collections::HashSet;

use tracing::debug;

use crate::backend::{get_doc, DocumentStore, WriteBatch};
use crate::constants::collections;
use crate::error::Result;
use crate::models::{ChatIndex, IndexEntry, Message};

/// A message on its way into a conversation, with everything the index
/// updates need.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: Message,
}

impl Delivery {
    fn peer_of(&self, owner_id: &str) -> &str {
        if owner_id == self.sender_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Update one participant's index for a delivery.
///
/// `seen` becomes true only on the sender's own index. An existing entry
/// keeps its `hidden` flag: new traffic does not resurface a conversation
/// the owner has hidden. A missing entry is inserted fresh.
pub fn apply_delivery(index: &mut ChatIndex, owner_id: &str, delivery: &Delivery) {
    let seen = owner_id == delivery.sender_id;
    let preview = delivery.message.preview().to_string();
    let sent_at = delivery.message.sent_at;

    match index.entry_mut(&delivery.conversation_id) {
        Some(entry) => {
            entry.last_message = preview;
            entry.seen = seen;
            entry.updated_at = sent_at;
        }
        None => index.chats.push(IndexEntry {
            conversation_id: delivery.conversation_id.clone(),
            peer_id: delivery.peer_of(owner_id).to_string(),
            last_message: preview,
            seen,
            hidden: false,
            updated_at: sent_at,
        }),
    }
}

/// Keep only the first entry per peer.
///
/// Stored indexes have been observed to carry duplicate entries for a peer;
/// the repair happens here, before any consumer sees the list.
pub fn dedupe_by_peer(entries: &[IndexEntry]) -> Vec<IndexEntry> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|entry| seen.insert(entry.peer_id.clone()))
        .cloned()
        .collect()
}

/// Deliver a message: append it to the conversation and update both
/// participants' index entries, committed as one atomic batch.
///
/// A participant without an index document is skipped: their account
/// predates per-user indexes and stays untouched.
pub async fn deliver<S: DocumentStore + ?Sized>(store: &S, delivery: &Delivery) -> Result<()> {
    let mut batch = WriteBatch::new().append(
        collections::CHATS,
        &delivery.conversation_id,
        "messages",
        &delivery.message,
    )?;

    let (sender_index, receiver_index) = futures::join!(
        get_doc::<ChatIndex, _>(store, collections::USER_CHATS, &delivery.sender_id),
        get_doc::<ChatIndex, _>(store, collections::USER_CHATS, &delivery.receiver_id),
    );

    for (owner_id, loaded) in [
        (&delivery.sender_id, sender_index?),
        (&delivery.receiver_id, receiver_index?),
    ] {
        match loaded {
            Some(mut index) => {
                apply_delivery(&mut index, owner_id, delivery);
                batch = batch.set(collections::USER_CHATS, owner_id, &index)?;
            }
            None => {
                debug!(owner = %owner_id, "no chat index document; skipping index update");
            }
        }
    }

    store.commit(batch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{set_doc, SqliteStore};
    use crate::models::Conversation;
    use tempfile::tempdir;

    fn delivery(text: &str, sent_at: u64) -> Delivery {
        Delivery {
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            receiver_id: "u2".to_string(),
            message: Message::text("u1", text, sent_at),
        }
    }

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
    fn test_seen_is_true_only_for_the_sender() {
        let delivery = delivery("hi", 100);

        let mut sender = ChatIndex {
            chats: vec![entry("c1", "u2")],
        };
        let mut receiver = ChatIndex {
            chats: vec![entry("c1", "u1")],
        };

        apply_delivery(&mut sender, "u1", &delivery);
        apply_delivery(&mut receiver, "u2", &delivery);

        let sender_entry = sender.entry("c1").unwrap();
        let receiver_entry = receiver.entry("c1").unwrap();

        assert!(sender_entry.seen);
        assert!(!receiver_entry.seen);
        assert_eq!(sender_entry.last_message, "hi");
        assert_eq!(receiver_entry.last_message, "hi");
        assert_eq!(sender_entry.updated_at, 100);
        assert_eq!(receiver_entry.updated_at, 100);
    }

    #[test]
    fn test_missing_entry_is_inserted_with_the_right_peer() {
        let delivery = delivery("hi", 100);
        let mut receiver = ChatIndex::default();

        apply_delivery(&mut receiver, "u2", &delivery);

        let inserted = receiver.entry("c1").unwrap();
        assert_eq!(inserted.peer_id, "u1", "receiver's peer is the sender");
        assert!(!inserted.seen);
        assert!(!inserted.hidden);

        let mut sender = ChatIndex::default();
        apply_delivery(&mut sender, "u1", &delivery);
        assert_eq!(sender.entry("c1").unwrap().peer_id, "u2");
    }

    #[test]
    fn test_hidden_stays_sticky_across_new_activity() {
        let delivery = delivery("are you there?", 200);

        let mut receiver = ChatIndex {
            chats: vec![IndexEntry {
                hidden: true,
                ..entry("c1", "u1")
            }],
        };

        apply_delivery(&mut receiver, "u2", &delivery);

        let updated = receiver.entry("c1").unwrap();
        assert!(updated.hidden, "new traffic must not resurface a hidden chat");
        assert_eq!(updated.last_message, "are you there?");
        assert_eq!(updated.updated_at, 200);
    }

    #[test]
    fn test_dedupe_keeps_first_entry_per_peer() {
        let entries = vec![
            IndexEntry {
                last_message: "first".to_string(),
                ..entry("c1", "u2")
            },
            IndexEntry {
                last_message: "second".to_string(),
                ..entry("c9", "u2")
            },
            entry("c2", "u3"),
        ];

        let deduped = dedupe_by_peer(&entries);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].last_message, "first");
        assert_eq!(deduped[1].peer_id, "u3");

        // Idempotent on already-clean input
        assert_eq!(dedupe_by_peer(&deduped), deduped);
    }

    #[tokio::test]
    async fn test_deliver_commits_message_and_both_indexes() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();

        set_doc(&store, collections::USER_CHATS, "u1", &ChatIndex::default())
            .await
            .unwrap();
        set_doc(&store, collections::USER_CHATS, "u2", &ChatIndex::default())
            .await
            .unwrap();

        deliver(&store, &delivery("hi", 100)).await.unwrap();

        let conversation: Conversation = get_doc(&store, collections::CHATS, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].preview(), "hi");

        let sender: ChatIndex = get_doc(&store, collections::USER_CHATS, "u1")
            .await
            .unwrap()
            .unwrap();
        let receiver: ChatIndex = get_doc(&store, collections::USER_CHATS, "u2")
            .await
            .unwrap()
            .unwrap();

        let sender_entry = sender.entry("c1").unwrap();
        let receiver_entry = receiver.entry("c1").unwrap();
        assert_eq!(sender_entry.last_message, receiver_entry.last_message);
        assert_eq!(sender_entry.updated_at, receiver_entry.updated_at);
        assert!(sender_entry.seen);
        assert!(!receiver_entry.seen);
    }

    #[tokio::test]
    async fn test_deliver_tolerates_a_missing_index_document() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();

        // Only the sender has an index document
        set_doc(&store, collections::USER_CHATS, "u1", &ChatIndex::default())
            .await
            .unwrap();

        deliver(&store, &delivery("hi", 100)).await.unwrap();

        let sender: ChatIndex = get_doc(&store, collections::USER_CHATS, "u1")
            .await
            .unwrap()
            .unwrap();
        assert!(sender.entry("c1").is_some());

        let receiver: Option<ChatIndex> =
            get_doc(&store, collections::USER_CHATS, "u2").await.unwrap();
        assert!(receiver.is_none(), "absent index must stay absent");

        // The message itself still landed
        let conversation: Conversation = get_doc(&store, collections::CHATS, "c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.messages.len(), 1);
    }
}
