use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tracing::warn;

use crate::backend::{get_doc, DocumentStore, DocumentWatch};
use crate::constants::collections;
use crate::models::{ChatIndex, ConversationSummary, UserProfile};
use crate::store::views::build_summaries;

/// Live Conversation Index for one user.
///
/// Emits a freshly built summary list for the current state and then for
/// every change of the backing index document. Peer profiles are resolved
/// concurrently per emission; an unresolved peer drops that entry only.
pub struct IndexFeed {
    store: Arc<dyn DocumentStore>,
    watch: DocumentWatch,
}

impl IndexFeed {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, watch: DocumentWatch) -> Self {
        Self { store, watch }
    }

    /// Next emission, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Vec<ConversationSummary>> {
        let change = self.watch.next().await?;

        let index = match change.body {
            Some(body) => match serde_json::from_value::<ChatIndex>(body) {
                Ok(index) => index,
                Err(err) => {
                    warn!(error = %err, "malformed chat index; emitting empty list");
                    ChatIndex::default()
                }
            },
            None => ChatIndex::default(),
        };

        Some(self.resolve(index).await)
    }

    /// Tear the subscription down explicitly (dropping the feed does the
    /// same).
    pub fn stop(self) {
        self.watch.stop();
    }

    async fn resolve(&self, index: ChatIndex) -> Vec<ConversationSummary> {
        let mut peer_ids: Vec<&str> = index.chats.iter().map(|e| e.peer_id.as_str()).collect();
        peer_ids.sort_unstable();
        peer_ids.dedup();

        let store = self.store.as_ref();
        let fetches = peer_ids
            .iter()
            .map(|peer_id| get_doc::<UserProfile, _>(store, collections::USERS, peer_id));

        let mut profiles = HashMap::new();
        for (peer_id, fetched) in peer_ids.iter().zip(join_all(fetches).await) {
            match fetched {
                Ok(Some(profile)) => {
                    profiles.insert(profile.id.clone(), profile);
                }
                Ok(None) => warn!(peer = %peer_id, "peer profile missing; dropping entry"),
                Err(err) => {
                    warn!(peer = %peer_id, error = %err, "peer profile fetch failed; dropping entry")
                }
            }
        }

        build_summaries(&index, &profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{set_doc, SqliteStore, WriteBatch};
    use crate::models::IndexEntry;
    use tempfile::tempdir;

    fn profile(id: &str, username: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            about: String::new(),
            avatar: None,
            blocked: Vec::new(),
            deleted: false,
        }
    }

    fn entry(conversation_id: &str, peer_id: &str, updated_at: u64) -> IndexEntry {
        IndexEntry {
            conversation_id: conversation_id.to_string(),
            peer_id: peer_id.to_string(),
            last_message: String::new(),
            seen: false,
            hidden: false,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_feed_emits_current_state_then_updates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).unwrap());

        set_doc(store.as_ref(), collections::USERS, "u2", &profile("u2", "bo"))
            .await
            .unwrap();
        set_doc(
            store.as_ref(),
            collections::USER_CHATS,
            "u1",
            &ChatIndex {
                chats: vec![entry("c1", "u2", 100)],
            },
        )
        .await
        .unwrap();

        let watch = store.watch(collections::USER_CHATS, "u1").await.unwrap();
        let mut feed = IndexFeed::new(store.clone(), watch);

        let first = feed.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].peer.username, "bo");

        // A second conversation lands; the feed re-emits with it on top
        set_doc(store.as_ref(), collections::USERS, "u3", &profile("u3", "kim"))
            .await
            .unwrap();
        let batch = WriteBatch::new()
            .append(collections::USER_CHATS, "u1", "chats", &entry("c2", "u3", 200))
            .unwrap();
        store.commit(batch).await.unwrap();

        let second = feed.next().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].conversation_id, "c2");
        assert_eq!(second[1].conversation_id, "c1");
    }

    #[tokio::test]
    async fn test_feed_emits_empty_list_for_absent_document() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).unwrap());

        let watch = store.watch(collections::USER_CHATS, "u1").await.unwrap();
        let mut feed = IndexFeed::new(store.clone(), watch);

        assert!(feed.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_peer_is_omitted_not_fatal() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path()).unwrap());

        set_doc(store.as_ref(), collections::USERS, "u2", &profile("u2", "bo"))
            .await
            .unwrap();
        set_doc(
            store.as_ref(),
            collections::USER_CHATS,
            "u1",
            &ChatIndex {
                chats: vec![entry("c1", "u2", 100), entry("c2", "u9", 200)],
            },
        )
        .await
        .unwrap();

        let watch = store.watch(collections::USER_CHATS, "u1").await.unwrap();
        let mut feed = IndexFeed::new(store.clone(), watch);

        let emitted = feed.next().await.unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].conversation_id, "c1");
    }
}
