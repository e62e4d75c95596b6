//! Session-scoped chat client.
//!
//! A [`ChatClient`] is created by a sign-up/sign-in flow and torn down by
//! [`ChatClient::sign_out`]; every operation acts on behalf of its session
//! user. The backend seams arrive as a [`Backend`] bundle so the client
//! stays vendor-agnostic.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::backend::{
    get_doc, set_doc, BlobStore, DocumentStore, FsBlobStore, IdentityProvider, LocalIdentity,
    Session, SqliteStore, WriteBatch,
};
use crate::chat::{self, Delivery};
use crate::config::CoreConfig;
use crate::constants::collections;
use crate::error::{CoreError, Result};
use crate::models::{
    ChatIndex, Conversation, ConversationSummary, IndexEntry, Message, UserProfile,
};
use crate::store::{directory, IndexFeed, MessageFeed};

/// Handles to the three backend seams; cloning is cheap.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub docs: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backend {
    /// Open the local stack (SQLite documents and accounts, filesystem
    /// blobs) under one data directory.
    pub fn local(config: &CoreConfig) -> Result<Self> {
        Ok(Self {
            identity: Arc::new(LocalIdentity::open(&config.data_dir)?),
            docs: Arc::new(SqliteStore::open(&config.data_dir)?),
            blobs: Arc::new(FsBlobStore::open(config.blobs_dir())?),
        })
    }
}

/// Everything sign-up needs beyond credentials.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub username: String,
    pub email: String,
    pub password: String,
    pub about: String,
}

/// Register a new account, open its first session and write the initial
/// profile plus an empty chat index.
pub async fn sign_up(backend: &Backend, signup: &SignUp) -> Result<ChatClient> {
    backend
        .identity
        .sign_up(&signup.email, &signup.password)
        .await?;
    let session = backend
        .identity
        .sign_in(&signup.email, &signup.password)
        .await?;

    let client = ChatClient::new(backend.clone(), session);
    client
        .initialize_account(&signup.username, &signup.email, &signup.about)
        .await?;
    Ok(client)
}

/// Open a session with stored credentials.
pub async fn sign_in(backend: &Backend, email: &str, password: &str) -> Result<ChatClient> {
    let session = backend.identity.sign_in(email, password).await?;
    Ok(ChatClient::new(backend.clone(), session))
}

/// Sign in through an external provider; first use creates the account and
/// its initial records from the provider identity.
pub async fn sign_in_federated(
    backend: &Backend,
    provider: &str,
    subject: &str,
) -> Result<ChatClient> {
    let (session, created) = backend.identity.sign_in_federated(provider, subject).await?;
    let client = ChatClient::new(backend.clone(), session);
    if created {
        let email = format!("{}@{}", subject, provider);
        client.initialize_account(subject, &email, "").await?;
    }
    Ok(client)
}

/// Resume the session persisted by a previous run.
pub async fn resume(backend: &Backend) -> Result<ChatClient> {
    match backend.identity.resume().await? {
        Some(session) => Ok(ChatClient::new(backend.clone(), session)),
        None => Err(CoreError::NoSession),
    }
}

/// One signed-in user's handle on the chat system.
pub struct ChatClient {
    backend: Backend,
    session: Session,
}

impl ChatClient {
    pub fn new(backend: Backend, session: Session) -> Self {
        Self { backend, session }
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn docs(&self) -> &dyn DocumentStore {
        self.backend.docs.as_ref()
    }

    /// End the session and drop the persisted resume state.
    pub async fn sign_out(self) -> Result<()> {
        self.backend.identity.sign_out(&self.session).await
    }

    /// Write the session user's initial records: profile plus empty chat
    /// index, committed together. Called once, right after account creation.
    async fn initialize_account(&self, username: &str, email: &str, about: &str) -> Result<()> {
        let profile = UserProfile {
            id: self.user_id().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            about: about.to_string(),
            avatar: None,
            blocked: Vec::new(),
            deleted: false,
        };

        let batch = WriteBatch::new()
            .set(collections::USERS, self.user_id(), &profile)?
            .set(collections::USER_CHATS, self.user_id(), &ChatIndex::default())?;
        self.backend.docs.commit(batch).await
    }

    // ===== Profiles =====

    /// The session user's own profile.
    pub async fn profile(&self) -> Result<UserProfile> {
        get_doc(self.docs(), collections::USERS, self.user_id())
            .await?
            .ok_or(CoreError::UserNotFound)
    }

    /// Owner-only profile mutation; `None` fields stay unchanged.
    pub async fn update_profile(
        &self,
        username: Option<&str>,
        about: Option<&str>,
    ) -> Result<UserProfile> {
        let mut profile = self.profile().await?;
        if let Some(username) = username {
            profile.username = username.to_string();
        }
        if let Some(about) = about {
            profile.about = about.to_string();
        }
        set_doc(self.docs(), collections::USERS, self.user_id(), &profile).await?;
        Ok(profile)
    }

    /// Upload a new avatar image and point the profile at it.
    pub async fn set_avatar(&self, data: &[u8], file_name: &str) -> Result<String> {
        let url = self.backend.blobs.upload(data, file_name).await?;
        let mut profile = self.profile().await?;
        profile.avatar = Some(url.clone());
        set_doc(self.docs(), collections::USERS, self.user_id(), &profile).await?;
        Ok(url)
    }

    /// Look up a user by exact username. Deleted accounts are invisible.
    pub async fn find_user(&self, username: &str) -> Result<UserProfile> {
        let matches = self
            .backend
            .docs
            .find_by_field(collections::USERS, "username", username)
            .await?;

        matches
            .into_iter()
            .filter_map(|value| serde_json::from_value::<UserProfile>(value).ok())
            .find(|profile| !profile.deleted)
            .ok_or(CoreError::UserNotFound)
    }

    /// Everyone on the server, minus deleted profiles and duplicate
    /// usernames.
    pub async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let raw = self.backend.docs.list(collections::USERS).await?;
        let profiles = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        Ok(directory(profiles))
    }

    // ===== Conversations =====

    /// Start a conversation with `peer`: one conversation document plus an
    /// index entry on both sides, committed atomically.
    pub async fn create_conversation(&self, peer: &UserProfile) -> Result<String> {
        let conversation_id = Uuid::new_v4().to_string();
        let now = unix_now();

        let conversation = Conversation {
            created_at: now,
            messages: Vec::new(),
        };
        let mine = IndexEntry {
            conversation_id: conversation_id.clone(),
            peer_id: peer.id.clone(),
            last_message: String::new(),
            seen: false,
            hidden: false,
            updated_at: now,
        };
        let theirs = IndexEntry {
            peer_id: self.user_id().to_string(),
            ..mine.clone()
        };

        let batch = WriteBatch::new()
            .set(collections::CHATS, &conversation_id, &conversation)?
            .append(collections::USER_CHATS, self.user_id(), "chats", &mine)?
            .append(collections::USER_CHATS, &peer.id, "chats", &theirs)?;
        self.backend.docs.commit(batch).await?;

        Ok(conversation_id)
    }

    /// The session user's entry for a conversation with `peer_id`, if one
    /// exists.
    pub async fn conversation_with(&self, peer_id: &str) -> Result<Option<IndexEntry>> {
        let index: ChatIndex = get_doc(self.docs(), collections::USER_CHATS, self.user_id())
            .await?
            .unwrap_or_default();
        Ok(chat::dedupe_by_peer(&index.chats)
            .into_iter()
            .find(|entry| entry.peer_id == peer_id))
    }

    /// The full message sequence of a conversation, oldest first.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conversation: Conversation = get_doc(self.docs(), collections::CHATS, conversation_id)
            .await?
            .ok_or_else(|| CoreError::DocumentNotFound {
                collection: collections::CHATS.to_string(),
                id: conversation_id.to_string(),
            })?;

        let mut messages = conversation.messages;
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    /// Attachment URLs shared in a conversation (the media panel).
    pub async fn shared_media(&self, conversation_id: &str) -> Result<Vec<String>> {
        Ok(self
            .conversation(conversation_id)
            .await?
            .iter()
            .filter_map(|m| m.attachment_url().map(str::to_string))
            .collect())
    }

    // ===== Sending =====

    /// Send a text message. Empty input is a no-op.
    pub async fn send_text(&self, conversation_id: &str, peer_id: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let message = Message::text(self.user_id(), text, unix_now());
        self.deliver(conversation_id, peer_id, message).await
    }

    /// Upload an attachment and send a message referencing it.
    pub async fn send_attachment(
        &self,
        conversation_id: &str,
        peer_id: &str,
        data: &[u8],
        file_name: &str,
    ) -> Result<()> {
        let url = self.backend.blobs.upload(data, file_name).await?;
        let message = Message::attachment(self.user_id(), url, unix_now());
        self.deliver(conversation_id, peer_id, message).await
    }

    async fn deliver(&self, conversation_id: &str, peer_id: &str, message: Message) -> Result<()> {
        let me = self.profile().await?;
        let peer: UserProfile = get_doc(self.docs(), collections::USERS, peer_id)
            .await?
            .ok_or(CoreError::UserNotFound)?;
        if !chat::composition_allowed(&me, &peer) {
            return Err(CoreError::CompositionBlocked);
        }

        let delivery = Delivery {
            conversation_id: conversation_id.to_string(),
            sender_id: self.user_id().to_string(),
            receiver_id: peer_id.to_string(),
            message,
        };
        chat::deliver(self.docs(), &delivery).await
    }

    // ===== Index entry flags =====

    /// Mark a conversation read for the session user (on open).
    pub async fn mark_seen(&self, conversation_id: &str) -> Result<()> {
        self.update_own_entry(conversation_id, |entry| entry.seen = true)
            .await
    }

    /// Soft-delete a conversation from the session user's visible list. The
    /// peer's entry and the message history are untouched.
    pub async fn hide_conversation(&self, conversation_id: &str) -> Result<()> {
        self.update_own_entry(conversation_id, |entry| entry.hidden = true)
            .await
    }

    async fn update_own_entry<F>(&self, conversation_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut IndexEntry),
    {
        let mut index: ChatIndex = get_doc(self.docs(), collections::USER_CHATS, self.user_id())
            .await?
            .unwrap_or_default();

        match index.entry_mut(conversation_id) {
            Some(entry) => {
                mutate(entry);
                set_doc(self.docs(), collections::USER_CHATS, self.user_id(), &index).await
            }
            None => Err(CoreError::UnknownConversation(conversation_id.to_string())),
        }
    }

    // ===== Blocking =====

    pub async fn block(&self, peer_id: &str) -> Result<()> {
        chat::block(self.docs(), self.user_id(), peer_id).await
    }

    pub async fn unblock(&self, peer_id: &str) -> Result<()> {
        chat::unblock(self.docs(), self.user_id(), peer_id).await
    }

    /// Whether the session user may compose to `peer_id` right now.
    pub async fn can_compose(&self, peer_id: &str) -> Result<bool> {
        let me = self.profile().await?;
        let peer: UserProfile = get_doc(self.docs(), collections::USERS, peer_id)
            .await?
            .ok_or(CoreError::UserNotFound)?;
        Ok(chat::composition_allowed(&me, &peer))
    }

    // ===== Live feeds =====

    /// Live Conversation Index for the session user.
    pub async fn index_feed(&self) -> Result<IndexFeed> {
        let watch = self
            .backend
            .docs
            .watch(collections::USER_CHATS, self.user_id())
            .await?;
        Ok(IndexFeed::new(self.backend.docs.clone(), watch))
    }

    /// Live message feed for one conversation.
    pub async fn message_feed(&self, conversation_id: &str) -> Result<MessageFeed> {
        let watch = self
            .backend
            .docs
            .watch(collections::CHATS, conversation_id)
            .await?;
        Ok(MessageFeed::new(watch))
    }

    /// The session user's current summary list, resolved once. The feed and
    /// its subscription are torn down before returning.
    pub async fn chat_list(&self) -> Result<Vec<ConversationSummary>> {
        let mut feed = self.index_feed().await?;
        Ok(feed.next().await.unwrap_or_default())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn local_backend() -> (tempfile::TempDir, Backend) {
        let dir = tempdir().unwrap();
        let backend = Backend::local(&CoreConfig::new(dir.path())).unwrap();
        (dir, backend)
    }

    async fn two_users(backend: &Backend) -> (ChatClient, ChatClient) {
        let alex = sign_up(
            backend,
            &SignUp {
                username: "alex".to_string(),
                email: "alex@example.com".to_string(),
                password: "hunter2".to_string(),
                about: "hello".to_string(),
            },
        )
        .await
        .unwrap();
        let bo = sign_up(
            backend,
            &SignUp {
                username: "bo".to_string(),
                email: "bo@example.com".to_string(),
                password: "hunter2".to_string(),
                about: String::new(),
            },
        )
        .await
        .unwrap();
        (alex, bo)
    }

    #[tokio::test]
    async fn test_sign_up_writes_profile_and_empty_index() {
        let (_dir, backend) = local_backend().await;
        let (alex, _) = two_users(&backend).await;

        let profile = alex.profile().await.unwrap();
        assert_eq!(profile.username, "alex");
        assert_eq!(profile.about, "hello");

        assert!(alex.chat_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_updates_both_chat_lists() {
        let (_dir, backend) = local_backend().await;
        let (alex, bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();

        alex.send_text(&conversation_id, &peer.id, "hi")
            .await
            .unwrap();

        let alex_list = alex.chat_list().await.unwrap();
        assert_eq!(alex_list.len(), 1);
        assert_eq!(alex_list[0].last_message, "hi");
        assert!(alex_list[0].seen, "sender has seen their own message");
        assert_eq!(alex_list[0].peer.username, "bo");

        let bo_list = bo.chat_list().await.unwrap();
        assert_eq!(bo_list.len(), 1);
        assert_eq!(bo_list[0].last_message, "hi");
        assert!(!bo_list[0].seen);
        assert_eq!(bo_list[0].peer.username, "alex");

        assert_eq!(alex_list[0].updated_at, bo_list[0].updated_at);
    }

    #[tokio::test]
    async fn test_mark_seen_after_open() {
        let (_dir, backend) = local_backend().await;
        let (alex, bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();
        alex.send_text(&conversation_id, &peer.id, "hi")
            .await
            .unwrap();

        bo.mark_seen(&conversation_id).await.unwrap();
        assert!(bo.chat_list().await.unwrap()[0].seen);
    }

    #[tokio::test]
    async fn test_hidden_chat_stays_hidden_through_new_messages() {
        let (_dir, backend) = local_backend().await;
        let (alex, bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();
        alex.send_text(&conversation_id, &peer.id, "hi")
            .await
            .unwrap();

        bo.hide_conversation(&conversation_id).await.unwrap();
        assert!(bo.chat_list().await.unwrap().is_empty());

        // New traffic must not resurface it
        alex.send_text(&conversation_id, &peer.id, "still there?")
            .await
            .unwrap();
        assert!(bo.chat_list().await.unwrap().is_empty());

        // While alex still sees the conversation
        assert_eq!(alex.chat_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_block_disables_composition_but_keeps_history() {
        let (_dir, backend) = local_backend().await;
        let (alex, bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();
        alex.send_text(&conversation_id, &peer.id, "hi")
            .await
            .unwrap();

        alex.block(&peer.id).await.unwrap();
        assert!(!alex.can_compose(&peer.id).await.unwrap());

        let refused = alex.send_text(&conversation_id, &peer.id, "again").await;
        assert!(matches!(refused, Err(CoreError::CompositionBlocked)));

        // History stays visible to both parties
        assert_eq!(alex.conversation(&conversation_id).await.unwrap().len(), 1);
        assert_eq!(bo.conversation(&conversation_id).await.unwrap().len(), 1);

        alex.unblock(&peer.id).await.unwrap();
        assert!(alex.can_compose(&peer.id).await.unwrap());
        alex.send_text(&conversation_id, &peer.id, "again")
            .await
            .unwrap();
        assert_eq!(alex.conversation(&conversation_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attachment_send_and_shared_media() {
        let (_dir, backend) = local_backend().await;
        let (alex, _bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();

        alex.send_attachment(&conversation_id, &peer.id, b"png bytes", "cat.png")
            .await
            .unwrap();
        alex.send_text(&conversation_id, &peer.id, "that's my cat")
            .await
            .unwrap();

        let list = alex.chat_list().await.unwrap();
        assert_eq!(list[0].last_message, "that's my cat");

        let media = alex.shared_media(&conversation_id).await.unwrap();
        assert_eq!(media.len(), 1);
        assert!(media[0].ends_with(".png"));
    }

    #[tokio::test]
    async fn test_find_user_misses_unknown_and_deleted() {
        let (_dir, backend) = local_backend().await;
        let (alex, _bo) = two_users(&backend).await;

        let missing = alex.find_user("nobody").await;
        assert!(matches!(missing, Err(CoreError::UserNotFound)));

        // Soft-delete bo and search again
        let mut bo_profile = alex.find_user("bo").await.unwrap();
        bo_profile.deleted = true;
        set_doc(
            backend.docs.as_ref(),
            collections::USERS,
            &bo_profile.id,
            &bo_profile,
        )
        .await
        .unwrap();

        let deleted = alex.find_user("bo").await;
        assert!(matches!(deleted, Err(CoreError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_profile_update_and_avatar_upload() {
        let (_dir, backend) = local_backend().await;
        let (alex, _bo) = two_users(&backend).await;

        alex.update_profile(None, Some("new bio")).await.unwrap();
        let url = alex.set_avatar(b"image bytes", "me.png").await.unwrap();

        let profile = alex.profile().await.unwrap();
        assert_eq!(profile.about, "new bio");
        assert_eq!(profile.username, "alex");
        assert_eq!(profile.avatar.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn test_session_resume_and_sign_out() {
        let (_dir, backend) = local_backend().await;
        let (alex, _bo) = two_users(&backend).await;

        // bo signed in last, so resume picks up bo's session
        let resumed = resume(&backend).await.unwrap();
        assert_eq!(resumed.user_id(), _bo.user_id());

        resumed.sign_out().await.unwrap();
        assert!(matches!(
            resume(&backend).await,
            Err(CoreError::NoSession)
        ));

        // alex's client object still works against the document store
        assert!(alex.profile().await.is_ok());
    }

    #[tokio::test]
    async fn test_federated_sign_in_creates_account_once() {
        let (_dir, backend) = local_backend().await;

        let first = sign_in_federated(&backend, "github", "alex").await.unwrap();
        let profile = first.profile().await.unwrap();
        assert_eq!(profile.username, "alex");
        assert_eq!(profile.email, "alex@github");

        let second = sign_in_federated(&backend, "github", "alex").await.unwrap();
        assert_eq!(first.user_id(), second.user_id());
    }

    #[tokio::test]
    async fn test_live_feed_follows_a_send() {
        let (_dir, backend) = local_backend().await;
        let (alex, bo) = two_users(&backend).await;

        let peer = alex.find_user("bo").await.unwrap();
        let conversation_id = alex.create_conversation(&peer).await.unwrap();

        let mut feed = bo.index_feed().await.unwrap();
        let initial = feed.next().await.unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].last_message, "");

        alex.send_text(&conversation_id, &peer.id, "hi")
            .await
            .unwrap();

        let updated = feed.next().await.unwrap();
        assert_eq!(updated[0].last_message, "hi");
        assert!(!updated[0].seen);

        feed.stop();
    }
}
