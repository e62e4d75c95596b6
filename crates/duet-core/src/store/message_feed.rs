use futures::StreamExt;
use tracing::warn;

use crate::backend::DocumentWatch;
use crate::models::{Conversation, Message};

/// Live Conversation Detail Stream: the full message sequence after every
/// change, oldest first. The sequence only ever grows.
pub struct MessageFeed {
    watch: DocumentWatch,
}

impl MessageFeed {
    pub(crate) fn new(watch: DocumentWatch) -> Self {
        Self { watch }
    }

    /// Next emission, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Vec<Message>> {
        let change = self.watch.next().await?;

        let conversation = match change.body {
            Some(body) => match serde_json::from_value::<Conversation>(body) {
                Ok(conversation) => conversation,
                Err(err) => {
                    warn!(error = %err, "malformed conversation document");
                    return Some(Vec::new());
                }
            },
            None => return Some(Vec::new()),
        };

        let mut messages = conversation.messages;
        messages.sort_by_key(|m| m.sent_at);
        Some(messages)
    }

    /// Tear the subscription down explicitly (dropping the feed does the
    /// same).
    pub fn stop(self) {
        self.watch.stop();
    }
}
