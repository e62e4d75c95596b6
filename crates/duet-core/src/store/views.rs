//! Pure view-building over raw stored data.
//!
//! Everything here is synchronous and side-effect free; the feeds call in
//! with data they already fetched.

use std::collections::{HashMap, HashSet};

use crate::chat::dedupe_by_peer;
use crate::models::{ChatIndex, ConversationSummary, UserProfile};

/// Build the emitted summary list from a raw index and resolved profiles.
///
/// Repairs duplicate entries, drops hidden ones, omits entries whose peer
/// profile is unresolved and orders the rest by recency.
pub fn build_summaries(
    index: &ChatIndex,
    profiles: &HashMap<String, UserProfile>,
) -> Vec<ConversationSummary> {
    let mut summaries: Vec<ConversationSummary> = dedupe_by_peer(&index.chats)
        .into_iter()
        .filter(|entry| !entry.hidden)
        .filter_map(|entry| {
            let peer = profiles.get(&entry.peer_id)?.clone();
            Some(ConversationSummary {
                conversation_id: entry.conversation_id,
                peer,
                last_message: entry.last_message,
                seen: entry.seen,
                updated_at: entry.updated_at,
            })
        })
        .collect();

    order_by_recency(&mut summaries);
    summaries
}

/// List ordering policy: most recent activity first. The sort is stable, so
/// equal timestamps keep their stored order; unseen status does not affect
/// ordering.
pub fn order_by_recency(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Directory view: every known user minus deleted profiles and duplicate
/// usernames (first occurrence wins).
pub fn directory(profiles: Vec<UserProfile>) -> Vec<UserProfile> {
    let mut seen = HashSet::new();
    profiles
        .into_iter()
        .filter(|profile| !profile.deleted)
        .filter(|profile| seen.insert(profile.username.clone()))
        .collect()
}
