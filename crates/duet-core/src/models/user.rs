use serde::{Deserialize, Serialize};

/// A user profile document. Created at sign-up, mutated by the owner only.
///
/// Accounts are never hard-deleted; `deleted` marks retired profiles that
/// must stay invisible to the directory and to search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub about: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Ids of users who have blocked THIS profile's owner. The blocker
    /// writes into the blocked party's record, so "has X blocked Y" is
    /// answered by Y's profile.
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl UserProfile {
    /// True if `user_id` has blocked the owner of this profile.
    pub fn blocked_by(&self, user_id: &str) -> bool {
        self.blocked.iter().any(|b| b == user_id)
    }
}
