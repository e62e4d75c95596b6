//! Block relationship between two users.
//!
//! Blocking is recorded on the blocked party's profile: `block(owner, peer)`
//! adds the owner's id to the PEER's `blocked` set. While a block exists in
//! either direction, composition is disabled for both sides; message history
//! stays visible and nothing is deleted.

use crate::backend::{get_doc, set_doc, DocumentStore};
use crate::constants::collections;
use crate::error::{CoreError, Result};
use crate::models::UserProfile;

/// Record on the peer's profile that `owner` has blocked them.
pub async fn block<S: DocumentStore + ?Sized>(
    store: &S,
    owner_id: &str,
    peer_id: &str,
) -> Result<()> {
    let mut peer: UserProfile = get_doc(store, collections::USERS, peer_id)
        .await?
        .ok_or(CoreError::UserNotFound)?;

    if !peer.blocked_by(owner_id) {
        peer.blocked.push(owner_id.to_string());
        set_doc(store, collections::USERS, peer_id, &peer).await?;
    }
    Ok(())
}

/// Remove `owner`'s block of `peer`. Reverses only the composition
/// restriction; history was never touched.
pub async fn unblock<S: DocumentStore + ?Sized>(
    store: &S,
    owner_id: &str,
    peer_id: &str,
) -> Result<()> {
    let mut peer: UserProfile = get_doc(store, collections::USERS, peer_id)
        .await?
        .ok_or(CoreError::UserNotFound)?;

    if peer.blocked_by(owner_id) {
        peer.blocked.retain(|b| b != owner_id);
        set_doc(store, collections::USERS, peer_id, &peer).await?;
    }
    Ok(())
}

/// Whether `me` may compose to `peer` right now. A block in either
/// direction disables composition for both parties.
pub fn composition_allowed(me: &UserProfile, peer: &UserProfile) -> bool {
    !peer.blocked_by(&me.id) && !me.blocked_by(&peer.id)
}
