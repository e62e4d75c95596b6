pub mod blocking;
pub mod reconcile;

pub use blocking::{block, composition_allowed, unblock};
pub use reconcile::{apply_delivery, dedupe_by_peer, deliver, Delivery};
