pub mod index_feed;
pub mod message_feed;
pub mod views;

pub use index_feed::IndexFeed;
pub use message_feed::MessageFeed;
pub use views::{build_summaries, directory, order_by_recency};
