mod feeds;
mod items;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Feed, FeedSummary, Item, LOADING_TITLE};
