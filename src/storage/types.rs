use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feed database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to `InstanceLocked`
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self, items: Vec<Item>) -> Feed {
        Feed {
            id: self.id,
            url: self.url,
            title: self.title,
            description: self.description,
            last_fetched: self.last_fetched.and_then(from_timestamp),
            items,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published: Option<i64>,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            summary: self.summary,
            link: self.link,
            published_at: self.published.and_then(from_timestamp),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedSummaryRow {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<i64>,
    pub item_count: i64,
}

impl FeedSummaryRow {
    pub(crate) fn into_summary(self) -> FeedSummary {
        FeedSummary {
            id: self.id,
            url: self.url,
            title: self.title,
            description: self.description,
            last_fetched: self.last_fetched.and_then(from_timestamp),
            item_count: self.item_count,
        }
    }
}

/// Timestamps are stored as whole Unix seconds
pub(crate) fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// ============================================================================
// Entity Graph
// ============================================================================

/// Title shown while a parse pass is running. Never committed: the parser
/// replaces it before the pass completes.
pub const LOADING_TITLE: &str = "Loading...";

/// A subscribed RSS channel together with the items it owns.
///
/// A `Feed` loaded from the store is a unit of work: the parser and the
/// reconciler mutate it in memory and `Database::commit_feed` writes the whole
/// graph back in one transaction. Items live only in `items`; removing one from
/// the collection is how a provisional item is discarded.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: Uuid,
    /// Normalized source URL, unique across feeds
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub items: Vec<Item>,
}

/// One entry of a feed. `link` is the de-duplication key within the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: Uuid,
    /// Owning feed (non-owning back-reference)
    pub feed_id: Uuid,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Feed {
    /// Create a feed that has never been fetched. Nothing is persisted until
    /// the feed is committed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: String::new(),
            description: String::new(),
            last_fetched: None,
            items: Vec::new(),
        }
    }

    /// Allocate a new provisional item owned by this feed and return its id.
    pub fn create_item(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.items.push(Item {
            id,
            feed_id: self.id,
            title: String::new(),
            summary: String::new(),
            link: String::new(),
            published_at: None,
        });
        id
    }

    pub fn item(&self, id: Uuid) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: Uuid) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Find an item with the given link, ignoring the item `exclude_id`.
    pub fn find_item_by_link(&self, link: &str, exclude_id: Uuid) -> Option<&Item> {
        self.items
            .iter()
            .find(|item| item.id != exclude_id && item.link == link)
    }

    /// Detach an item from the feed, returning it if it was present.
    pub fn remove_item(&mut self, id: Uuid) -> Option<Item> {
        let index = self.items.iter().position(|item| item.id == id)?;
        // Items are unordered, so a swap_remove is fine
        Some(self.items.swap_remove(index))
    }

    /// Record a fetch at `at`. The timestamp never moves backwards.
    pub fn mark_fetched(&mut self, at: DateTime<Utc>) {
        if self.last_fetched.map_or(true, |prev| at > prev) {
            self.last_fetched = Some(at);
        }
    }
}

/// Feed listing entry (no items loaded)
#[derive(Debug, Clone)]
pub struct FeedSummary {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub description: String,
    pub last_fetched: Option<DateTime<Utc>>,
    pub item_count: i64,
}
