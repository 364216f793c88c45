use uuid::Uuid;

use super::schema::Database;
use super::types::{DatabaseError, Item, ItemDbRow};

/// Maximum number of items returned by a listing query
const MAX_ITEMS: i64 = 2000;

impl Database {
    // ========================================================================
    // Item Queries
    // ========================================================================

    /// Every item owned by a feed, in storage order. Used to build the
    /// in-memory graph that a refresh reconciles against.
    pub(crate) async fn load_items(&self, feed_id: Uuid) -> Result<Vec<Item>, DatabaseError> {
        let rows: Vec<ItemDbRow> = sqlx::query_as(
            "SELECT id, feed_id, title, summary, link, published FROM items WHERE feed_id = ?",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    /// Items for a feed, newest first. Undated items sort last.
    ///
    /// `limit` is capped at 2000 rows.
    pub async fn items_for_feed(
        &self,
        feed_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Item>, DatabaseError> {
        let limit = limit.unwrap_or(MAX_ITEMS).clamp(0, MAX_ITEMS);

        let rows: Vec<ItemDbRow> = sqlx::query_as(
            r#"
                SELECT id, feed_id, title, summary, link, published
                FROM items
                WHERE feed_id = ?
                ORDER BY published IS NULL, published DESC, title
                LIMIT ?
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }
}
