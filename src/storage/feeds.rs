use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedDbRow, FeedSummary, FeedSummaryRow};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Find a feed by its normalized URL, loading every item it owns.
    pub async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            "SELECT id, url, title, description, last_fetched FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = self.load_items(row.id).await?;
        Ok(Some(row.into_feed(items)))
    }

    /// List all feeds with their item counts, ordered by title
    pub async fn list_feeds(&self) -> Result<Vec<FeedSummary>, DatabaseError> {
        let rows: Vec<FeedSummaryRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.url, f.title, f.description, f.last_fetched,
                    COUNT(i.id) AS item_count
                FROM feeds f
                LEFT JOIN items i ON i.feed_id = f.id
                GROUP BY f.id
                ORDER BY f.title COLLATE NOCASE, f.url
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedSummaryRow::into_summary).collect())
    }

    /// Summary of a single feed without loading its items
    pub async fn feed_summary(&self, url: &str) -> Result<Option<FeedSummary>, DatabaseError> {
        let row: Option<FeedSummaryRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.url, f.title, f.description, f.last_fetched,
                    (SELECT COUNT(*) FROM items i WHERE i.feed_id = f.id) AS item_count
                FROM feeds f
                WHERE f.url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedSummaryRow::into_summary))
    }

    /// Delete a feed and every item it owns.
    ///
    /// Returns the number of items removed, or `None` if no feed has this URL.
    /// Callers mutating the store concurrently must hold [`Database::lock_writer`].
    pub async fn delete_feed(&self, url: &str) -> Result<Option<u64>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let items_removed =
            sqlx::query("DELETE FROM items WHERE feed_id = (SELECT id FROM feeds WHERE url = ?)")
                .bind(url)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        let feeds_removed = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok((feeds_removed > 0).then_some(items_removed))
    }

    /// Persist a feed graph in a single transaction.
    ///
    /// Upserts the feed row (by id) and every item in `feed.items` (by id).
    /// Items discarded during reconciliation were never persisted, so they
    /// simply do not appear. `last_fetched` is only ever moved forward, even
    /// if an older graph is committed after a newer one.
    ///
    /// Dropping the returned future before it resolves rolls the transaction
    /// back, leaving the store untouched.
    pub async fn commit_feed(&self, feed: &Feed) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feeds (id, url, title, description, last_fetched)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                description = excluded.description,
                last_fetched = CASE
                    WHEN feeds.last_fetched IS NULL OR excluded.last_fetched > feeds.last_fetched
                    THEN excluded.last_fetched
                    ELSE feeds.last_fetched
                END
        "#,
        )
        .bind(feed.id)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(feed.last_fetched.map(|t| t.timestamp()))
        .execute(&mut *tx)
        .await?;

        // 6 binds per row, 50 rows keeps well under SQLite's 999 parameter limit
        const BATCH_SIZE: usize = 50;

        for chunk in feed.items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO items (id, feed_id, title, summary, link, published) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(item.id)
                    .push_bind(feed.id)
                    .push_bind(&item.title)
                    .push_bind(&item.summary)
                    .push_bind(&item.link)
                    .push_bind(item.published_at.map(|t| t.timestamp()));
            });

            builder.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 title = excluded.title, \
                 summary = excluded.summary, \
                 link = excluded.link, \
                 published = excluded.published",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            feed = %feed.url,
            items = feed.items.len(),
            "Committed feed graph"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Feed};
    use chrono::{Duration, TimeZone, Utc};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_feed(url: &str, links: &[&str]) -> Feed {
        let mut feed = Feed::new(url);
        feed.title = "Test Feed".to_string();
        feed.description = "About tests".to_string();
        feed.mark_fetched(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        for link in links {
            let id = feed.create_item();
            let item = feed.item_mut(id).unwrap();
            item.link = link.to_string();
            item.title = format!("Title for {}", link);
        }
        feed
    }

    #[tokio::test]
    async fn test_find_missing_feed_returns_none() {
        let db = test_db().await;
        assert!(db
            .find_feed_by_url("https://example.com/rss")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_commit_and_find_round_trip() {
        let db = test_db().await;
        let feed = test_feed("https://example.com/rss", &["https://example.com/1"]);
        db.commit_feed(&feed).await.unwrap();

        let loaded = db
            .find_feed_by_url("https://example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, feed.id);
        assert_eq!(loaded.title, "Test Feed");
        assert_eq!(loaded.description, "About tests");
        assert_eq!(loaded.last_fetched, feed.last_fetched);
        assert_eq!(loaded.items, feed.items);
    }

    #[tokio::test]
    async fn test_commit_updates_in_place() {
        let db = test_db().await;
        let mut feed = test_feed("https://example.com/rss", &["https://example.com/1"]);
        db.commit_feed(&feed).await.unwrap();

        feed.title = "Renamed".to_string();
        feed.items[0].title = "Edited".to_string();
        db.commit_feed(&feed).await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Renamed");
        assert_eq!(feeds[0].item_count, 1);

        let loaded = db
            .find_feed_by_url("https://example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.items[0].title, "Edited");
    }

    #[tokio::test]
    async fn test_commit_never_moves_last_fetched_back() {
        let db = test_db().await;
        let mut feed = test_feed("https://example.com/rss", &[]);
        let newer = feed.last_fetched.unwrap() + Duration::hours(1);
        feed.last_fetched = Some(newer);
        db.commit_feed(&feed).await.unwrap();

        // A stale graph committed later must not rewind the timestamp
        feed.last_fetched = Some(newer - Duration::hours(2));
        db.commit_feed(&feed).await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds[0].last_fetched, Some(newer));
    }

    #[tokio::test]
    async fn test_duplicate_url_with_new_identity_rejected() {
        let db = test_db().await;
        db.commit_feed(&test_feed("https://example.com/rss", &[]))
            .await
            .unwrap();

        let result = db
            .commit_feed(&test_feed("https://example.com/rss", &[]))
            .await;
        assert!(result.is_err());
        assert_eq!(db.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_link_within_feed_rejected() {
        let db = test_db().await;
        let feed = test_feed(
            "https://example.com/rss",
            &["https://example.com/1", "https://example.com/1"],
        );

        assert!(db.commit_feed(&feed).await.is_err());
        // Failed commit leaves nothing behind
        assert!(db.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_links_may_repeat() {
        let db = test_db().await;
        let feed = test_feed("https://example.com/rss", &["", ""]);
        db.commit_feed(&feed).await.unwrap();

        assert_eq!(db.list_feeds().await.unwrap()[0].item_count, 2);
    }

    #[tokio::test]
    async fn test_delete_feed_cascades_to_items() {
        let db = test_db().await;
        let feed = test_feed(
            "https://example.com/rss",
            &["https://example.com/1", "https://example.com/2"],
        );
        db.commit_feed(&feed).await.unwrap();
        let other = test_feed("https://other.example.com/rss", &["https://other.example.com/1"]);
        db.commit_feed(&other).await.unwrap();

        let removed = db.delete_feed("https://example.com/rss").await.unwrap();
        assert_eq!(removed, Some(2));

        assert!(db.items_for_feed(feed.id, None).await.unwrap().is_empty());
        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].url, "https://other.example.com/rss");
    }

    #[tokio::test]
    async fn test_feed_summary() {
        let db = test_db().await;
        let feed = test_feed(
            "https://example.com/rss",
            &["https://example.com/1", "https://example.com/2"],
        );
        db.commit_feed(&feed).await.unwrap();

        let summary = db
            .feed_summary("https://example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.id, feed.id);
        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.last_fetched, feed.last_fetched);

        assert!(db
            .feed_summary("https://missing.example.com/rss")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_feed() {
        let db = test_db().await;
        assert_eq!(db.delete_feed("https://nope.example.com/").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_feeds_sorted_by_title() {
        let db = test_db().await;
        let mut b = test_feed("https://b.example.com/rss", &[]);
        b.title = "beta".into();
        let mut a = test_feed("https://a.example.com/rss", &["https://a.example.com/1"]);
        a.title = "Alpha".into();
        db.commit_feed(&b).await.unwrap();
        db.commit_feed(&a).await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        let titles: Vec<_> = feeds.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "beta"]);
        assert_eq!(feeds[0].item_count, 1);
        assert_eq!(feeds[1].item_count, 0);
    }
}
