use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;

use super::fetcher::{FetchError, Fetcher};
use super::parser::{self, ParseError};
use super::policy::{InFlight, SyncPolicy};
use crate::config::Config;
use crate::storage::{Database, DatabaseError, Feed, FeedSummary, Item};
use crate::util::{validate_url, UrlValidationError};

const DEFAULT_CONCURRENCY: usize = 10;

/// Failure of one add / refresh / delete operation.
///
/// None of these leave partial state behind: the store is only written by a
/// single commit at the very end of an operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("Parse failed: {0}")]
    ParseFailed(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("No feed with URL {0}")]
    FeedNotFound(String),
}

/// Result of a refresh that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub title: String,
    /// Items seen for the first time
    pub inserted: usize,
    /// Items matched by link to an existing item and updated in place
    pub merged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fetched too recently; see [`SyncPolicy`]
    Throttled { last_fetched: DateTime<Utc> },
    /// Another refresh of the same feed is running
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(RefreshStats),
    Skipped(SkipReason),
}

/// Per-feed entry of a [`RefreshReport`].
#[derive(Debug)]
pub struct RefreshResult {
    pub url: String,
    pub result: Result<RefreshOutcome, SyncError>,
}

/// Outcome of a refresh-all, in completion order.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub results: Vec<RefreshResult>,
}

impl RefreshReport {
    pub fn refreshed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.result, Ok(RefreshOutcome::Refreshed(_))))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.result, Ok(RefreshOutcome::Skipped(_))))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_err()).count()
    }

    /// The most recently completed failure, if any feed failed.
    pub fn last_failure(&self) -> Option<(&str, &SyncError)> {
        self.results.iter().rev().find_map(|r| match &r.result {
            Err(e) => Some((r.url.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// Drives fetch → parse → reconcile → commit for feeds in a [`Database`].
///
/// Network I/O runs outside the store's writer lock; everything from loading
/// a feed's graph to committing it runs inside it, so concurrent refreshes of
/// different feeds never interleave their read-merge-write sequences.
#[derive(Clone)]
pub struct Syncer {
    db: Database,
    fetcher: Fetcher,
    policy: SyncPolicy,
    in_flight: InFlight,
    concurrency: usize,
}

impl Syncer {
    pub fn new(db: Database, fetcher: Fetcher) -> Self {
        Self {
            db,
            fetcher,
            policy: SyncPolicy::default(),
            in_flight: InFlight::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn from_config(db: Database, config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(db, Fetcher::from_config(config)?)
            .with_policy(SyncPolicy::new(config.refresh_interval()))
            .with_concurrency(config.max_concurrent_refreshes))
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Subscribe to `raw_url`, or update the feed if it is already subscribed.
    ///
    /// Always fetches; the throttle does not apply to an explicit add.
    pub async fn add_feed(&self, raw_url: &str) -> Result<RefreshOutcome, SyncError> {
        let url = validate_url(raw_url)?.to_string();

        let Some(_claim) = self.in_flight.try_claim(&url) else {
            return Ok(RefreshOutcome::Skipped(SkipReason::InProgress));
        };

        let fetched_at = refresh_start();
        let bytes = self.fetcher.fetch(&url).await?;

        let _writer = self.db.lock_writer().await;
        let mut feed = match self.db.find_feed_by_url(&url).await? {
            Some(feed) => feed,
            None => {
                tracing::debug!(feed = %url, "Creating new feed");
                Feed::new(url.as_str())
            }
        };

        let stats = self.apply(&mut feed, &bytes, fetched_at).await?;
        tracing::info!(
            feed = %url,
            title = %stats.title,
            inserted = stats.inserted,
            merged = stats.merged,
            "Added feed"
        );
        Ok(RefreshOutcome::Refreshed(stats))
    }

    /// Refresh one subscribed feed, subject to the throttle unless `force`.
    pub async fn refresh_feed(
        &self,
        raw_url: &str,
        force: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        let url = validate_url(raw_url)?.to_string();

        let Some(_claim) = self.in_flight.try_claim(&url) else {
            tracing::debug!(feed = %url, "Refresh already running, skipping");
            return Ok(RefreshOutcome::Skipped(SkipReason::InProgress));
        };

        let summary = self
            .db
            .feed_summary(&url)
            .await?
            .ok_or_else(|| SyncError::FeedNotFound(url.clone()))?;

        let fetched_at = refresh_start();
        if let Some(last_fetched) = summary.last_fetched {
            if !self.policy.allows(Some(last_fetched), fetched_at, force) {
                tracing::debug!(feed = %url, last_fetched = %last_fetched, "Refresh throttled");
                return Ok(RefreshOutcome::Skipped(SkipReason::Throttled { last_fetched }));
            }
        }

        let bytes = self.fetcher.fetch(&url).await?;

        let _writer = self.db.lock_writer().await;
        // Reload under the lock: the feed may have changed or gone while fetching
        let mut feed = self
            .db
            .find_feed_by_url(&url)
            .await?
            .ok_or_else(|| SyncError::FeedNotFound(url.clone()))?;

        let stats = self.apply(&mut feed, &bytes, fetched_at).await?;
        tracing::info!(
            feed = %url,
            inserted = stats.inserted,
            merged = stats.merged,
            "Refreshed feed"
        );
        Ok(RefreshOutcome::Refreshed(stats))
    }

    /// Refresh every subscribed feed, at most `concurrency` at a time.
    ///
    /// A failing feed never stops the batch; each feed's result is reported.
    pub async fn refresh_all(&self, force: bool) -> Result<RefreshReport, SyncError> {
        let feeds = self.db.list_feeds().await?;
        if feeds.is_empty() {
            return Ok(RefreshReport::default());
        }

        let results: Vec<RefreshResult> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.refresh_feed(&feed.url, force).await;
                if let Err(e) = &result {
                    tracing::warn!(feed = %feed.url, error = %e, "Feed refresh failed");
                }
                RefreshResult {
                    url: feed.url,
                    result,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = RefreshReport { results };
        tracing::info!(
            refreshed = report.refreshed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Refresh complete"
        );
        Ok(report)
    }

    /// Unsubscribe from a feed. Returns the number of items removed with it.
    pub async fn delete_feed(&self, raw_url: &str) -> Result<u64, SyncError> {
        let url = validate_url(raw_url)?.to_string();

        let _writer = self.db.lock_writer().await;
        let removed = self
            .db
            .delete_feed(&url)
            .await?
            .ok_or_else(|| SyncError::FeedNotFound(url.clone()))?;

        tracing::info!(feed = %url, items = removed, "Deleted feed");
        Ok(removed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedSummary>, SyncError> {
        Ok(self.db.list_feeds().await?)
    }

    /// Items of a subscribed feed, newest first.
    pub async fn items(&self, raw_url: &str) -> Result<Vec<Item>, SyncError> {
        let url = validate_url(raw_url)?.to_string();
        let summary = self
            .db
            .feed_summary(&url)
            .await?
            .ok_or_else(|| SyncError::FeedNotFound(url.clone()))?;

        Ok(self.db.items_for_feed(summary.id, None).await?)
    }

    /// Parse into the loaded graph and commit it. Caller holds the writer lock.
    ///
    /// On any error the graph is dropped uncommitted, so the stored feed keeps
    /// its last-known-good state.
    async fn apply(
        &self,
        feed: &mut Feed,
        bytes: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<RefreshStats, SyncError> {
        let parsed = parser::parse(bytes, feed, fetched_at)?;
        self.db.commit_feed(feed).await?;

        Ok(RefreshStats {
            title: feed.title.clone(),
            inserted: parsed.inserted,
            merged: parsed.merged,
        })
    }
}

/// Refresh start time, at the store's whole-second resolution
fn refresh_start() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
