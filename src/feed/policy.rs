//! Refresh throttling.
//!
//! A feed is re-fetched only when forced or when its throttle window has
//! passed; [`InFlight`] additionally keeps two refreshes of one feed from
//! running at the same time.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default throttle window between two unforced fetches of one feed.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(900);

/// Whether a feed last fetched at `last_fetch` may be fetched again at `now`.
///
/// Allowed when `force` is set, when the feed was never fetched, or when
/// strictly more than `min_interval` has elapsed. A `last_fetch` in the future
/// (clock skew) counts as not elapsed.
pub fn should_refresh(
    last_fetch: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_interval: Duration,
    force: bool,
) -> bool {
    if force {
        return true;
    }

    let Some(last_fetch) = last_fetch else {
        return true;
    };

    match (now - last_fetch).to_std() {
        Ok(elapsed) => elapsed > min_interval,
        Err(_) => false,
    }
}

/// Throttle configuration applied to every feed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub min_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl SyncPolicy {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    pub fn allows(
        &self,
        last_fetch: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        force: bool,
    ) -> bool {
        should_refresh(last_fetch, now, self.min_interval, force)
    }
}

/// Set of feed URLs with a refresh currently running.
///
/// Complements the persisted `last_fetched` gate: that timestamp only moves
/// once a refresh commits, so two triggers arriving while the first fetch is
/// still on the wire would otherwise both pass the throttle.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    urls: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `url`. Returns `None` if a refresh of it is already running.
    ///
    /// The claim is released when the returned guard drops, including when
    /// the refresh future holding it is cancelled.
    pub fn try_claim(&self, url: &str) -> Option<InFlightGuard> {
        let mut urls = self.urls.lock().unwrap_or_else(|e| e.into_inner());
        if !urls.insert(url.to_string()) {
            return None;
        }

        Some(InFlightGuard {
            urls: Arc::clone(&self.urls),
            url: url.to_string(),
        })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(url)
    }
}

/// Releases an [`InFlight`] claim on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    urls: Arc<Mutex<HashSet<String>>>,
    url: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.url);
    }
}
