//! Feed synchronization: fetching, parsing and reconciling RSS feeds.
//!
//! - [`fetcher`] - one-shot HTTP retrieval, upgraded to https
//! - [`dates`] - `pubDate` resolution over an ordered list of formats
//! - [`parser`] - streaming event-driven RSS parser writing into a [`Feed`](crate::storage::Feed)
//! - [`reconcile`] - link-based de-duplication that keeps item identities stable
//! - [`policy`] - refresh throttling
//! - [`sync`] - the [`Syncer`] tying the above to the store
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use feedsync::config::Config;
//! use feedsync::feed::Syncer;
//! use feedsync::storage::Database;
//!
//! let db = Database::open(":memory:").await?;
//! let syncer = Syncer::from_config(db, &Config::default())?;
//!
//! syncer.add_feed("https://example.com/rss").await?;
//! let report = syncer.refresh_all(false).await?;
//! println!("{} refreshed, {} failed", report.refreshed(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod dates;
pub mod fetcher;
pub mod parser;
pub mod policy;
pub mod reconcile;
mod sync;

pub use fetcher::{FetchError, Fetcher};
pub use parser::{parse, ParseError, ParseStats};
pub use policy::{should_refresh, SyncPolicy, DEFAULT_MIN_INTERVAL};
pub use reconcile::{reconcile, Reconciled};
pub use sync::{
    RefreshOutcome, RefreshReport, RefreshResult, RefreshStats, SkipReason, SyncError, Syncer,
};
