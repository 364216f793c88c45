//! RSS feed synchronization engine.
//!
//! Fetches RSS documents, parses them in a single streaming pass, reconciles
//! parsed items against what is already stored (by link, keeping item ids
//! stable), and persists each feed's graph to SQLite in one transaction.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
