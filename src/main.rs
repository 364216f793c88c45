use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedsync::config::Config;
use feedsync::feed::{RefreshOutcome, SkipReason, Syncer};
use feedsync::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

/// Create the config directory user-only if it does not exist yet
fn ensure_dir(dir: &std::path::Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    // SEC-007: user-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Fetch and sync RSS feeds into a local store")]
struct Args {
    /// Config file (default: ~/.config/feedsync/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides database_path from the config)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed (or update it if already subscribed)
    Add { url: String },
    /// Refresh one feed, or every feed when no URL is given
    Refresh {
        url: Option<String>,
        /// Ignore the refresh interval
        #[arg(long)]
        force: bool,
    },
    /// List subscribed feeds
    List,
    /// List a feed's items, newest first
    Items { url: String },
    /// Unsubscribe from a feed and delete its items
    Remove { url: String },
}

fn describe(outcome: &RefreshOutcome) -> String {
    match outcome {
        RefreshOutcome::Refreshed(stats) => format!(
            "{} ({} new, {} updated)",
            stats.title, stats.inserted, stats.merged
        ),
        RefreshOutcome::Skipped(SkipReason::Throttled { last_fetched }) => format!(
            "skipped, fetched at {} (use --force)",
            last_fetched.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        RefreshOutcome::Skipped(SkipReason::InProgress) => "skipped, already refreshing".into(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_dir(&config_dir)?;
            config_dir.join("feeds.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The feed database is in use by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let syncer = Syncer::from_config(db, &config).context("Failed to build HTTP client")?;

    match args.command {
        Command::Add { url } => {
            let outcome = syncer
                .add_feed(&url)
                .await
                .with_context(|| format!("Failed to add {}", url))?;
            println!("Added {}", describe(&outcome));
        }
        Command::Refresh { url: Some(url), force } => {
            let outcome = syncer
                .refresh_feed(&url, force)
                .await
                .with_context(|| format!("Failed to refresh {}", url))?;
            println!("{}: {}", url, describe(&outcome));
        }
        Command::Refresh { url: None, force } => {
            let report = syncer
                .refresh_all(force)
                .await
                .context("Failed to load feeds")?;

            for entry in &report.results {
                match &entry.result {
                    Ok(outcome) => println!("{}: {}", entry.url, describe(outcome)),
                    Err(e) => eprintln!("{}: error: {}", entry.url, e),
                }
            }
            println!(
                "{} refreshed, {} skipped, {} failed",
                report.refreshed(),
                report.skipped(),
                report.failed()
            );

            if let Some((url, e)) = report.last_failure() {
                anyhow::bail!(
                    "{} of {} feeds failed (last: {}: {})",
                    report.failed(),
                    report.results.len(),
                    url,
                    e
                );
            }
        }
        Command::List => {
            let feeds = syncer.list_feeds().await.context("Failed to list feeds")?;
            if feeds.is_empty() {
                println!("No feeds. Add one with: feedsync add <url>");
            }
            for feed in feeds {
                let fetched = feed
                    .last_fetched
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{}\n  {}  [{} items, fetched {}]",
                    feed.title, feed.url, feed.item_count, fetched
                );
            }
        }
        Command::Items { url } => {
            let items = syncer
                .items(&url)
                .await
                .with_context(|| format!("Failed to list items of {}", url))?;
            for item in items {
                let date = item
                    .published_at
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".into());
                let title = if item.title.is_empty() {
                    "(untitled)"
                } else {
                    item.title.as_str()
                };
                println!("{}  {}", date, title);
                if !item.link.is_empty() {
                    println!("            {}", item.link);
                }
            }
        }
        Command::Remove { url } => {
            let removed = syncer
                .delete_feed(&url)
                .await
                .with_context(|| format!("Failed to remove {}", url))?;
            println!("Removed {} ({} items)", url, removed);
        }
    }

    Ok(())
}
