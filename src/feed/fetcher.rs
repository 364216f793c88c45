//! One-shot feed retrieval over a shared reqwest client.
//!
//! Plain `http` URLs are upgraded to https before the request, and redirects
//! may not lead back off https.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching a feed.
///
/// Every variant means the fetch produced no usable bytes; callers must not
/// change any stored state when they see one.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL could not be parsed or its scheme could not be rewritten to https
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with any status other than 200
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Rewrite `url` to the https scheme, keeping host, port, path and query.
///
/// # Errors
///
/// [`FetchError::InvalidUrl`] if `url` does not parse or its scheme cannot be
/// switched to https (e.g. `mailto:` or `data:` URLs).
pub fn secure_url(url: &str) -> Result<Url, FetchError> {
    let mut parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

    if parsed.scheme() != "https" && parsed.set_scheme("https").is_err() {
        return Err(FetchError::InvalidUrl(format!(
            "cannot rewrite {} to https",
            parsed
        )));
    }

    Ok(parsed)
}

/// Whether a redirect hop to `target` may be followed after `hops` earlier hops.
///
/// With `https_only`, a hop to any other scheme is refused so a server cannot
/// undo the https upgrade.
pub fn redirect_allowed(target: &Url, hops: usize, https_only: bool) -> bool {
    hops < MAX_REDIRECTS && (!https_only || target.scheme() == "https")
}

/// Redirect policy for feed clients, see [`redirect_allowed`].
pub fn redirect_policy(https_only: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        let hops = attempt.previous().len();
        if redirect_allowed(attempt.url(), hops, https_only) {
            attempt.follow()
        } else if hops >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.error("redirect leaves https")
        }
    })
}

/// Retrieves raw feed bytes.
///
/// Performs exactly one request per [`Fetcher::fetch`] call; retry policy,
/// if any, belongs to the caller. Cloning is cheap (the reqwest client is
/// reference counted).
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    upgrade_insecure: bool,
}

impl Fetcher {
    /// Wrap an existing client with default limits (30s, 10MB, https upgrade on).
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            upgrade_insecure: true,
        }
    }

    /// Build the shared HTTP client and limits from configuration.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(redirect_policy(!config.allow_insecure))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self::new(client)
            .with_timeout(timeout)
            .with_max_bytes(config.max_feed_bytes)
            .allow_insecure(config.allow_insecure))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Keep plain `http` URLs as they are instead of upgrading them to https.
    /// Meant for local mirrors and mock servers.
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.upgrade_insecure = !allow;
        self
    }

    /// Fetch `url` and return the response body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - unparseable URL or failed scheme rewrite
    /// - [`FetchError::Network`] - connection, TLS or body read failure
    /// - [`FetchError::HttpStatus`] - any status other than 200
    /// - [`FetchError::Timeout`] - request plus body read exceeded the timeout
    /// - [`FetchError::ResponseTooLarge`] - body exceeded the size limit
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let target = if self.upgrade_insecure {
            secure_url(url)?
        } else {
            Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?
        };

        tracing::debug!(url = %target, "Fetching feed");

        tokio::time::timeout(self.timeout, self.fetch_once(target))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn fetch_once(&self, target: Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(target).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: trust an oversized Content-Length without reading the body
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
