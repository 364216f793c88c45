use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a raw URL string for use as a feed source.
///
/// Accepts only absolute `http`/`https` URLs with a host. Surrounding
/// whitespace (common when pasting) is ignored. The returned [`Url`] is in
/// normalized form; its serialization is what the store uses as the feed's
/// lookup key, so `HTTPS://Example.COM/rss` and `https://example.com/rss`
/// name the same feed.
///
/// # Examples
///
/// ```
/// use feedsync::util::validate_url;
///
/// let url = validate_url("  https://Example.com/feed.xml ").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(validate_url("not a url").is_err());
/// assert!(validate_url("ftp://example.com/feed").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}
