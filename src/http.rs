//! Browser-profile HTTP client construction
//!
//! Both platforms reject obviously non-browser traffic, so every request
//! carries a desktop Chrome user agent, a platform Referer, and the caller's
//! cookie string when one is configured. A missing cookie degrades access to
//! private/region-gated rooms but is never an error here.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT};
use std::time::Duration;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Build a client with browser-like default headers.
///
/// A cookie string that is not valid header material is dropped with a
/// warning rather than failing the whole session.
pub fn browser_client(
    referer: &str,
    cookie: Option<&str>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,vi;q=0.8"),
    );
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, value);
    }
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(_) => {
                tracing::warn!("configured cookie contains invalid header bytes, ignoring");
            }
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(15))
        .build()
}

/// Client for long-lived streaming reads: same headers, no overall timeout
/// (a live capture runs until the stream ends).
pub fn streaming_client(
    referer: &str,
    cookie: Option<&str>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, value);
    }
    if let Some(cookie) = cookie {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.insert(COOKIE, value);
        }
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(15))
        .build()
}
