//! Platform live-status resolution
//!
//! A resolver answers one question per poll: is this user live right now,
//! and if so, where can the stream be pulled from. Each platform derives a
//! prioritized list of candidate stream URLs by quality tier and returns the
//! best usable one.

pub mod douyin;
pub mod tiktok;

pub use douyin::DouyinResolver;
pub use tiktok::TikTokResolver;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

static DOUYIN_ROOM_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"live\.douyin\.com/(\d+)").expect("static regex"));
static TIKTOK_AT_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_.\-]+)").expect("static regex"));
static TIKTOK_BARE_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static regex"));

/// The streaming platforms this crate knows how to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Douyin,
}

impl Platform {
    /// Infer the platform from raw user input (a Douyin room URL selects
    /// Douyin, anything else is treated as a TikTok handle).
    pub fn detect(input: &str) -> Platform {
        if input.contains("live.douyin.com/") {
            Platform::Douyin
        } else {
            Platform::TikTok
        }
    }

    /// Extract the canonical identifier from raw input: the numeric room id
    /// for Douyin, the bare username for TikTok. `None` means the input is
    /// not usable for this platform.
    pub fn extract_identifier(self, input: &str) -> Option<String> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        match self {
            Platform::Douyin => DOUYIN_ROOM_URL
                .captures(input)
                .map(|c| c[1].to_string()),
            Platform::TikTok => {
                if let Some(c) = TIKTOK_AT_HANDLE.captures(input) {
                    return Some(c[1].to_string());
                }
                TIKTOK_BARE_HANDLE
                    .is_match(input)
                    .then(|| input.to_string())
            }
        }
    }

    /// Short tag used in generated file names.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Platform::TikTok => "TT",
            Platform::Douyin => "DY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Douyin => "douyin",
        }
    }
}

/// A capturable stream location, plus the display name the platform reports
/// for the broadcaster when it differs from the queried identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub url: String,
    pub display_name: Option<String>,
}

/// Outcome of a successful live-status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// The user exists but is not currently broadcasting.
    NotLive,
    /// The user is live and the stream can be pulled from `StreamSource`.
    Live(StreamSource),
}

/// Reasons a session must stop monitoring a user for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalReason {
    /// The identifier does not name a known user/room.
    NotFound,
    /// The account or room is private, age-gated, or region-blocked.
    Restricted,
    /// The platform payload no longer matches what this crate understands.
    SchemaChanged,
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FatalReason::NotFound => "user not found",
            FatalReason::Restricted => "account restricted or access blocked",
            FatalReason::SchemaChanged => "platform API changed, update required",
        };
        f.write_str(text)
    }
}

/// Resolution failures. `Fatal` ends monitoring immediately; everything else
/// takes the same retry path as a not-live result.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{0}")]
    Fatal(FatalReason),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl ResolveError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::Fatal(_))
    }

    pub fn fatal_reason(&self) -> Option<FatalReason> {
        match self {
            ResolveError::Fatal(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Live-status lookup for one platform.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Determine whether `identifier` is live and, if so, where the stream
    /// can be captured from.
    async fn resolve_live(&self, identifier: &str) -> Result<LiveStatus, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_douyin_urls() {
        assert_eq!(
            Platform::detect("https://live.douyin.com/123456"),
            Platform::Douyin
        );
        assert_eq!(Platform::detect("@alice"), Platform::TikTok);
        assert_eq!(Platform::detect("alice"), Platform::TikTok);
    }

    #[test]
    fn extract_tiktok_handles() {
        let p = Platform::TikTok;
        assert_eq!(p.extract_identifier("@alice"), Some("alice".into()));
        assert_eq!(p.extract_identifier("alice"), Some("alice".into()));
        assert_eq!(
            p.extract_identifier("https://www.tiktok.com/@some.user_1/live"),
            Some("some.user_1".into())
        );
        assert_eq!(p.extract_identifier("not a handle!"), None);
        assert_eq!(p.extract_identifier(""), None);
    }

    #[test]
    fn extract_douyin_room_ids() {
        let p = Platform::Douyin;
        assert_eq!(
            p.extract_identifier("https://live.douyin.com/745964462470"),
            Some("745964462470".into())
        );
        assert_eq!(
            p.extract_identifier("https://live.douyin.com/745964462470?enter=link"),
            Some("745964462470".into())
        );
        assert_eq!(p.extract_identifier("745964462470"), None);
    }
}
