//! TikTok live resolver
//!
//! Two HTTP steps per poll: the room id is scraped from the `SIGI_STATE`
//! JSON embedded in the user's `/live` page, then the webcast room-info
//! endpoint reports live status and the per-quality stream URL map.

use super::{FatalReason, LiveStatus, ResolveError, Resolver, StreamSource};
use crate::http::browser_client;
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::LazyLock;

static SIGI_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script id="SIGI_STATE" type="application/json">(.*?)</script>"#)
        .expect("static regex")
});

const BASE_URL: &str = "https://www.tiktok.com";
const WEBCAST_URL: &str = "https://webcast.tiktok.com";

/// Quality tiers inside `live_core_sdk_data`, best first.
const STREAM_DATA_TIERS: [&str; 5] = ["origin", "uhd", "hd", "sd", "ld"];
/// Legacy `flv_pull_url` tiers, best first.
const FLV_PULL_TIERS: [&str; 4] = ["FULL_HD1", "HD1", "SD1", "SD2"];

pub struct TikTokResolver {
    client: reqwest::Client,
}

impl TikTokResolver {
    pub fn new(cookie: Option<&str>) -> Result<Self, reqwest::Error> {
        let client = browser_client("https://www.tiktok.com/", cookie)?;
        Ok(Self { client })
    }

    async fn fetch_room_id(&self, user: &str) -> Result<String, ResolveError> {
        let url = format!("{BASE_URL}/@{user}/live");
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ResolveError::Fatal(FatalReason::NotFound));
        }
        let body = response.error_for_status()?.text().await?;
        parse_room_id(&body, user)
    }

    async fn fetch_room_info(&self, room_id: &str) -> Result<Value, ResolveError> {
        let url = format!("{WEBCAST_URL}/webcast/room/info/?aid=1988&room_id={room_id}");
        let payload: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload)
    }
}

#[async_trait]
impl Resolver for TikTokResolver {
    async fn resolve_live(&self, identifier: &str) -> Result<LiveStatus, ResolveError> {
        let room_id = self.fetch_room_id(identifier).await?;
        tracing::debug!(user = identifier, room_id = %room_id, "resolved room id");

        let info = self.fetch_room_info(&room_id).await?;
        let data = &info["data"];
        if room_status(data) != 2 {
            return Ok(LiveStatus::NotLive);
        }

        let url = pick_stream_url(data).ok_or_else(|| {
            ResolveError::Payload("live room exposes no usable stream url".into())
        })?;
        Ok(LiveStatus::Live(StreamSource {
            url,
            display_name: None,
        }))
    }
}

/// Pull the room id out of the `SIGI_STATE` blob on the live page.
///
/// The page layout has changed before; three known locations are tried in
/// order. A page without the blob at all means the scrape no longer matches
/// the site and is fatal.
fn parse_room_id(html: &str, user: &str) -> Result<String, ResolveError> {
    let raw = SIGI_STATE
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or(ResolveError::Fatal(FatalReason::SchemaChanged))?
        .as_str();
    let state: Value =
        serde_json::from_str(raw).map_err(|_| ResolveError::Fatal(FatalReason::SchemaChanged))?;

    let candidates = [
        &state["LiveRoom"]["liveRoomUserInfo"]["user"]["roomId"],
        &state["RoomFeed"]["detail"]["liveRoom"]["roomId"],
        &state["UserModule"]["users"][user]["roomId"],
    ];
    for value in candidates {
        if let Some(id) = value.as_str() {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        if let Some(id) = value.as_u64() {
            return Ok(id.to_string());
        }
    }
    Err(ResolveError::Payload(format!(
        "no room id in page state for @{user}"
    )))
}

fn room_status(data: &Value) -> i64 {
    data["status"].as_i64().unwrap_or(4)
}

/// Choose the best capturable FLV URL, highest quality first.
///
/// `stream_data` is JSON-in-a-string; when it is absent or yields nothing
/// the older `flv_pull_url` map is consulted.
fn pick_stream_url(data: &Value) -> Option<String> {
    if let Some(raw) = data["stream_url"]["live_core_sdk_data"]["pull_data"]["stream_data"].as_str()
    {
        if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
            for tier in STREAM_DATA_TIERS {
                if let Some(url) = parsed["data"][tier]["main"]["flv"].as_str() {
                    if !url.is_empty() {
                        tracing::debug!(tier, "selected stream quality");
                        return Some(url.to_string());
                    }
                }
            }
        }
    }

    let flv_map = &data["stream_url"]["flv_pull_url"];
    for tier in FLV_PULL_TIERS {
        if let Some(url) = flv_map[tier].as_str() {
            if !url.is_empty() {
                tracing::debug!(tier, "selected legacy stream quality");
                return Some(url.to_string());
            }
        }
    }
    None
}
