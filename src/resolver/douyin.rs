//! Douyin live resolver
//!
//! One request per poll against the web `enter` endpoint, sent with the
//! browser-emulation query parameters Douyin expects. The payload carries
//! room status, the per-quality FLV map, and the broadcaster's nickname,
//! which the session adopts as its display name.

use super::{FatalReason, LiveStatus, ResolveError, Resolver, StreamSource};
use crate::http::browser_client;
use async_trait::async_trait;
use serde_json::Value;

const ENTER_URL: &str = "https://live.douyin.com/webcast/room/web/enter/";

/// Fixed browser-emulation parameters; `web_rid` is appended per request.
const ENTER_PARAMS: [(&str, &str); 13] = [
    ("aid", "6383"),
    ("app_name", "douyin_web"),
    ("live_id", "1"),
    ("device_platform", "web"),
    ("language", "zh-CN"),
    ("enter_from_merge", "web_live"),
    ("cookie_enabled", "true"),
    ("screen_width", "1920"),
    ("screen_height", "1080"),
    ("browser_language", "en-US"),
    ("browser_platform", "Win32"),
    ("browser_name", "Chrome"),
    ("browser_version", "125.0.0.0"),
];

pub struct DouyinResolver {
    client: reqwest::Client,
}

impl DouyinResolver {
    pub fn new(cookie: Option<&str>) -> Result<Self, reqwest::Error> {
        let client = browser_client("https://live.douyin.com/", cookie)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Resolver for DouyinResolver {
    async fn resolve_live(&self, identifier: &str) -> Result<LiveStatus, ResolveError> {
        let response = self
            .client
            .get(ENTER_URL)
            .query(&ENTER_PARAMS)
            .query(&[("web_rid", identifier)])
            .send()
            .await?;
        let body = response.error_for_status()?.text().await?;

        // A CAPTCHA interstitial instead of JSON means requests from this
        // client are blocked until a cookie/VPN change.
        if body.contains("<title>验证</title>") {
            return Err(ResolveError::Fatal(FatalReason::Restricted));
        }

        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| ResolveError::Payload(format!("enter payload is not JSON: {e}")))?;
        parse_enter_payload(&payload)
    }
}

/// Interpret the `enter` payload: status 2 is live, anything else offline.
fn parse_enter_payload(payload: &Value) -> Result<LiveStatus, ResolveError> {
    let room = &payload["data"]["data"][0];
    let status = room["status"].as_i64().unwrap_or(4);
    if status != 2 {
        return Ok(LiveStatus::NotLive);
    }

    let url = pick_stream_url(room).ok_or_else(|| {
        ResolveError::Payload("live room exposes no usable stream url".into())
    })?;
    let display_name = payload["data"]["user"]["nickname"]
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    Ok(LiveStatus::Live(StreamSource { url, display_name }))
}

/// Best FLV URL: original quality, then full HD, then whatever remains.
fn pick_stream_url(room: &Value) -> Option<String> {
    let flv_map = room["stream_url"]["flv_pull_url"].as_object()?;
    for tier in ["ORIGIN", "FULL_HD1"] {
        if let Some(url) = flv_map.get(tier).and_then(Value::as_str) {
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
    }
    flv_map
        .values()
        .find_map(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enter_payload(status: i64, flv: Value, nickname: &str) -> Value {
        json!({
            "data": {
                "data": [{"status": status, "stream_url": {"flv_pull_url": flv}}],
                "user": {"nickname": nickname}
            }
        })
    }

    #[test]
    fn live_room_with_origin_quality() {
        let payload = enter_payload(
            2,
            json!({"FULL_HD1": "http://cdn/fhd.flv", "ORIGIN": "http://cdn/origin.flv"}),
            "某主播",
        );
        match parse_enter_payload(&payload).unwrap() {
            LiveStatus::Live(source) => {
                assert_eq!(source.url, "http://cdn/origin.flv");
                assert_eq!(source.display_name.as_deref(), Some("某主播"));
            }
            other => panic!("expected live, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_any_remaining_tier() {
        let payload = enter_payload(2, json!({"SD1": "http://cdn/sd1.flv"}), "a");
        match parse_enter_payload(&payload).unwrap() {
            LiveStatus::Live(source) => assert_eq!(source.url, "http://cdn/sd1.flv"),
            other => panic!("expected live, got {other:?}"),
        }
    }

    #[test]
    fn offline_room_is_not_live() {
        let payload = enter_payload(4, json!({}), "a");
        assert_eq!(parse_enter_payload(&payload).unwrap(), LiveStatus::NotLive);
    }

    #[test]
    fn missing_room_data_is_not_live() {
        assert_eq!(
            parse_enter_payload(&json!({"data": {}})).unwrap(),
            LiveStatus::NotLive
        );
    }

    #[test]
    fn live_without_urls_is_transient() {
        let payload = enter_payload(2, json!({}), "a");
        let err = parse_enter_payload(&payload).unwrap_err();
        assert!(!err.is_fatal());
    }
}
