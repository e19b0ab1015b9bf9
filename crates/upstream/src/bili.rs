//! HTTP client for the bilibili web API.
//!
//! Every fetch is best-effort: transport errors, non-success HTTP statuses
//! and unexpected payload shapes are logged at `warn` and collapse to
//! `None` so a bad cycle never takes the poll loop down.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    ContentGateway, Credential, LiveStatus, PostRecord, Profile,
    card::{self, normalize_url},
};

const PROFILE_URL: &str = "https://api.bilibili.com/x/space/acc/info";
const FEED_URL: &str = "https://api.bilibili.com/x/polymer/web-dynamic/v1/feed/space";
const LIVE_URL: &str = "https://api.live.bilibili.com/room/v1/Room/getRoomInfoOld";
const REFERER: &str = "https://www.bilibili.com/";

pub struct BiliClient {
    http:       reqwest::Client,
    user_agent: String,
}

impl BiliClient {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            user_agent: user_agent.to_owned(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)], credential: &Credential) -> Option<Value> {
        let mut request = self
            .http
            .get(url)
            .query(query)
            .header("User-Agent", &self.user_agent)
            .header("Referer", REFERER);
        let cookie = credential.cookie_header();
        if !cookie.is_empty() {
            request = request.header("Cookie", cookie);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "upstream request failed");
                return None;
            },
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "upstream returned non-success");
            return None;
        }
        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url, error = %e, "upstream returned non-JSON body");
                None
            },
        }
    }

    /// Unwrap the standard `{code, message, data}` envelope.
    fn data(url: &str, body: Value) -> Option<Value> {
        let code = body.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            warn!(url, code, message, "upstream rejected request");
            return None;
        }
        body.get("data").cloned()
    }
}

#[async_trait]
impl ContentGateway for BiliClient {
    async fn fetch_profile(&self, uid: &str, credential: &Credential) -> Option<Profile> {
        let body = self.get_json(PROFILE_URL, &[("mid", uid)], credential).await?;
        let data = Self::data(PROFILE_URL, body)?;
        let name = data.get("name").and_then(Value::as_str).unwrap_or("").to_owned();
        if name.is_empty() {
            return None;
        }
        let avatar_url = data
            .get("face")
            .and_then(Value::as_str)
            .map(normalize_url)
            .unwrap_or_default();
        Some(Profile { name, avatar_url })
    }

    async fn fetch_posts(&self, uid: &str, credential: &Credential) -> Option<Vec<PostRecord>> {
        let body = self.get_json(FEED_URL, &[("host_mid", uid)], credential).await?;
        let data = Self::data(FEED_URL, body)?;
        let items = data.get("items").and_then(Value::as_array)?;

        let posts: Vec<PostRecord> = items
            .iter()
            .filter(|item| !card::is_pinned(item))
            .filter_map(card::post_from_item)
            .collect();
        debug!(uid, count = posts.len(), "fetched feed page");
        Some(posts)
    }

    async fn fetch_live(&self, uid: &str, credential: &Credential) -> Option<LiveStatus> {
        let body = self.get_json(LIVE_URL, &[("mid", uid)], credential).await?;
        let data = Self::data(LIVE_URL, body)?;
        Some(parse_live(&data))
    }

    async fn download_image(&self, url: &str) -> Option<Vec<u8>> {
        let url = normalize_url(url);
        let response = self
            .http
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .header("Referer", REFERER)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "image download failed");
            return None;
        }
        response.bytes().await.ok().map(|b| b.to_vec())
    }
}

fn parse_live(data: &Value) -> LiveStatus {
    let first_str = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| data.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
            .unwrap_or("")
            .to_owned()
    };
    let first_i64 = |keys: &[&str]| -> Option<i64> {
        keys.iter().find_map(|k| {
            let v = data.get(*k)?;
            v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    };

    let is_live = first_i64(&["liveStatus", "live_status"]).unwrap_or(0) == 1;
    let room_id = first_i64(&["roomid", "room_id"]).filter(|id| *id > 0);
    let room_url = match (first_str(&["url", "link"]), room_id) {
        (url, _) if !url.is_empty() => normalize_url(&url),
        (_, Some(id)) => format!("https://live.bilibili.com/{id}"),
        _ => String::new(),
    };

    LiveStatus {
        is_live,
        title: first_str(&["title", "roomname"]),
        viewer_count: first_i64(&["online", "online_num"]).unwrap_or(0),
        room_id,
        room_url,
        cover_url: normalize_url(&first_str(&[
            "keyframe",
            "live_screen",
            "cover",
            "cover_from_user",
            "user_cover",
        ])),
        started_at: first_i64(&["live_time", "start_time"]).filter(|ts| *ts > 0),
    }
}
