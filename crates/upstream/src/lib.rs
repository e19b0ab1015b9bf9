//! Upstream content-platform gateway.
//!
//! The monitoring engine consumes this through the [`ContentGateway`] trait;
//! every call returns `Option` because the platform is rate-limited and
//! occasionally malformed — "no data" always means "skip this account this
//! cycle", never a hard error.

pub mod bili;
pub mod card;
pub mod screenshot;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

pub use {
    bili::BiliClient,
    screenshot::{HttpRenderer, NoopRenderer, ScreenshotRenderer},
};

/// Opaque credential bundle forwarded to the platform. Only assembled into a
/// Cookie header, never interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    pub cookie: String,
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: String,
    pub buvid4: String,
    pub dedeuserid: String,
    pub ac_time_value: String,
}

impl Credential {
    /// Full cookie header: the raw `cookie` field verbatim when present,
    /// otherwise assembled from the individual values.
    pub fn cookie_header(&self) -> String {
        if !self.cookie.is_empty() {
            return self.cookie.clone();
        }
        let pairs = [
            ("SESSDATA", &self.sessdata),
            ("bili_jct", &self.bili_jct),
            ("buvid3", &self.buvid3),
            ("buvid4", &self.buvid4),
            ("DedeUserID", &self.dedeuserid),
            ("ac_time_value", &self.ac_time_value),
        ];
        pairs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Account profile summary.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub avatar_url: String,
}

/// One normalized feed post, newest-first in the fetched page.
#[derive(Debug, Clone, Default)]
pub struct PostRecord {
    pub id: String,
    pub text: String,
    pub url: String,
    pub published_at: i64,
    pub is_video: bool,
    pub video_title: String,
    pub video_url: String,
    pub cover_url: String,
    pub images: Vec<String>,
}

/// Current live-room status for an account.
#[derive(Debug, Clone, Default)]
pub struct LiveStatus {
    pub is_live: bool,
    pub title: String,
    pub viewer_count: i64,
    pub room_id: Option<i64>,
    pub room_url: String,
    pub cover_url: String,
    /// Platform-reported broadcast start, unix seconds, when available.
    pub started_at: Option<i64>,
}

/// Read-side of the content platform.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    async fn fetch_profile(&self, uid: &str, credential: &Credential) -> Option<Profile>;

    /// Recent posts, newest first, with platform-pinned entries filtered out.
    async fn fetch_posts(&self, uid: &str, credential: &Credential) -> Option<Vec<PostRecord>>;

    async fn fetch_live(&self, uid: &str, credential: &Credential) -> Option<LiveStatus>;

    async fn download_image(&self, url: &str) -> Option<Vec<u8>>;
}
