//! In-memory per-account runtime state. Owned exclusively by the engine
//! task; never shared.

use std::collections::HashMap;

use {chrono::{DateTime, Utc}, herald_upstream::PostRecord};

/// Live-room phase for one account.
///
/// Recurring timers live inside [`LiveState`], so they can only exist while
/// the account is actually broadcasting.
#[derive(Debug, Clone, Default)]
pub enum LivePhase {
    /// No successful live fetch yet; the first observation becomes the
    /// baseline without firing events.
    #[default]
    Unobserved,
    Offline,
    Live(LiveState),
}

/// State of an in-progress broadcast.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    /// Broadcast start as observed or platform-reported.
    pub started_at: Option<DateTime<Utc>>,
    pub title: String,
    pub url: String,
    pub cover_url: String,
    pub current_viewers: i64,
    pub peak_viewers: i64,

    /// Last recurring notification per binding id. Seeded at broadcast
    /// start; an entry here implies the binding owes no update yet.
    pub last_recurring: HashMap<i64, DateTime<Utc>>,
}

/// Compact copy of the newest seen post, kept for the status surface.
#[derive(Debug, Clone, Default)]
pub struct PostSummary {
    pub id: String,
    pub text: String,
    pub url: String,
    pub published_at: i64,
    pub is_video: bool,
    pub video_title: String,
    pub video_url: String,
    pub cover_url: String,
}

impl From<&PostRecord> for PostSummary {
    fn from(post: &PostRecord) -> Self {
        Self {
            id: post.id.clone(),
            text: post.text.clone(),
            url: post.url.clone(),
            published_at: post.published_at,
            is_video: post.is_video,
            video_title: post.video_title.clone(),
            video_url: post.video_url.clone(),
            cover_url: post.cover_url.clone(),
        }
    }
}

/// Everything the engine remembers about one watched account between polls.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    /// Newest post id seen; `None` until the cold-start baseline lands.
    pub last_post_id: Option<String>,
    pub last_post: Option<PostSummary>,
    pub avatar_url: String,
    pub live_phase: LivePhase,
    /// When this account is next due; `None` forces a poll on the next tick.
    pub next_poll_at: Option<DateTime<Utc>>,
}

impl AccountState {
    pub fn live(&self) -> Option<&LiveState> {
        match &self.live_phase {
            LivePhase::Live(live) => Some(live),
            _ => None,
        }
    }
}
