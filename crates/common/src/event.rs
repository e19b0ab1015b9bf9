use serde::{Deserialize, Serialize};

/// The five notification kinds a binding can toggle independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new feed post (non-video).
    Post,
    /// A new video upload.
    Video,
    LiveStart,
    /// Periodic "still live" update.
    LiveRecurring,
    LiveEnd,
}

impl EventKind {
    /// Stable key used for template lookup and logging.
    pub fn key(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Video => "video",
            Self::LiveStart => "live_start",
            Self::LiveRecurring => "live_recurring",
            Self::LiveEnd => "live_end",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
