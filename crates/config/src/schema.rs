//! Config schema: engine tuning, gateway defaults, watched accounts and
//! their notification bindings.

use serde::{Deserialize, Serialize};

/// Default desktop user agent sent to the content platform.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Global poll cadence in seconds; per-account overrides inherit this
    /// when set to 0.
    pub poll_interval_secs: u64,

    /// Default cadence for repeated "still live" notifications, in minutes.
    /// Effective values are floored at 30 wherever they are resolved.
    pub live_recurring_minutes: u64,

    /// Maximum number of newly-detected posts dispatched per poll cycle.
    pub catch_up_limit: usize,

    /// Timeout for upstream HTTP calls, in seconds.
    pub http_timeout_secs: u64,

    pub user_agent: String,

    /// Sqlite URL for the runtime status cache.
    pub status_db: String,

    pub screenshot: ScreenshotConfig,
    pub gateway: GatewayDefaults,
    pub accounts: Vec<AccountConfig>,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            live_recurring_minutes: 60,
            catch_up_limit: 3,
            http_timeout_secs: 8,
            user_agent: DEFAULT_USER_AGENT.into(),
            status_db: "sqlite://herald-status.db?mode=rwc".into(),
            screenshot: ScreenshotConfig::default(),
            gateway: GatewayDefaults::default(),
            accounts: Vec::new(),
        }
    }
}

impl HeraldConfig {
    /// Fill in derived fields after parsing: bindings without an explicit id
    /// get a stable per-account sequence so recurring timers can key on them.
    pub fn normalized(mut self) -> Self {
        for account in &mut self.accounts {
            let mut next_id = account
                .bindings
                .iter()
                .filter_map(|b| b.id)
                .max()
                .unwrap_or(0);
            for binding in &mut account.bindings {
                if binding.id.is_none() {
                    next_id += 1;
                    binding.id = Some(next_id);
                }
            }
        }
        self
    }
}

/// Screenshot render service endpoint (optional; rendering degrades to cover
/// download and then to text-only when absent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub endpoint: Option<String>,
}

/// Fallback OneBot endpoint and target applied to bindings that leave their
/// own fields empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayDefaults {
    pub ws_url: String,
    pub access_token: String,
    /// "group" or "private".
    pub target_kind: String,
    pub target_id: String,
}

/// One watched creator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Stable numeric id for the status cache; defaults to the list position.
    pub id: Option<i64>,

    /// External account id on the content platform.
    pub uid: String,

    /// Display name; resolved from the platform on first fetch when empty.
    pub name: String,

    pub enabled: bool,

    /// Seconds between polls; 0 inherits the global default.
    pub poll_interval_secs: u64,

    pub credential: CredentialConfig,
    pub bindings: Vec<BindingConfig>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: None,
            uid: String::new(),
            name: String::new(),
            enabled: true,
            poll_interval_secs: 0,
            credential: CredentialConfig::default(),
            bindings: Vec::new(),
        }
    }
}

/// Opaque platform credential bundle. Forwarded to the upstream client as a
/// Cookie header, never interpreted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Full cookie header; takes precedence over the individual fields.
    pub cookie: String,
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: String,
    pub buvid4: String,
    pub dedeuserid: String,
    pub ac_time_value: String,
}

/// One delivery channel attached to an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    pub id: Option<i64>,
    pub name: String,

    /// Inline endpoint; empty fields inherit [`GatewayDefaults`].
    pub ws_url: String,
    pub access_token: String,
    pub target_kind: String,
    pub target_id: String,

    /// Master switch: when false this binding never produces traffic.
    pub enable_gateway: bool,

    pub notify_post: bool,
    pub notify_video: bool,
    pub notify_live_start: bool,
    pub notify_live_recurring: bool,
    pub notify_live_end: bool,

    pub enable_screenshot: bool,

    /// Recurring live-update cadence in minutes; 0 inherits the global
    /// default. Floored at 30 when resolved.
    pub recurring_minutes: u64,

    // Per-event template overrides; empty uses the built-in default.
    pub template_post: String,
    pub template_video: String,
    pub template_live_start: String,
    pub template_live_recurring: String,
    pub template_live_end: String,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: "default".into(),
            ws_url: String::new(),
            access_token: String::new(),
            target_kind: String::new(),
            target_id: String::new(),
            enable_gateway: true,
            notify_post: true,
            notify_video: true,
            notify_live_start: true,
            notify_live_recurring: true,
            notify_live_end: true,
            enable_screenshot: true,
            recurring_minutes: 0,
            template_post: String::new(),
            template_video: String::new(),
            template_live_start: String::new(),
            template_live_recurring: String::new(),
            template_live_end: String::new(),
        }
    }
}
