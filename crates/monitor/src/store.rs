//! Watch-list source: which accounts to poll and where their notifications
//! go. The engine reloads the list every cycle, so config edits picked up by
//! the loader take effect without touching runtime state.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    herald_common::EventKind,
    herald_config::{BindingConfig, HeraldConfig},
    herald_onebot::{Endpoint, Target},
    herald_upstream::Credential,
};

/// One delivery channel for an account's events, with endpoint and target
/// fully resolved (binding overrides over gateway defaults).
#[derive(Debug, Clone)]
pub struct Binding {
    pub id: i64,
    pub name: String,
    pub endpoint: Endpoint,
    pub target_kind: String,
    pub target_id: String,

    pub enable_gateway: bool,
    pub notify_post: bool,
    pub notify_video: bool,
    pub notify_live_start: bool,
    pub notify_live_recurring: bool,
    pub notify_live_end: bool,
    pub enable_screenshot: bool,

    /// 0 inherits the engine default; floored at 30 when resolved.
    pub recurring_minutes: u64,

    pub template_post: String,
    pub template_video: String,
    pub template_live_start: String,
    pub template_live_recurring: String,
    pub template_live_end: String,
}

impl Binding {
    /// The configured template override for an event kind (may be empty).
    pub fn template(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Post => &self.template_post,
            EventKind::Video => &self.template_video,
            EventKind::LiveStart => &self.template_live_start,
            EventKind::LiveRecurring => &self.template_live_recurring,
            EventKind::LiveEnd => &self.template_live_end,
        }
    }

    /// Resolved delivery target; `None` when the id is missing or invalid.
    pub fn target(&self) -> Option<Target> {
        Target::resolve(&self.target_kind, &self.target_id)
    }

    /// Whether this binding wants `kind` at all.
    pub fn wants(&self, kind: EventKind) -> bool {
        if !self.enable_gateway {
            return false;
        }
        match kind {
            EventKind::Post => self.notify_post,
            EventKind::Video => self.notify_video,
            EventKind::LiveStart => self.notify_live_start,
            EventKind::LiveRecurring => self.notify_live_recurring,
            EventKind::LiveEnd => self.notify_live_end,
        }
    }
}

/// One account the engine should poll.
#[derive(Debug, Clone)]
pub struct WatchedAccount {
    /// Stable id used as the status-cache key.
    pub id: i64,
    pub uid: String,
    pub name: String,
    /// Seconds between polls; 0 inherits the global interval.
    pub poll_interval_secs: u64,
    pub credential: Credential,
    pub bindings: Vec<Binding>,
}

/// Source of the watch list.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Enabled accounts, in configuration order.
    async fn load_accounts(&self) -> anyhow::Result<Vec<WatchedAccount>>;

    /// Record a display name resolved from the platform so later loads
    /// return it for accounts configured without one.
    async fn update_account_name(&self, uid: &str, name: &str) -> anyhow::Result<()>;
}

/// Watch store backed by the loaded configuration, with a runtime overlay
/// for platform-resolved names.
pub struct ConfigWatchStore {
    config: HeraldConfig,
    resolved_names: Mutex<HashMap<String, String>>,
}

impl ConfigWatchStore {
    pub fn new(config: HeraldConfig) -> Self {
        Self {
            config,
            resolved_names: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_binding(&self, binding: &BindingConfig) -> Binding {
        let defaults = &self.config.gateway;
        let pick = |own: &str, fallback: &str| {
            if own.is_empty() { fallback } else { own }.to_owned()
        };
        Binding {
            id: binding.id.unwrap_or(0),
            name: binding.name.clone(),
            endpoint: Endpoint::new(
                pick(&binding.ws_url, &defaults.ws_url),
                pick(&binding.access_token, &defaults.access_token),
            ),
            target_kind: pick(&binding.target_kind, &defaults.target_kind),
            target_id: pick(&binding.target_id, &defaults.target_id),
            enable_gateway: binding.enable_gateway,
            notify_post: binding.notify_post,
            notify_video: binding.notify_video,
            notify_live_start: binding.notify_live_start,
            notify_live_recurring: binding.notify_live_recurring,
            notify_live_end: binding.notify_live_end,
            enable_screenshot: binding.enable_screenshot,
            recurring_minutes: binding.recurring_minutes,
            template_post: binding.template_post.clone(),
            template_video: binding.template_video.clone(),
            template_live_start: binding.template_live_start.clone(),
            template_live_recurring: binding.template_live_recurring.clone(),
            template_live_end: binding.template_live_end.clone(),
        }
    }
}

#[async_trait]
impl WatchStore for ConfigWatchStore {
    async fn load_accounts(&self) -> anyhow::Result<Vec<WatchedAccount>> {
        let names = self
            .resolved_names
            .lock()
            .map_err(|_| anyhow::anyhow!("name overlay poisoned"))?
            .clone();

        let accounts = self
            .config
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, account)| account.enabled && !account.uid.is_empty())
            .map(|(position, account)| {
                let name = if account.name.is_empty() {
                    names.get(&account.uid).cloned().unwrap_or_default()
                } else {
                    account.name.clone()
                };
                WatchedAccount {
                    id: account.id.unwrap_or(position as i64 + 1),
                    uid: account.uid.clone(),
                    name,
                    poll_interval_secs: account.poll_interval_secs,
                    credential: Credential {
                        cookie: account.credential.cookie.clone(),
                        sessdata: account.credential.sessdata.clone(),
                        bili_jct: account.credential.bili_jct.clone(),
                        buvid3: account.credential.buvid3.clone(),
                        buvid4: account.credential.buvid4.clone(),
                        dedeuserid: account.credential.dedeuserid.clone(),
                        ac_time_value: account.credential.ac_time_value.clone(),
                    },
                    bindings: account.bindings.iter().map(|b| self.resolve_binding(b)).collect(),
                }
            })
            .collect();
        Ok(accounts)
    }

    async fn update_account_name(&self, uid: &str, name: &str) -> anyhow::Result<()> {
        self.resolved_names
            .lock()
            .map_err(|_| anyhow::anyhow!("name overlay poisoned"))?
            .insert(uid.to_owned(), name.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        herald_config::{AccountConfig, GatewayDefaults},
    };

    fn config_with_binding(binding: BindingConfig) -> HeraldConfig {
        let mut cfg = HeraldConfig::default();
        cfg.gateway = GatewayDefaults {
            ws_url: "ws://default:6700/".into(),
            access_token: "default-token".into(),
            target_kind: "group".into(),
            target_id: "1000".into(),
        };
        cfg.accounts.push(AccountConfig {
            uid: "42".into(),
            name: "someone".into(),
            bindings: vec![binding],
            ..AccountConfig::default()
        });
        cfg.normalized()
    }

    #[tokio::test]
    async fn empty_binding_fields_inherit_gateway_defaults() {
        let store = ConfigWatchStore::new(config_with_binding(BindingConfig::default()));
        let accounts = store.load_accounts().await.unwrap();
        let binding = &accounts[0].bindings[0];
        assert_eq!(binding.endpoint.ws_url, "ws://default:6700/");
        assert_eq!(binding.endpoint.access_token, "default-token");
        assert_eq!(binding.target_kind, "group");
        assert_eq!(binding.target_id, "1000");
        assert_eq!(binding.target().unwrap().id, 1000);
    }

    #[tokio::test]
    async fn binding_overrides_beat_defaults() {
        let store = ConfigWatchStore::new(config_with_binding(BindingConfig {
            ws_url: "ws://own:6700/".into(),
            target_kind: "private".into(),
            target_id: "77".into(),
            ..BindingConfig::default()
        }));
        let accounts = store.load_accounts().await.unwrap();
        let binding = &accounts[0].bindings[0];
        assert_eq!(binding.endpoint.ws_url, "ws://own:6700/");
        // Token still inherited.
        assert_eq!(binding.endpoint.access_token, "default-token");
        assert_eq!(binding.target_id, "77");
    }

    #[tokio::test]
    async fn disabled_accounts_are_skipped() {
        let mut cfg = HeraldConfig::default();
        cfg.accounts.push(AccountConfig {
            uid: "1".into(),
            enabled: false,
            ..AccountConfig::default()
        });
        cfg.accounts.push(AccountConfig {
            uid: "2".into(),
            ..AccountConfig::default()
        });
        let store = ConfigWatchStore::new(cfg);
        let accounts = store.load_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].uid, "2");
        // Position-derived id counts the disabled slot.
        assert_eq!(accounts[0].id, 2);
    }

    #[tokio::test]
    async fn resolved_name_overlay_fills_empty_names() {
        let mut cfg = HeraldConfig::default();
        cfg.accounts.push(AccountConfig {
            uid: "9".into(),
            ..AccountConfig::default()
        });
        let store = ConfigWatchStore::new(cfg);
        assert_eq!(store.load_accounts().await.unwrap()[0].name, "");
        store.update_account_name("9", "Resolved").await.unwrap();
        assert_eq!(store.load_accounts().await.unwrap()[0].name, "Resolved");
    }

    #[test]
    fn wants_respects_the_master_switch() {
        let store = ConfigWatchStore::new(HeraldConfig::default());
        let binding = store.resolve_binding(&BindingConfig {
            enable_gateway: false,
            ..BindingConfig::default()
        });
        assert!(!binding.wants(EventKind::Post));
        assert!(!binding.wants(EventKind::LiveStart));

        let binding = store.resolve_binding(&BindingConfig {
            notify_video: false,
            ..BindingConfig::default()
        });
        assert!(binding.wants(EventKind::Post));
        assert!(!binding.wants(EventKind::Video));
    }
}
