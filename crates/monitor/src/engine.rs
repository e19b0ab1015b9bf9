//! The poll loop. One task owns every piece of per-account state; external
//! actors reach it through commands, so forced and scheduled polls can never
//! interleave.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    chrono::{DateTime, SecondsFormat, Utc},
    herald_common::{EventKind, format_duration, segment::plain_text},
    herald_onebot::{CallError, Endpoint, Target},
    herald_templates::{IMAGE_MARKER, Values, render, template_for},
    herald_upstream::{ContentGateway, LiveStatus, PostRecord, ScreenshotRenderer, screenshot},
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    intervals::{effective_poll_interval, effective_recurring_minutes},
    sink::GatewaySink,
    state::{AccountState, LivePhase, LiveState, PostSummary},
    status::{StatusCache, StatusSnapshot},
    store::{Binding, WatchStore, WatchedAccount},
};

/// Timeout for manual fire-and-wait sends.
const MANUAL_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Engine tuning, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval_secs: u64,
    pub recurring_minutes: u64,
    pub catch_up_limit: usize,
}

/// Everything the engine needs injected.
pub struct MonitorDeps {
    pub store: Arc<dyn WatchStore>,
    pub gateway: Arc<dyn ContentGateway>,
    pub renderer: Arc<dyn ScreenshotRenderer>,
    pub sink: Arc<dyn GatewaySink>,
    pub cache: Arc<dyn StatusCache>,
    pub settings: EngineSettings,
}

/// Requests handled between poll cycles.
pub enum Command {
    /// Poll every account now, ignoring schedules.
    PollNow,
    /// Forget runtime state for one account; the next poll re-baselines it
    /// without firing events.
    ResetAccount(String),
    /// Operator-initiated message through one account binding, with the
    /// gateway's reply routed back.
    SendManual {
        uid: String,
        binding_id: i64,
        text: String,
        reply: oneshot::Sender<Result<Value, CallError>>,
    },
}

/// Cheap handle for talking to a running engine.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl MonitorHandle {
    pub fn poll_now(&self) {
        let _ = self.tx.send(Command::PollNow);
    }

    pub fn reset_account(&self, uid: &str) {
        let _ = self.tx.send(Command::ResetAccount(uid.to_owned()));
    }

    pub async fn send_manual(
        &self,
        uid: &str,
        binding_id: i64,
        text: &str,
    ) -> Result<Value, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::SendManual {
            uid: uid.to_owned(),
            binding_id,
            text: text.to_owned(),
            reply: reply_tx,
        };
        if self.tx.send(command).is_err() {
            return Err(CallError::Disconnected);
        }
        reply_rx.await.unwrap_or(Err(CallError::Disconnected))
    }
}

/// One detected event plus everything needed to render it.
struct Event {
    kind: EventKind,
    values: Values,
    cover_url: String,
    /// Recurring events belong to exactly one binding.
    only_binding: Option<i64>,
}

pub struct Monitor {
    deps: MonitorDeps,
    states: HashMap<String, AccountState>,
}

impl Monitor {
    pub fn new(deps: MonitorDeps) -> Self {
        Self {
            deps,
            states: HashMap::new(),
        }
    }

    /// Spawn the engine task, returning its handle.
    pub fn spawn(deps: MonitorDeps, cancel: CancellationToken) -> MonitorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = Self::new(deps);
        tokio::spawn(monitor.run(rx, cancel));
        MonitorHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.deps.settings.poll_interval_secs,
            "monitor started"
        );
        let mut sleep = Duration::from_secs(0);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitor stopping");
                    return;
                },
                command = rx.recv() => match command {
                    Some(command) => sleep = self.handle_command(command).await,
                    None => return,
                },
                _ = tokio::time::sleep(sleep) => {
                    sleep = self.poll_once(false, Utc::now()).await;
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Duration {
        match command {
            Command::PollNow => self.poll_once(true, Utc::now()).await,
            Command::ResetAccount(uid) => {
                info!(uid = %uid, "account state reset");
                self.states.remove(&uid);
                self.sleep_hint(Utc::now())
            },
            // The fire-and-wait runs on its own task so a slow gateway
            // never stalls the poll loop.
            Command::SendManual {
                uid,
                binding_id,
                text,
                reply,
            } => {
                match self.lookup_binding(&uid, binding_id).await {
                    Ok((endpoint, target)) => {
                        let sink = Arc::clone(&self.deps.sink);
                        tokio::spawn(async move {
                            let result = sink
                                .send_text_with_result(
                                    &endpoint,
                                    &target,
                                    &text,
                                    MANUAL_SEND_TIMEOUT,
                                )
                                .await;
                            let _ = reply.send(result);
                        });
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    },
                }
                self.sleep_hint(Utc::now())
            },
        }
    }

    async fn lookup_binding(
        &self,
        uid: &str,
        binding_id: i64,
    ) -> Result<(Endpoint, Target), CallError> {
        let accounts = match self.deps.store.load_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "watch list load failed");
                return Err(CallError::NotConfigured);
            },
        };
        let binding = accounts
            .iter()
            .find(|a| a.uid == uid)
            .and_then(|a| a.bindings.iter().find(|b| b.id == binding_id))
            .ok_or(CallError::NotConfigured)?;
        let target = binding.target().ok_or(CallError::InvalidTarget)?;
        Ok((binding.endpoint.clone(), target))
    }

    /// Poll every due account once. Returns how long the loop should sleep
    /// before the next tick.
    async fn poll_once(&mut self, force: bool, now: DateTime<Utc>) -> Duration {
        let accounts = match self.deps.store.load_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "watch list load failed");
                return Duration::from_secs(self.deps.settings.poll_interval_secs.max(1));
            },
        };

        // Forget accounts that left the watch list.
        self.states
            .retain(|uid, _| accounts.iter().any(|a| &a.uid == uid));

        for account in &accounts {
            // No delivery channel means nothing to do for this account.
            if account.bindings.is_empty() {
                continue;
            }
            let mut state = self.states.remove(&account.uid).unwrap_or_default();
            let due = force
                || state
                    .next_poll_at
                    .map(|at| at <= now)
                    .unwrap_or(true);
            if due {
                self.poll_account(account, &mut state, now).await;
                let interval = effective_poll_interval(
                    account.poll_interval_secs,
                    self.deps.settings.poll_interval_secs,
                );
                state.next_poll_at = now
                    .checked_add_signed(chrono::Duration::from_std(interval).unwrap_or_default());
            }
            self.states.insert(account.uid.clone(), state);
        }

        self.sleep_hint(now)
    }

    /// Time until the earliest due account, clamped to `[1s, global]`.
    fn sleep_hint(&self, now: DateTime<Utc>) -> Duration {
        let global = Duration::from_secs(self.deps.settings.poll_interval_secs.max(1));
        let earliest = self
            .states
            .values()
            .filter_map(|state| state.next_poll_at)
            .min();
        match earliest {
            Some(at) => {
                let until = (at - now).to_std().unwrap_or(Duration::ZERO);
                until.clamp(Duration::from_secs(1), global)
            },
            None => global,
        }
    }

    async fn poll_account(
        &self,
        account: &WatchedAccount,
        state: &mut AccountState,
        now: DateTime<Utc>,
    ) {
        let name = self.resolve_name(account, state).await;
        let mut events = Vec::new();

        if let Some(posts) = self
            .deps
            .gateway
            .fetch_posts(&account.uid, &account.credential)
            .await
        {
            self.diff_posts(account, state, &name, &posts, &mut events);
        }

        if let Some(live) = self
            .deps
            .gateway
            .fetch_live(&account.uid, &account.credential)
            .await
        {
            self.advance_live(account, state, &name, &live, now, &mut events);
        }

        for event in events {
            self.dispatch(account, state, event).await;
        }

        self.publish_status(account, state, &name, now).await;
    }

    /// Display name: configuration, then the platform profile, then a
    /// uid-derived placeholder. Profile fetches also refresh the avatar.
    async fn resolve_name(&self, account: &WatchedAccount, state: &mut AccountState) -> String {
        if !account.name.is_empty() && !state.avatar_url.is_empty() {
            return account.name.clone();
        }
        if let Some(profile) = self
            .deps
            .gateway
            .fetch_profile(&account.uid, &account.credential)
            .await
        {
            state.avatar_url = profile.avatar_url;
            if account.name.is_empty() && !profile.name.is_empty() {
                if let Err(e) = self
                    .deps
                    .store
                    .update_account_name(&account.uid, &profile.name)
                    .await
                {
                    warn!(uid = %account.uid, error = %e, "name update failed");
                }
                return profile.name;
            }
        }
        if account.name.is_empty() {
            format!("UID {}", account.uid)
        } else {
            account.name.clone()
        }
    }

    /// Diff the fetched page against the last seen post id.
    ///
    /// Cold start baselines silently. Otherwise everything newer than the
    /// remembered id is new; the dispatch count is capped and the survivors
    /// go out oldest first.
    fn diff_posts(
        &self,
        account: &WatchedAccount,
        state: &mut AccountState,
        name: &str,
        posts: &[PostRecord],
        events: &mut Vec<Event>,
    ) {
        let Some(newest) = posts.first() else {
            return;
        };

        let Some(last_id) = state.last_post_id.clone() else {
            debug!(uid = %account.uid, baseline = %newest.id, "post baseline established");
            state.last_post_id = Some(newest.id.clone());
            state.last_post = Some(PostSummary::from(newest));
            return;
        };

        let mut fresh: Vec<&PostRecord> = Vec::new();
        for post in posts {
            if post.id == last_id {
                break;
            }
            fresh.push(post);
        }
        if fresh.is_empty() {
            return;
        }

        let skipped = fresh.len().saturating_sub(self.deps.settings.catch_up_limit);
        if skipped > 0 {
            warn!(uid = %account.uid, skipped, "catch-up cap exceeded, dropping oldest");
        }
        fresh.truncate(self.deps.settings.catch_up_limit);
        fresh.reverse();

        for post in fresh {
            events.push(self.post_event(name, post));
        }

        state.last_post_id = Some(newest.id.clone());
        state.last_post = Some(PostSummary::from(newest));
    }

    fn post_event(&self, name: &str, post: &PostRecord) -> Event {
        let kind = if post.is_video {
            EventKind::Video
        } else {
            EventKind::Post
        };
        let url = if post.is_video && !post.video_url.is_empty() {
            post.video_url.clone()
        } else {
            post.url.clone()
        };
        let mut values = Values::new();
        values.insert("name", name.to_owned());
        values.insert("text", post.text.clone());
        values.insert("title", post.video_title.clone());
        values.insert("url", url);
        values.insert(
            "time",
            DateTime::from_timestamp(post.published_at, 0)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
        );
        Event {
            kind,
            values,
            cover_url: post.cover_url.clone(),
            only_binding: None,
        }
    }

    /// Advance the live-phase state machine and emit transition events.
    fn advance_live(
        &self,
        account: &WatchedAccount,
        state: &mut AccountState,
        name: &str,
        live: &LiveStatus,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let phase = std::mem::take(&mut state.live_phase);
        state.live_phase = match (phase, live.is_live) {
            (LivePhase::Unobserved, false) => {
                debug!(uid = %account.uid, "live baseline: offline");
                LivePhase::Offline
            },
            // Already broadcasting at startup: baseline without an event so
            // a restart never re-announces an old stream.
            (LivePhase::Unobserved, true) => {
                debug!(uid = %account.uid, "live baseline: already broadcasting");
                LivePhase::Live(new_live_state(account, live, now))
            },
            (LivePhase::Offline, true) => {
                info!(uid = %account.uid, title = %live.title, "live started");
                let fresh = new_live_state(account, live, now);
                events.push(self.live_event(EventKind::LiveStart, name, &fresh, live, now, None));
                LivePhase::Live(fresh)
            },
            (LivePhase::Live(mut current), true) => {
                current.title = live.title.clone();
                if !live.room_url.is_empty() {
                    current.url = live.room_url.clone();
                }
                if !live.cover_url.is_empty() {
                    current.cover_url = live.cover_url.clone();
                }
                current.current_viewers = live.viewer_count;
                current.peak_viewers = current.peak_viewers.max(live.viewer_count);

                // Bindings added mid-broadcast start their timer now instead
                // of firing immediately.
                for binding in &account.bindings {
                    current.last_recurring.entry(binding.id).or_insert(now);
                }

                for binding in &account.bindings {
                    let cadence = effective_recurring_minutes(
                        binding.recurring_minutes,
                        self.deps.settings.recurring_minutes,
                    );
                    let due = current
                        .last_recurring
                        .get(&binding.id)
                        .map(|last| now - *last >= chrono::Duration::minutes(cadence as i64))
                        .unwrap_or(false);
                    if due {
                        events.push(self.live_event(
                            EventKind::LiveRecurring,
                            name,
                            &current,
                            live,
                            now,
                            Some(binding.id),
                        ));
                        current.last_recurring.insert(binding.id, now);
                    }
                }
                LivePhase::Live(current)
            },
            (LivePhase::Live(ended), false) => {
                info!(uid = %account.uid, "live ended");
                events.push(self.live_event(EventKind::LiveEnd, name, &ended, live, now, None));
                LivePhase::Offline
            },
            (LivePhase::Offline, false) => LivePhase::Offline,
        };
    }

    fn live_event(
        &self,
        kind: EventKind,
        name: &str,
        live_state: &LiveState,
        live: &LiveStatus,
        now: DateTime<Utc>,
        only_binding: Option<i64>,
    ) -> Event {
        let duration = live_state
            .started_at
            .map(|started| format_duration((now - started).num_seconds()))
            .unwrap_or_default();
        let mut values = Values::new();
        values.insert("name", name.to_owned());
        values.insert("title", live_state.title.clone());
        values.insert("url", live_state.url.clone());
        values.insert("duration", duration);
        values.insert("online", live.viewer_count.to_string());
        values.insert("max_online", live_state.peak_viewers.to_string());
        Event {
            kind,
            values,
            cover_url: live_state.cover_url.clone(),
            only_binding,
        }
    }

    /// The kind a binding should render `event` as: the event's own kind
    /// when the binding subscribes to it, with video events degrading to the
    /// post channel for bindings that mute videos but keep posts.
    fn effective_kind(binding: &Binding, event: &Event) -> Option<EventKind> {
        if binding.wants(event.kind) {
            return Some(event.kind);
        }
        if event.kind == EventKind::Video && binding.wants(EventKind::Post) {
            return Some(EventKind::Post);
        }
        None
    }

    /// Render and deliver one event to every binding that wants it.
    async fn dispatch(&self, account: &WatchedAccount, state: &AccountState, event: Event) {
        let recipients: Vec<(&Binding, EventKind)> = account
            .bindings
            .iter()
            .filter(|b| event.only_binding.is_none_or(|id| id == b.id))
            .filter_map(|b| Self::effective_kind(b, &event).map(|kind| (b, kind)))
            .collect();
        if recipients.is_empty() {
            return;
        }

        let wants_image = recipients.iter().any(|(b, kind)| {
            b.enable_screenshot && template_for(b.template(*kind), *kind).contains(IMAGE_MARKER)
        });
        let image = if wants_image {
            self.event_image(state, &event).await
        } else {
            None
        };

        for (binding, kind) in recipients {
            let Some(target) = binding.target() else {
                warn!(
                    uid = %account.uid,
                    binding = %binding.name,
                    "binding target does not resolve, skipping"
                );
                continue;
            };
            let template = template_for(binding.template(kind), kind);
            let binding_image = if binding.enable_screenshot {
                image.as_deref()
            } else {
                None
            };
            let (segments, rich) = render(template, &event.values, binding_image);
            if segments.is_empty() {
                continue;
            }
            info!(
                uid = %account.uid,
                binding = %binding.name,
                event = %kind,
                rich,
                "notify"
            );
            if rich {
                self.deps
                    .sink
                    .send_segments(&binding.endpoint, &target, &segments)
                    .await;
            } else {
                self.deps
                    .sink
                    .send_text(&binding.endpoint, &target, &plain_text(&segments))
                    .await;
            }
        }
    }

    /// Image for the `{SHOTPICTURE}` slot: rendered notification card first,
    /// then the raw cover image, then nothing.
    async fn event_image(&self, state: &AccountState, event: &Event) -> Option<Vec<u8>> {
        let mut card_values = HashMap::new();
        card_values.insert("avatar", state.avatar_url.clone());
        for key in ["name", "text", "title", "time"] {
            if let Some(value) = event.values.get(key).filter(|v| !v.is_empty()) {
                let slot = if key == "title" { "text" } else { key };
                card_values.entry(slot).or_insert_with(|| value.clone());
            }
        }
        card_values.insert("cover", event.cover_url.clone());

        let html = screenshot::fill_card(&card_values);
        if let Some(bytes) = self.deps.renderer.render(&html).await {
            return Some(bytes);
        }
        if !event.cover_url.is_empty() {
            return self.deps.gateway.download_image(&event.cover_url).await;
        }
        None
    }

    async fn publish_status(
        &self,
        account: &WatchedAccount,
        state: &AccountState,
        name: &str,
        now: DateTime<Utc>,
    ) {
        let stamp = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        let interval = effective_poll_interval(
            account.poll_interval_secs,
            self.deps.settings.poll_interval_secs,
        );
        let next_poll = now
            .checked_add_signed(chrono::Duration::from_std(interval).unwrap_or_default())
            .map(stamp)
            .unwrap_or_default();

        let mut snapshot = StatusSnapshot {
            id: account.id,
            uid: account.uid.clone(),
            name: name.to_owned(),
            checked_at: stamp(now),
            poll_interval: interval.as_secs(),
            next_poll_at: next_poll,
            ..StatusSnapshot::default()
        };

        if let Some(live) = state.live() {
            snapshot.live = true;
            snapshot.live_title = live.title.clone();
            snapshot.live_online = live.current_viewers;
            snapshot.live_url = live.url.clone();
            snapshot.live_duration = live
                .started_at
                .map(|started| format_duration((now - started).num_seconds()))
                .unwrap_or_default();
        }

        if let Some(post) = &state.last_post {
            snapshot.last_dynamic_id = post.id.clone();
            snapshot.last_dynamic_text = post.text.clone();
            snapshot.last_dynamic_url = post.url.clone();
            snapshot.last_dynamic_title = post.video_title.clone();
            snapshot.last_dynamic_type = if post.is_video { "video" } else { "dynamic" }.into();
            snapshot.last_dynamic_video_url = post.video_url.clone();
            snapshot.last_dynamic_cover = post.cover_url.clone();
            snapshot.last_dynamic_is_video = post.is_video;
            snapshot.last_dynamic_time = DateTime::from_timestamp(post.published_at, 0)
                .map(stamp)
                .unwrap_or_default();
        }

        if let Err(e) = self.deps.cache.put(&snapshot).await {
            warn!(uid = %account.uid, error = %e, "status write failed");
        }
    }
}

fn new_live_state(account: &WatchedAccount, live: &LiveStatus, now: DateTime<Utc>) -> LiveState {
    let mut fresh = LiveState {
        started_at: live
            .started_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or(Some(now)),
        title: live.title.clone(),
        url: live.room_url.clone(),
        cover_url: live.cover_url.clone(),
        current_viewers: live.viewer_count,
        peak_viewers: live.viewer_count,
        last_recurring: HashMap::new(),
    };
    for binding in &account.bindings {
        fresh.last_recurring.insert(binding.id, now);
    }
    fresh
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            status::MemoryStatusCache,
            store::{Binding, WatchStore, WatchedAccount},
        },
        async_trait::async_trait,
        chrono::TimeZone,
        herald_common::Segment,
        herald_onebot::{Endpoint, Target},
        herald_upstream::{Credential, NoopRenderer, Profile},
        std::sync::Mutex,
    };

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12 + minute / 60, minute % 60, 0).unwrap()
    }

    fn post(id: &str, text: &str) -> PostRecord {
        PostRecord {
            id: id.into(),
            text: text.into(),
            url: format!("https://t.example.com/{id}"),
            published_at: 1700000000,
            ..PostRecord::default()
        }
    }

    fn video(id: &str, title: &str) -> PostRecord {
        PostRecord {
            is_video: true,
            video_title: title.into(),
            video_url: format!("https://v.example.com/{id}"),
            ..post(id, "")
        }
    }

    fn live(viewers: i64) -> LiveStatus {
        LiveStatus {
            is_live: true,
            title: "on air".into(),
            viewer_count: viewers,
            room_url: "https://live.example.com/1".into(),
            ..LiveStatus::default()
        }
    }

    fn offline() -> LiveStatus {
        LiveStatus::default()
    }

    struct FakeGateway {
        posts: Mutex<Vec<PostRecord>>,
        live: Mutex<Option<LiveStatus>>,
        image: Mutex<Option<Vec<u8>>>,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                posts: Mutex::new(Vec::new()),
                live: Mutex::new(Some(offline())),
                image: Mutex::new(None),
            }
        }

        fn set_posts(&self, posts: Vec<PostRecord>) {
            *self.posts.lock().unwrap() = posts;
        }

        fn set_live(&self, live: Option<LiveStatus>) {
            *self.live.lock().unwrap() = live;
        }
    }

    #[async_trait]
    impl ContentGateway for FakeGateway {
        async fn fetch_profile(&self, _uid: &str, _credential: &Credential) -> Option<Profile> {
            Some(Profile {
                name: "Resolved Name".into(),
                avatar_url: "https://a/avatar.png".into(),
            })
        }

        async fn fetch_posts(&self, _uid: &str, _credential: &Credential) -> Option<Vec<PostRecord>> {
            Some(self.posts.lock().unwrap().clone())
        }

        async fn fetch_live(&self, _uid: &str, _credential: &Credential) -> Option<LiveStatus> {
            self.live.lock().unwrap().clone()
        }

        async fn download_image(&self, _url: &str) -> Option<Vec<u8>> {
            self.image.lock().unwrap().clone()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text { target: i64, text: String },
        Segments { target: i64, plain: String, rich: bool },
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingSink {
        fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| match s {
                    Sent::Text { text, .. } => text.clone(),
                    Sent::Segments { plain, .. } => plain.clone(),
                })
                .collect()
        }
    }

    #[async_trait]
    impl GatewaySink for RecordingSink {
        async fn send_text(&self, _endpoint: &Endpoint, target: &Target, text: &str) {
            self.sent.lock().unwrap().push(Sent::Text {
                target: target.id,
                text: text.to_owned(),
            });
        }

        async fn send_segments(&self, _endpoint: &Endpoint, target: &Target, segments: &[Segment]) {
            self.sent.lock().unwrap().push(Sent::Segments {
                target: target.id,
                plain: plain_text(segments),
                rich: segments.iter().any(|s| !s.is_text()),
            });
        }

        async fn send_text_with_result(
            &self,
            _endpoint: &Endpoint,
            target: &Target,
            text: &str,
            _timeout: Duration,
        ) -> Result<Value, CallError> {
            self.sent.lock().unwrap().push(Sent::Text {
                target: target.id,
                text: text.to_owned(),
            });
            Ok(serde_json::json!({"status": "ok", "retcode": 0}))
        }
    }

    struct FakeStore {
        accounts: Vec<WatchedAccount>,
        renames: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WatchStore for FakeStore {
        async fn load_accounts(&self) -> anyhow::Result<Vec<WatchedAccount>> {
            Ok(self.accounts.clone())
        }

        async fn update_account_name(&self, uid: &str, name: &str) -> anyhow::Result<()> {
            self.renames
                .lock()
                .unwrap()
                .push((uid.to_owned(), name.to_owned()));
            Ok(())
        }
    }

    fn binding(id: i64) -> Binding {
        Binding {
            id,
            name: format!("b{id}"),
            endpoint: Endpoint::new("ws://gw:6700/", ""),
            target_kind: "group".into(),
            target_id: "1000".into(),
            enable_gateway: true,
            notify_post: true,
            notify_video: true,
            notify_live_start: true,
            notify_live_recurring: true,
            notify_live_end: true,
            enable_screenshot: false,
            recurring_minutes: 0,
            template_post: String::new(),
            template_video: String::new(),
            template_live_start: String::new(),
            template_live_recurring: String::new(),
            template_live_end: String::new(),
        }
    }

    fn account(bindings: Vec<Binding>) -> WatchedAccount {
        WatchedAccount {
            id: 1,
            uid: "42".into(),
            name: "Streamer".into(),
            poll_interval_secs: 0,
            credential: Credential::default(),
            bindings,
        }
    }

    struct Rig {
        monitor: Monitor,
        gateway: Arc<FakeGateway>,
        sink: Arc<RecordingSink>,
        cache: Arc<MemoryStatusCache>,
    }

    fn rig(accounts: Vec<WatchedAccount>) -> Rig {
        let gateway = Arc::new(FakeGateway::new());
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(MemoryStatusCache::new());
        let store = Arc::new(FakeStore {
            accounts,
            renames: Mutex::new(Vec::new()),
        });
        let monitor = Monitor::new(MonitorDeps {
            store,
            gateway: Arc::clone(&gateway) as Arc<dyn ContentGateway>,
            renderer: Arc::new(NoopRenderer),
            sink: Arc::clone(&sink) as Arc<dyn GatewaySink>,
            cache: Arc::clone(&cache) as Arc<dyn StatusCache>,
            settings: EngineSettings {
                poll_interval_secs: 30,
                recurring_minutes: 60,
                catch_up_limit: 3,
            },
        });
        Rig {
            monitor,
            gateway,
            sink,
            cache,
        }
    }

    #[tokio::test]
    async fn cold_start_baselines_without_notifying() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("2", "old"), post("1", "older")]);

        rig.monitor.poll_once(true, at(0)).await;
        assert!(rig.sink.texts().is_empty());

        rig.gateway
            .set_posts(vec![post("3", "brand new"), post("2", "old"), post("1", "older")]);
        rig.monitor.poll_once(true, at(1)).await;

        let texts = rig.sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("brand new"), "got {texts:?}");
    }

    #[tokio::test]
    async fn catch_up_is_capped_and_dispatched_oldest_first() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("1", "p1")]);
        rig.monitor.poll_once(true, at(0)).await;

        rig.gateway.set_posts(vec![
            post("5", "p5"),
            post("4", "p4"),
            post("3", "p3"),
            post("2", "p2"),
            post("1", "p1"),
        ]);
        rig.monitor.poll_once(true, at(1)).await;

        let texts = rig.sink.texts();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("p3"));
        assert!(texts[1].contains("p4"));
        assert!(texts[2].contains("p5"));
    }

    #[tokio::test]
    async fn account_without_bindings_is_not_polled() {
        let mut rig = rig(vec![account(vec![])]);
        rig.gateway.set_posts(vec![post("1", "p1")]);
        rig.gateway.set_live(Some(live(10)));

        rig.monitor.poll_once(true, at(0)).await;
        assert!(rig.sink.texts().is_empty());
        // Nothing was fetched or published for the account.
        assert!(rig.cache.get(1).await.unwrap().is_none());
        assert!(rig.monitor.states.is_empty());
    }

    #[tokio::test]
    async fn repoll_without_changes_is_silent() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("7", "x")]);
        rig.monitor.poll_once(true, at(0)).await;
        rig.monitor.poll_once(true, at(1)).await;
        rig.monitor.poll_once(true, at(2)).await;
        assert!(rig.sink.texts().is_empty());
    }

    #[tokio::test]
    async fn live_cycle_fires_one_start_and_one_end_with_peak() {
        let mut rig = rig(vec![account(vec![binding(1)])]);

        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(0)).await;
        rig.monitor.poll_once(true, at(1)).await;
        assert!(rig.sink.texts().is_empty());

        rig.gateway.set_live(Some(live(10)));
        rig.monitor.poll_once(true, at(2)).await;
        rig.gateway.set_live(Some(live(25)));
        rig.monitor.poll_once(true, at(3)).await;
        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(4)).await;

        let texts = rig.sink.texts();
        assert_eq!(texts.len(), 2, "got {texts:?}");
        assert!(texts[0].contains("now live"));
        assert!(texts[1].contains("finished streaming"));
        assert!(texts[1].contains("peak 25"));
    }

    #[tokio::test]
    async fn broadcast_in_progress_at_startup_is_not_announced() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_live(Some(live(50)));
        rig.monitor.poll_once(true, at(0)).await;
        assert!(rig.sink.texts().is_empty());

        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(5)).await;
        // The end of a pre-existing broadcast still counts.
        assert_eq!(rig.sink.texts().len(), 1);
    }

    #[tokio::test]
    async fn recurring_updates_follow_the_cadence() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        // Default cadence 60 floored stays 60; binding cadence 0 inherits.
        // Override the engine default down to the floor.
        rig.monitor.deps.settings.recurring_minutes = 30;

        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(0)).await;
        rig.gateway.set_live(Some(live(5)));
        rig.monitor.poll_once(true, at(0)).await;
        assert_eq!(rig.sink.texts().len(), 1); // start only

        rig.monitor.poll_once(true, at(20)).await;
        assert_eq!(rig.sink.texts().len(), 1); // not due yet

        rig.monitor.poll_once(true, at(31)).await;
        assert_eq!(rig.sink.texts().len(), 2); // first recurring

        rig.monitor.poll_once(true, at(45)).await;
        assert_eq!(rig.sink.texts().len(), 2);

        rig.monitor.poll_once(true, at(61)).await;
        let texts = rig.sink.texts();
        assert_eq!(texts.len(), 3, "got {texts:?}");
        assert!(texts[2].contains("still live"));
    }

    #[tokio::test]
    async fn recurring_timers_are_isolated_per_binding() {
        let fast = binding(1); // inherits 30 via the override below
        let slow = Binding {
            recurring_minutes: 90,
            ..binding(2)
        };
        let mut rig = rig(vec![account(vec![fast, slow])]);
        rig.monitor.deps.settings.recurring_minutes = 30;

        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(0)).await;
        rig.gateway.set_live(Some(live(5)));
        rig.monitor.poll_once(true, at(0)).await;
        assert_eq!(rig.sink.texts().len(), 2); // both bindings get the start

        rig.monitor.poll_once(true, at(40)).await;
        assert_eq!(rig.sink.texts().len(), 3); // only the 30-minute binding

        rig.monitor.poll_once(true, at(95)).await;
        // Fast binding fires again (last at 40) and slow fires its first.
        assert_eq!(rig.sink.texts().len(), 5);
    }

    #[tokio::test]
    async fn reset_re_baselines_silently() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("1", "p1")]);
        rig.monitor.poll_once(true, at(0)).await;

        rig.gateway.set_posts(vec![post("2", "p2"), post("1", "p1")]);
        rig.monitor.states.remove("42");
        rig.monitor.poll_once(true, at(1)).await;
        assert!(rig.sink.texts().is_empty());

        rig.gateway
            .set_posts(vec![post("3", "p3"), post("2", "p2"), post("1", "p1")]);
        rig.monitor.poll_once(true, at(2)).await;
        assert_eq!(rig.sink.texts().len(), 1);
    }

    #[tokio::test]
    async fn video_posts_use_the_video_template_with_post_fallback() {
        let mut base_rig = rig(vec![account(vec![binding(1)])]);
        base_rig.gateway.set_posts(vec![post("1", "seed")]);
        base_rig.monitor.poll_once(true, at(0)).await;

        base_rig
            .gateway
            .set_posts(vec![video("2", "My Upload"), post("1", "seed")]);
        base_rig.monitor.poll_once(true, at(1)).await;
        let texts = base_rig.sink.texts();
        assert!(texts[0].contains("uploaded a new video"));
        assert!(texts[0].contains("My Upload"));

        // Same video, but a binding that mutes videos while keeping posts
        // falls back to the post template.
        let muted = Binding {
            notify_video: false,
            ..binding(1)
        };
        let mut muted_rig = rig(vec![account(vec![muted])]);
        muted_rig.gateway.set_posts(vec![post("1", "seed")]);
        muted_rig.monitor.poll_once(true, at(0)).await;
        muted_rig
            .gateway
            .set_posts(vec![video("2", "My Upload"), post("1", "seed")]);
        muted_rig.monitor.poll_once(true, at(1)).await;
        let texts = muted_rig.sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("posted a new update"), "got {texts:?}");

        // Muting both channels silences the video entirely.
        let silent = Binding {
            notify_video: false,
            notify_post: false,
            ..binding(1)
        };
        let mut silent_rig = rig(vec![account(vec![silent])]);
        silent_rig.gateway.set_posts(vec![post("1", "seed")]);
        silent_rig.monitor.poll_once(true, at(0)).await;
        silent_rig
            .gateway
            .set_posts(vec![video("2", "My Upload"), post("1", "seed")]);
        silent_rig.monitor.poll_once(true, at(1)).await;
        assert!(silent_rig.sink.texts().is_empty());
    }

    #[tokio::test]
    async fn cover_image_makes_the_message_rich() {
        let with_shot = Binding {
            enable_screenshot: true,
            ..binding(1)
        };
        let mut rig = rig(vec![account(vec![with_shot])]);
        *rig.gateway.image.lock().unwrap() = Some(b"img".to_vec());

        rig.gateway.set_posts(vec![post("1", "seed")]);
        rig.monitor.poll_once(true, at(0)).await;
        rig.gateway.set_posts(vec![
            PostRecord {
                cover_url: "https://a/c.png".into(),
                ..post("2", "with cover")
            },
            post("1", "seed"),
        ]);
        rig.monitor.poll_once(true, at(1)).await;

        let sent = rig.sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Segments { rich, plain, .. } => {
                assert!(rich);
                assert!(plain.contains("with cover"));
            },
            other => panic!("expected rich message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_snapshot_reflects_the_latest_poll() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("9", "latest words")]);
        rig.gateway.set_live(Some(live(33)));
        rig.monitor.poll_once(true, at(0)).await;

        let snapshot = rig.cache.get(1).await.unwrap().unwrap();
        assert_eq!(snapshot.uid, "42");
        assert_eq!(snapshot.name, "Streamer");
        assert!(snapshot.live);
        assert_eq!(snapshot.live_title, "on air");
        assert_eq!(snapshot.live_online, 33);
        assert_eq!(snapshot.last_dynamic_id, "9");
        assert_eq!(snapshot.last_dynamic_text, "latest words");
        assert_eq!(snapshot.last_dynamic_type, "dynamic");
        assert!(snapshot.checked_at.ends_with('Z'));
        assert_eq!(snapshot.poll_interval, 30);
    }

    #[tokio::test]
    async fn empty_account_name_is_resolved_from_the_profile() {
        let mut unnamed = account(vec![binding(1)]);
        unnamed.name = String::new();
        let mut rig = rig(vec![unnamed]);
        rig.gateway.set_posts(vec![post("1", "seed")]);
        rig.monitor.poll_once(true, at(0)).await;

        rig.gateway.set_posts(vec![post("2", "hello"), post("1", "seed")]);
        rig.monitor.poll_once(true, at(1)).await;
        let texts = rig.sink.texts();
        assert!(texts[0].contains("Resolved Name"), "got {texts:?}");
    }

    #[tokio::test]
    async fn scheduled_polls_respect_per_account_cadence() {
        let mut slow = account(vec![binding(1)]);
        slow.poll_interval_secs = 120;
        let mut rig = rig(vec![slow]);
        rig.gateway.set_posts(vec![post("1", "seed")]);

        rig.monitor.poll_once(false, at(0)).await;
        rig.gateway.set_posts(vec![post("2", "new"), post("1", "seed")]);

        // One minute later the account is not due yet.
        rig.monitor.poll_once(false, at(1)).await;
        assert!(rig.sink.texts().is_empty());

        rig.monitor.poll_once(false, at(3)).await;
        assert_eq!(rig.sink.texts().len(), 1);
    }

    #[tokio::test]
    async fn manual_send_goes_through_the_named_binding() {
        let rig = rig(vec![account(vec![binding(1)])]);
        let sink = Arc::clone(&rig.sink);
        let cancel = CancellationToken::new();
        let handle = Monitor::spawn(rig.monitor.deps, cancel.clone());

        let reply = handle.send_manual("42", 1, "operator message").await.unwrap();
        assert_eq!(reply["status"], "ok");
        assert_eq!(sink.texts(), vec!["operator message".to_owned()]);

        let missing = handle.send_manual("42", 99, "x").await;
        assert_eq!(missing, Err(CallError::NotConfigured));
        cancel.cancel();
    }

    #[tokio::test]
    async fn upstream_outage_preserves_state() {
        let mut rig = rig(vec![account(vec![binding(1)])]);
        rig.gateway.set_posts(vec![post("1", "seed")]);
        rig.gateway.set_live(Some(live(5)));
        rig.monitor.poll_once(true, at(0)).await;

        // Live endpoint goes dark; the phase must not flap to offline.
        rig.gateway.set_live(None);
        rig.monitor.poll_once(true, at(1)).await;
        assert!(rig.sink.texts().is_empty());

        rig.gateway.set_live(Some(offline()));
        rig.monitor.poll_once(true, at(2)).await;
        assert_eq!(rig.sink.texts().len(), 1); // the end event
    }
}
