//! Connection lifecycle and request/response correlation for one gateway
//! endpoint.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    futures::{SinkExt, StreamExt},
    herald_common::Segment,
    rand::Rng,
    serde_json::Value,
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::protocol::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
    uuid::Uuid,
};

use crate::wire::{Target, message_frame};

/// Reconnect backoff base delay.
const BACKOFF_BASE_SECS: f64 = 1.0;
/// Multiplier applied after each failed attempt.
const BACKOFF_FACTOR: f64 = 1.7;
/// Upper bound on the reconnect delay.
const BACKOFF_CAP_SECS: f64 = 60.0;
/// A connection that lives at least this long resets the backoff schedule.
const STABLE_WINDOW: Duration = Duration::from_secs(20);

/// Failure modes of a fire-and-wait call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("gateway endpoint not configured")]
    NotConfigured,
    #[error("target does not resolve to a positive integer id")]
    InvalidTarget,
    #[error("timed out waiting for the gateway reply")]
    Timeout,
    #[error("gateway disconnected before replying")]
    Disconnected,
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, CallError>>>>>;

/// Client for one OneBot endpoint. Fire-and-forget sends enqueue frames;
/// the connection task delivers them whenever a session is up. Frames queued
/// while disconnected are kept until a connection completes; frames that hit
/// a dying socket are best-effort lost.
pub struct OneBotClient {
    ws_url: String,
    tx: mpsc::UnboundedSender<Value>,
    pending: Pending,
    cancel: CancellationToken,
}

impl OneBotClient {
    /// Create the client and spawn its connection task. An empty `ws_url`
    /// yields an inert client whose sends are silent no-ops.
    pub fn spawn(ws_url: &str, access_token: &str) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let client = Arc::new(Self {
            ws_url: ws_url.to_owned(),
            tx,
            pending: Arc::clone(&pending),
            cancel: cancel.clone(),
        });

        if !ws_url.is_empty() {
            let url = build_ws_url(ws_url, access_token);
            tokio::spawn(run_connection(url, rx, pending, cancel));
        }

        client
    }

    /// Terminal stop; the connection task finishes its current attempt and
    /// exits without retrying.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Queue a plain-text message.
    pub fn send_text(&self, target: &Target, text: &str) {
        self.enqueue_frame(target, Value::String(text.to_owned()), None);
    }

    /// Queue a segment-list message.
    pub fn send_segments(&self, target: &Target, segments: &[Segment]) {
        match serde_json::to_value(segments) {
            Ok(message) => self.enqueue_frame(target, message, None),
            Err(e) => warn!(error = %e, "failed to serialize segments"),
        }
    }

    /// Queue an image (with optional caption) as a segment message.
    pub fn send_image(&self, target: &Target, bytes: &[u8], caption: Option<&str>) {
        let mut segments = Vec::with_capacity(2);
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            segments.push(Segment::text(caption));
        }
        segments.push(Segment::image_bytes(bytes));
        self.send_segments(target, &segments);
    }

    /// Send a text message and wait for the gateway's correlated reply.
    ///
    /// The waiter is registered before the frame is queued and removed
    /// exactly once: by the reply, by this timeout, or by a bulk disconnect
    /// failure.
    pub async fn send_text_with_result(
        &self,
        target: &Target,
        text: &str,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        if self.ws_url.is_empty() {
            return Err(CallError::NotConfigured);
        }

        let echo = Uuid::new_v4().simple().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(echo.clone(), reply_tx);

        let frame = message_frame(target, Value::String(text.to_owned()), Some(echo.clone()));
        info!(action = frame.action, target = target.id, "gateway call");
        self.enqueue(frame);

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            // Waiter dropped without a verdict; treat as a disconnect.
            Ok(Err(_)) => Err(CallError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&echo);
                Err(CallError::Timeout)
            },
        }
    }

    fn enqueue_frame(&self, target: &Target, message: Value, echo: Option<String>) {
        self.enqueue(message_frame(target, message, echo));
    }

    fn enqueue(&self, frame: crate::wire::ApiFrame) {
        if self.ws_url.is_empty() {
            return;
        }
        match serde_json::to_value(&frame) {
            // The receiver only drops after stop(); losing frames then is fine.
            Ok(value) => {
                let _ = self.tx.send(value);
            },
            Err(e) => warn!(error = %e, "failed to serialize frame"),
        }
    }
}

/// Append the access token as an `access_token` query parameter unless the
/// URL already carries one.
fn build_ws_url(ws_url: &str, access_token: &str) -> String {
    if access_token.is_empty() {
        return ws_url.to_owned();
    }
    let Ok(mut url) = Url::parse(ws_url) else {
        return ws_url.to_owned();
    };
    if url.query_pairs().any(|(k, _)| k == "access_token") {
        return ws_url.to_owned();
    }
    url.query_pairs_mut()
        .append_pair("access_token", access_token);
    url.to_string()
}

/// Reconnect schedule: exponential growth with jitter, reset after a stable
/// connection.
struct Backoff {
    delay: f64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_BASE_SECS,
        }
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_BASE_SECS;
    }

    /// Current delay with `jitter` in `[0, 1)` applied, advancing the
    /// schedule geometrically up to the cap.
    fn next(&mut self, jitter: f64) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * BACKOFF_FACTOR).min(BACKOFF_CAP_SECS);
        let jittered = delay + jitter * f64::max(0.5, delay * 0.1);
        Duration::from_secs_f64(jittered.min(BACKOFF_CAP_SECS))
    }
}

async fn run_connection(
    url: String,
    mut rx: mpsc::UnboundedReceiver<Value>,
    pending: Pending,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new();

    while !cancel.is_cancelled() {
        info!(url = %url, "gateway connecting");
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(url = %url, "gateway connected");
                let connected_at = Instant::now();
                let (mut sink, mut source) = stream.split();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = sink.close().await;
                            return;
                        },
                        outbound = rx.recv() => match outbound {
                            Some(frame) => {
                                let action = frame
                                    .get("action")
                                    .and_then(Value::as_str)
                                    .unwrap_or("")
                                    .to_owned();
                                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                                    warn!(error = %e, "gateway send failed");
                                    break;
                                }
                                debug!(action = %action, "gateway frame sent");
                            },
                            // All senders dropped; nothing left to do.
                            None => return,
                        },
                        inbound = source.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                handle_inbound(&pending, text.as_str()).await;
                            },
                            Some(Ok(Message::Close(frame))) => {
                                warn!(frame = ?frame, "gateway closed");
                                break;
                            },
                            Some(Ok(_)) => {},
                            Some(Err(e)) => {
                                warn!(error = %e, "gateway receive failed");
                                break;
                            },
                            None => {
                                warn!("gateway stream ended");
                                break;
                            },
                        },
                    }
                }

                fail_pending(&pending, CallError::Disconnected).await;
                if connected_at.elapsed() >= STABLE_WINDOW {
                    backoff.reset();
                }
            },
            Err(e) => {
                warn!(url = %url, error = %e, "gateway connect failed");
                fail_pending(&pending, CallError::Disconnected).await;
            },
        }

        if cancel.is_cancelled() {
            return;
        }
        let delay = backoff.next(rand::rng().random_range(0.0..1.0));
        debug!(delay_ms = delay.as_millis() as u64, "gateway reconnect backoff");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

/// Route an inbound frame: a matching echo tag resolves its waiter, anything
/// else is an unsolicited event and is dropped.
async fn handle_inbound(pending: &Pending, raw: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(raw) else {
        debug!("gateway sent non-json frame");
        return;
    };
    let echo = frame.get("echo").and_then(Value::as_str).unwrap_or("");
    if echo.is_empty() {
        debug!(
            post_type = frame.get("post_type").and_then(|v| v.as_str()).unwrap_or(""),
            "gateway event ignored"
        );
        return;
    }
    if let Some(waiter) = pending.lock().await.remove(echo) {
        let _ = waiter.send(Ok(frame));
    } else {
        debug!(echo = %echo, "reply for unknown echo tag");
    }
}

/// Resolve every pending call with `error` and clear the table.
async fn fail_pending(pending: &Pending, error: CallError) {
    let mut table = pending.lock().await;
    if table.is_empty() {
        return;
    }
    warn!(count = table.len(), error = %error, "failing pending gateway calls");
    for (_, waiter) in table.drain() {
        let _ = waiter.send(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_to_the_cap() {
        let mut backoff = Backoff::new();
        let mut delays = Vec::new();
        for _ in 0..12 {
            delays.push(backoff.next(0.0).as_secs_f64());
        }
        assert!((delays[0] - 1.0).abs() < 1e-9);
        assert!((delays[1] - 1.7).abs() < 1e-9);
        assert!((delays[2] - 2.89).abs() < 1e-6);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!((delays[11] - 60.0).abs() < 1e-9);
    }

    #[test]
    fn backoff_reset_returns_to_base() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            backoff.next(0.0);
        }
        backoff.reset();
        assert!((backoff.next(0.0).as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn backoff_jitter_is_bounded() {
        let mut backoff = Backoff::new();
        // delay 1.0, jitter bound max(0.5, 0.1) = 0.5
        let d = backoff.next(0.999).as_secs_f64();
        assert!(d > 1.0 && d < 1.5);
    }

    #[test]
    fn token_appended_as_query_parameter() {
        assert_eq!(
            build_ws_url("ws://h:6700/", "tok"),
            "ws://h:6700/?access_token=tok"
        );
    }

    #[test]
    fn existing_token_is_kept() {
        let url = "ws://h:6700/?access_token=old";
        assert_eq!(build_ws_url(url, "new"), url);
    }

    #[test]
    fn empty_token_leaves_url_untouched() {
        assert_eq!(build_ws_url("ws://h:6700/", ""), "ws://h:6700/");
    }

    #[tokio::test]
    async fn unconfigured_client_fails_fire_and_wait() {
        let client = OneBotClient::spawn("", "");
        let target = Target::resolve("group", "1").unwrap();
        let result = client
            .send_text_with_result(&target, "hi", Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(CallError::NotConfigured));
    }
}
