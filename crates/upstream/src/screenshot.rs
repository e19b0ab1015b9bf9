//! Optional HTML-to-image rendering for notification cards.

use std::collections::HashMap;

use {async_trait::async_trait, serde_json::json, tracing::warn};

/// Renders an HTML document to image bytes. Failure is soft: the caller
/// falls back to cover images or text-only messages.
#[async_trait]
pub trait ScreenshotRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Option<Vec<u8>>;
}

/// Renderer backed by an external rendering service that accepts
/// `POST {"html": ...}` and answers with raw image bytes.
pub struct HttpRenderer {
    http:     reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(endpoint: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_owned(),
        })
    }
}

#[async_trait]
impl ScreenshotRenderer for HttpRenderer {
    async fn render(&self, html: &str) -> Option<Vec<u8>> {
        let response = match self.http.post(&self.endpoint).json(&json!({ "html": html })).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "screenshot request failed");
                return None;
            },
        };
        if !response.status().is_success() {
            warn!(endpoint = %self.endpoint, status = %response.status(), "screenshot service returned non-success");
            return None;
        }
        response.bytes().await.ok().map(|b| b.to_vec())
    }
}

/// Renderer used when no rendering service is configured.
pub struct NoopRenderer;

#[async_trait]
impl ScreenshotRenderer for NoopRenderer {
    async fn render(&self, _html: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Built-in notification card markup filled in per event.
pub const CARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body { margin: 0; font-family: "Noto Sans", sans-serif; background: #f4f5f7; }
  .card { width: 560px; margin: 24px auto; padding: 20px; background: #fff;
          border-radius: 12px; box-shadow: 0 2px 8px rgba(0,0,0,.08); }
  .head { display: flex; align-items: center; gap: 12px; }
  .head img { width: 48px; height: 48px; border-radius: 50%; }
  .name { font-size: 18px; font-weight: 600; }
  .time { color: #8a8f99; font-size: 13px; }
  .text { margin-top: 14px; font-size: 15px; line-height: 1.6;
          white-space: pre-wrap; word-break: break-word; }
  .cover { margin-top: 14px; width: 100%; border-radius: 8px; }
</style>
</head>
<body>
<div class="card">
  <div class="head">
    <img src="{avatar}" onerror="this.style.display='none'">
    <div>
      <div class="name">{name}</div>
      <div class="time">{time}</div>
    </div>
  </div>
  <div class="text">{text}</div>
  <img class="cover" src="{cover}" onerror="this.style.display='none'">
</div>
</body>
</html>"#;

/// Fill `{key}` slots in the card markup; unknown keys become empty.
pub fn fill_card(values: &HashMap<&str, String>) -> String {
    let mut html = CARD_HTML.to_owned();
    for key in ["avatar", "name", "time", "text", "cover"] {
        let value = values.get(key).map(String::as_str).unwrap_or("");
        html = html.replace(&format!("{{{key}}}"), value);
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_renderer_never_produces_bytes() {
        assert!(NoopRenderer.render("<html></html>").await.is_none());
    }

    #[test]
    fn card_fill_substitutes_known_keys_and_blanks_the_rest() {
        let mut values = HashMap::new();
        values.insert("name", "Streamer".to_owned());
        values.insert("text", "hello <world>".to_owned());
        let html = fill_card(&values);
        assert!(html.contains(">Streamer<"));
        assert!(html.contains("hello <world>"));
        assert!(!html.contains("{name}"));
        assert!(!html.contains("{cover}"));
    }
}
