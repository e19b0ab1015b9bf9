//! Best-effort extraction from the platform's dynamic-feed payloads.
//!
//! Feed items are deeply nested and loosely typed; every card kind has its
//! own sub-shape and fields come and go between platform revisions. Known
//! `major` variants are handled explicitly and everything else goes through
//! a generic fallback, with missing fields degrading to empty values rather
//! than errors.

use serde_json::Value;

use crate::PostRecord;

/// Normalized summary of one `major` card, whatever its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardSummary {
    pub title: String,
    pub desc: String,
    pub cover: String,
    pub url: String,
}

/// Protocol-relative URLs come back as `//host/...`.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_owned()
    }
}

fn str_at<'a>(value: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or("")
}

/// Item id: `id_str` with a numeric `id` fallback.
pub fn post_id(item: &Value) -> String {
    if let Some(id) = item.get("id_str").and_then(Value::as_str) {
        return id.to_owned();
    }
    match item.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Platform-pinned item detection: explicit flags on the item itself or a
/// "pinned" tag module.
pub fn is_pinned(item: &Value) -> bool {
    for flag in ["is_top", "is_pinned", "is_fixed"] {
        if item.get(flag).and_then(Value::as_bool).unwrap_or(false) {
            return true;
        }
    }
    let Some(modules) = item.get("modules").and_then(Value::as_object) else {
        return false;
    };
    for key in ["module_tag", "module_top", "module_author"] {
        let Some(module) = modules.get(key) else {
            continue;
        };
        for flag in ["is_top", "is_pinned", "is_fixed"] {
            if module.get(flag).and_then(Value::as_bool).unwrap_or(false) {
                return true;
            }
        }
        let label = str_at(module, &["text", "title", "tag_text", "label"]);
        if label.contains("置顶") {
            return true;
        }
    }
    false
}

/// Parse one feed item into a [`PostRecord`]. Returns `None` only when the
/// item has no usable id.
pub fn post_from_item(item: &Value) -> Option<PostRecord> {
    let id = post_id(item);
    if id.is_empty() {
        return None;
    }

    let modules = item.get("modules").cloned().unwrap_or(Value::Null);
    let author = modules.get("module_author").cloned().unwrap_or(Value::Null);
    let dynamic = modules.get("module_dynamic").cloned().unwrap_or(Value::Null);

    let published_at = author
        .get("pub_ts")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let mut text = desc_text(&dynamic);
    let major = dynamic.get("major").cloned().unwrap_or(Value::Null);

    let mut record = PostRecord {
        id: id.clone(),
        url: format!("https://t.bilibili.com/{id}"),
        published_at,
        ..PostRecord::default()
    };

    if let Some(archive) = major.get("archive").filter(|a| a.is_object()) {
        record.is_video = true;
        record.video_title = str_at(archive, &["title"]).to_owned();
        record.cover_url = normalize_url(str_at(archive, &["cover"]));
        record.video_url = video_url(str_at(archive, &["jump_url", "url", "bvid"]));
    }

    record.images = collect_images(&major);

    // Reposts keep their payload under `orig`; fall back to it for anything
    // the outer item left empty.
    let orig = item.get("orig").or_else(|| item.get("origin"));
    if let Some(orig) = orig.filter(|o| o.is_object()) {
        let orig_dynamic = orig
            .get("modules")
            .and_then(|m| m.get("module_dynamic"))
            .cloned()
            .unwrap_or(Value::Null);
        if text.is_empty() {
            text = desc_text(&orig_dynamic);
        }
        let orig_major = orig_dynamic.get("major").cloned().unwrap_or(Value::Null);
        record.images.extend(collect_images(&orig_major));
        if record.cover_url.is_empty() {
            if let Some(summary) = summarize_major(&orig_major) {
                record.cover_url = summary.cover;
            }
        }
    }

    if record.cover_url.is_empty() {
        if let Some(summary) = summarize_major(&major) {
            record.cover_url = summary.cover;
            if record.video_title.is_empty() {
                record.video_title = summary.title;
            }
        }
    }
    if record.cover_url.is_empty() {
        record.cover_url = record.images.first().cloned().unwrap_or_default();
    }

    record.text = text.trim().to_owned();
    dedup(&mut record.images);
    Some(record)
}

/// Expand a bare `BV...` id into a full video URL.
fn video_url(raw: &str) -> String {
    let url = normalize_url(raw);
    if !url.is_empty() && !url.starts_with("http") && url.starts_with("BV") {
        return format!("https://www.bilibili.com/video/{url}");
    }
    url
}

fn desc_text(dynamic: &Value) -> String {
    let direct = dynamic
        .get("desc")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if !direct.is_empty() {
        return direct.to_owned();
    }
    // Opus-style posts carry text in the major block instead.
    let opus = dynamic.get("major").and_then(|m| m.get("opus"));
    if let Some(opus) = opus {
        let summary = opus
            .get("summary")
            .map(|s| match s {
                Value::String(text) => text.clone(),
                other => str_at(other, &["text"]).to_owned(),
            })
            .unwrap_or_default();
        if !summary.is_empty() {
            return summary;
        }
        return str_at(opus, &["title"]).to_owned();
    }
    String::new()
}

/// Image URLs across the card kinds that carry galleries or covers.
fn collect_images(major: &Value) -> Vec<String> {
    let mut images = Vec::new();

    if let Some(items) = major
        .get("draw")
        .and_then(|d| d.get("items"))
        .and_then(Value::as_array)
    {
        for item in items {
            let url = str_at(item, &["src", "url", "img_src", "img"]);
            if !url.is_empty() {
                images.push(normalize_url(url));
            }
        }
    }

    if let Some(pics) = major
        .get("opus")
        .and_then(|o| o.get("pics"))
        .and_then(Value::as_array)
    {
        for pic in pics {
            let url = match pic {
                Value::String(s) => s.as_str(),
                other => str_at(other, &["url", "src", "img", "img_src"]),
            };
            if !url.is_empty() {
                images.push(normalize_url(url));
            }
        }
    }

    if let Some(article) = major.get("article") {
        if let Some(covers) = article.get("covers").and_then(Value::as_array) {
            for cover in covers.iter().filter_map(Value::as_str) {
                if !cover.is_empty() {
                    images.push(normalize_url(cover));
                }
            }
        }
    }

    for kind in ["common", "ugc_season", "live_rcmd", "pgc", "music", "reserve"] {
        if let Some(card) = major.get(kind) {
            let cover = str_at(card, &["cover", "cover_url", "image"]);
            if !cover.is_empty() {
                images.push(normalize_url(cover));
            }
        }
    }

    dedup(&mut images);
    images
}

fn dedup(urls: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| !u.is_empty() && seen.insert(u.clone()));
}

/// Normalize any known `major` card into `{title, desc, cover, url}`, with a
/// generic deep-scan fallback for kinds this code has never seen.
pub fn summarize_major(major: &Value) -> Option<CardSummary> {
    if !major.is_object() {
        return None;
    }

    let known: &[(&str, [&[&str]; 4])] = &[
        ("archive", [&["title"], &["desc", "desc_text"], &["cover"], &["jump_url", "url"]]),
        ("article", [&["title"], &["desc", "summary"], &["cover"], &["jump_url", "url"]]),
        ("common", [&["title", "name"], &["desc", "summary"], &["cover"], &["jump_url", "url"]]),
        ("live_rcmd", [&["title", "roomname"], &["desc", "intro"], &["cover", "keyframe"], &["link", "url"]]),
        ("live", [&["title", "roomname"], &["desc", "intro"], &["cover", "keyframe"], &["link", "url"]]),
        ("reserve", [&["title"], &["desc", "desc1", "desc2"], &["cover", "image"], &["jump_url", "url"]]),
        ("opus", [&["title"], &["summary", "content"], &["cover"], &["jump_url", "url"]]),
        ("topic", [&["title", "name"], &["desc", "summary"], &["cover", "image"], &["jump_url", "url"]]),
    ];

    for (kind, [title, desc, cover, url]) in known {
        if let Some(card) = major.get(kind).filter(|c| c.is_object()) {
            return Some(CardSummary {
                title: str_at(card, title).to_owned(),
                desc: str_at(card, desc).to_owned(),
                cover: normalize_url(str_at(card, cover)),
                url: normalize_url(str_at(card, url)),
            });
        }
    }

    generic_summary(major)
}

/// Fallback: walk the card breadth-first and take the first object that
/// looks like a summary (has a title-ish or cover-ish field).
fn generic_summary(major: &Value) -> Option<CardSummary> {
    let mut queue = std::collections::VecDeque::from([major]);
    while let Some(value) = queue.pop_front() {
        if let Some(obj) = value.as_object() {
            let title = str_at(value, &["title", "name"]);
            let cover = str_at(value, &["cover", "cover_url", "image", "keyframe"]);
            if !title.is_empty() || !cover.is_empty() {
                return Some(CardSummary {
                    title: title.to_owned(),
                    desc: str_at(value, &["desc", "summary", "intro"]).to_owned(),
                    cover: normalize_url(cover),
                    url: normalize_url(str_at(value, &["jump_url", "url", "link"])),
                });
            }
            queue.extend(obj.values());
        } else if let Some(arr) = value.as_array() {
            queue.extend(arr.iter());
        }
    }
    None
}
