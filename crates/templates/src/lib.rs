//! Notification template engine.
//!
//! A template is plain text with `{key}` placeholders plus two literal
//! markers: `{SHOTPICTURE}` expands to an inline image (when bytes are
//! supplied) and `[atALL]` expands to an `@everyone` mention. Rendering is a
//! pure function from template + values + optional image to a segment list.

use std::collections::HashMap;

use herald_common::{EventKind, Segment};

/// Inline-image marker. Contributes nothing when no image bytes are given.
pub const IMAGE_MARKER: &str = "{SHOTPICTURE}";

/// At-everyone marker.
pub const AT_ALL_MARKER: &str = "[atALL]";

/// Placeholder values for one rendered notification.
pub type Values = HashMap<&'static str, String>;

/// Built-in template for an event kind, used when a binding override is
/// empty.
pub fn default_template(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Post => "{name} posted a new update: {text}\n{SHOTPICTURE}\n{url}",
        EventKind::Video => "{name} uploaded a new video: {title}\n{SHOTPICTURE}\n{url}",
        EventKind::LiveStart => "{name} is now live: {title}\n{SHOTPICTURE}\n{url}",
        EventKind::LiveRecurring => {
            "{name} is still live: {title}\nuptime {duration} | viewers {online} | peak {max_online}\n{SHOTPICTURE}\n{url}"
        },
        EventKind::LiveEnd => {
            "{name} finished streaming: {title}\nuptime {duration} | peak {max_online}\n{url}"
        },
    }
}

/// Pick the binding override when non-empty, else the built-in default.
pub fn template_for<'a>(override_template: &'a str, kind: EventKind) -> &'a str {
    if override_template.trim().is_empty() {
        default_template(kind)
    } else {
        override_template
    }
}

/// Expand a template into message segments.
///
/// Returns the segments and a `rich` flag: true whenever any non-text
/// segment is present, in which case the caller should use the segment-list
/// send API instead of plain text.
pub fn render(template: &str, values: &Values, image: Option<&[u8]>) -> (Vec<Segment>, bool) {
    let mut segments = Vec::new();

    for piece in split_markers(template) {
        match piece {
            Piece::Image => {
                if let Some(bytes) = image {
                    segments.push(Segment::image_bytes(bytes));
                }
            },
            Piece::AtAll => segments.push(Segment::at_all()),
            Piece::Text(run) => {
                let text = apply_values(run, values);
                if !text.is_empty() {
                    segments.push(Segment::text(text));
                }
            },
        }
    }

    let rich = segments.iter().any(|s| !s.is_text());
    (segments, rich)
}

enum Piece<'a> {
    Text(&'a str),
    Image,
    AtAll,
}

/// Split on the two literal markers, keeping text runs in order.
fn split_markers(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = template;

    loop {
        let image_at = rest.find(IMAGE_MARKER);
        let at_all_at = rest.find(AT_ALL_MARKER);
        let next = match (image_at, at_all_at) {
            (Some(i), Some(a)) if i <= a => Some((i, Piece::Image, IMAGE_MARKER.len())),
            (_, Some(a)) => Some((a, Piece::AtAll, AT_ALL_MARKER.len())),
            (Some(i), None) => Some((i, Piece::Image, IMAGE_MARKER.len())),
            (None, None) => None,
        };
        match next {
            Some((at, marker, len)) => {
                if at > 0 {
                    pieces.push(Piece::Text(&rest[..at]));
                }
                pieces.push(marker);
                rest = &rest[at + len..];
            },
            None => {
                if !rest.is_empty() {
                    pieces.push(Piece::Text(rest));
                }
                return pieces;
            },
        }
    }
}

/// Substitute every `{key}` token. Keys absent from `values` become empty
/// strings rather than errors or leftover braces.
fn apply_values(text: &str, values: &Values) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find('}') {
            Some(end) if is_placeholder_key(&tail[..end]) => {
                let key = &tail[..end];
                if let Some(value) = values.get(key) {
                    out.push_str(value);
                }
                rest = &tail[end + 1..];
            },
            _ => {
                // Not a placeholder — keep the brace literally.
                out.push('{');
                rest = tail;
            },
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
