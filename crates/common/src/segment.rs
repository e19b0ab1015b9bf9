use {
    base64::Engine,
    serde::{Deserialize, Serialize},
};

/// One element of an OneBot v11 message array.
///
/// Serializes to the wire shape `{"type": ..., "data": {...}}` expected by
/// `send_group_msg` / `send_private_msg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Segment {
    Text { text: String },
    Image { file: String },
    At { qq: String },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image segment carrying inline bytes as `base64://<data>`.
    pub fn image_bytes(bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::Image {
            file: format!("base64://{encoded}"),
        }
    }

    /// `@everyone` mention.
    pub fn at_all() -> Self {
        Self::At { qq: "all".into() }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Text content of a text segment, empty for the other kinds.
    pub fn text_content(&self) -> &str {
        match self {
            Self::Text { text } => text,
            _ => "",
        }
    }
}

/// Concatenate the text runs of a segment list, skipping images and mentions.
pub fn plain_text(segments: &[Segment]) -> String {
    segments.iter().map(Segment::text_content).collect()
}
