//! Outbound frame construction for the OneBot v11 action API.

use {
    serde::Serialize,
    serde_json::{Map, Value},
};

/// Chat target kind. Anything that is not explicitly "private" addresses a
/// group, matching the protocol's two send actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetKind {
    #[default]
    Group,
    Private,
}

impl TargetKind {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("private") {
            Self::Private
        } else {
            Self::Group
        }
    }
}

/// A resolved chat target: kind plus a positive numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub kind: TargetKind,
    pub id: i64,
}

impl Target {
    /// Resolve a raw (kind, id) pair from config. Returns `None` unless the
    /// id parses as a positive integer.
    pub fn resolve(kind: &str, id: &str) -> Option<Self> {
        let id = id.trim().parse::<i64>().ok().filter(|v| *v > 0)?;
        Some(Self {
            kind: TargetKind::parse(kind),
            id,
        })
    }

    pub fn action(&self) -> &'static str {
        match self.kind {
            TargetKind::Group => "send_group_msg",
            TargetKind::Private => "send_private_msg",
        }
    }

    fn id_field(&self) -> &'static str {
        match self.kind {
            TargetKind::Group => "group_id",
            TargetKind::Private => "user_id",
        }
    }
}

/// One outbound action frame.
#[derive(Debug, Clone, Serialize)]
pub struct ApiFrame {
    pub action: &'static str,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

/// Build a message frame for a target. `message` is either a plain string or
/// a segment array, both accepted by the protocol.
pub fn message_frame(target: &Target, message: Value, echo: Option<String>) -> ApiFrame {
    let mut params = Map::new();
    params.insert(target.id_field().to_owned(), Value::from(target.id));
    params.insert("message".to_owned(), message);
    ApiFrame {
        action: target.action(),
        params: Value::Object(params),
        echo,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn group_frame_wire_shape() {
        let target = Target::resolve("group", "123456").unwrap();
        let frame = message_frame(&target, Value::String("hi".into()), None);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "action": "send_group_msg",
                "params": {"group_id": 123456, "message": "hi"},
            })
        );
    }

    #[test]
    fn private_frame_carries_echo() {
        let target = Target::resolve("private", "42").unwrap();
        let frame = message_frame(&target, Value::String("hi".into()), Some("tag1".into()));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "action": "send_private_msg",
                "params": {"user_id": 42, "message": "hi"},
                "echo": "tag1",
            })
        );
    }

    #[test]
    fn unknown_kind_defaults_to_group() {
        let target = Target::resolve("", "9").unwrap();
        assert_eq!(target.action(), "send_group_msg");
    }

    #[test]
    fn invalid_ids_do_not_resolve() {
        assert!(Target::resolve("group", "").is_none());
        assert!(Target::resolve("group", "abc").is_none());
        assert!(Target::resolve("group", "0").is_none());
        assert!(Target::resolve("group", "-5").is_none());
    }
}
