//! Event envelope decoding and subscription matching.
//!
//! The client speaks a small WAMP 1 dialect over the socket. After the
//! subscribe frame `[5, "OnJsonApiEvent"]` every API change arrives as
//! `[8, "OnJsonApiEvent", {"eventType": "Update", "uri": "...", "data": {...}}]`.

use std::fmt;
use std::ops::BitOr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// WAMP opcode for a subscribe request.
const WAMP_SUBSCRIBE: u64 = 5;
/// WAMP opcode for a published event.
const WAMP_EVENT: u64 = 8;
/// Catch-all topic carrying every JSON API change.
pub const JSON_API_TOPIC: &str = "OnJsonApiEvent";

/// Frame sent right after the handshake to receive all API events.
pub fn subscribe_frame() -> String {
    serde_json::json!([WAMP_SUBSCRIBE, JSON_API_TOPIC]).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    /// Parses `Create`/`CREATE`/`create` and friends.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("create") {
            Some(EventKind::Create)
        } else if s.eq_ignore_ascii_case("update") {
            Some(EventKind::Update)
        } else if s.eq_ignore_ascii_case("delete") {
            Some(EventKind::Delete)
        } else {
            None
        }
    }

    fn bit(self) -> u8 {
        match self {
            EventKind::Create => 0b001,
            EventKind::Update => 0b010,
            EventKind::Delete => 0b100,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Create => "Create",
            EventKind::Update => "Update",
            EventKind::Delete => "Delete",
        })
    }
}

/// Set of event kinds a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKinds(u8);

impl EventKinds {
    pub const CREATE: EventKinds = EventKinds(0b001);
    pub const UPDATE: EventKinds = EventKinds(0b010);
    pub const DELETE: EventKinds = EventKinds(0b100);
    pub const ALL: EventKinds = EventKinds(0b111);

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl BitOr for EventKinds {
    type Output = EventKinds;

    fn bitor(self, rhs: EventKinds) -> EventKinds {
        EventKinds(self.0 | rhs.0)
    }
}

/// Which event uris a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// The uri must equal the path.
    Exact(String),
    /// The uri must start with the path.
    #[cfg_attr(not(test), allow(dead_code))]
    Prefix(String),
}

impl Topic {
    pub fn exact(path: impl Into<String>) -> Self {
        Topic::Exact(path.into())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn prefix(path: impl Into<String>) -> Self {
        Topic::Prefix(path.into())
    }

    pub fn matches(&self, uri: &str) -> bool {
        match self {
            Topic::Exact(path) => uri == path,
            Topic::Prefix(path) => uri.starts_with(path.as_str()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Exact(path) => f.write_str(path),
            Topic::Prefix(path) => write!(f, "{path}*"),
        }
    }
}

/// One decoded API change.
#[derive(Debug, Clone, PartialEq)]
pub struct LcuEvent {
    pub kind: EventKind,
    pub uri: String,
    pub data: Value,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "eventType", alias = "type")]
    event_type: String,
    uri: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed event frame: {0}")]
    Malformed(&'static str),
    #[error("unknown event type {0:?}")]
    UnknownKind(String),
}

/// Decodes one text frame.
///
/// Returns `Ok(None)` for well-formed frames that are not events (welcome,
/// call results). Both the WAMP array form and a bare `{type, uri, data}`
/// envelope are accepted.
pub fn decode_frame(text: &str) -> Result<Option<LcuEvent>, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let envelope = match value {
        Value::Array(mut parts) => {
            let opcode = parts
                .first()
                .and_then(Value::as_u64)
                .ok_or(FrameError::Malformed("missing opcode"))?;
            if opcode != WAMP_EVENT {
                return Ok(None);
            }
            if parts.len() < 3 {
                return Err(FrameError::Malformed("event frame without payload"));
            }
            serde_json::from_value::<Envelope>(parts.swap_remove(2))?
        }
        Value::Object(_) => serde_json::from_value::<Envelope>(value)?,
        _ => return Err(FrameError::Malformed("expected array or object")),
    };

    let kind = EventKind::parse(&envelope.event_type)
        .ok_or_else(|| FrameError::UnknownKind(envelope.event_type.clone()))?;
    Ok(Some(LcuEvent {
        kind,
        uri: envelope.uri,
        data: envelope.data,
    }))
}
