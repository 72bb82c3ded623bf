//! Inbound message envelope and conversation data model.
//!
//! `Turn`/`ContentPart` are the stored history records; their JSON shape
//! (`type`/`data`/`mime_type`) is what the history store persists.

use serde::{Deserialize, Serialize};

/// Message kind as decoded from the platform webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Text,
    Image,
    Voice,
    Event,
    Other,
}

impl MsgKind {
    /// Map the platform's MsgType string to a kind.
    pub fn from_platform(s: &str) -> Self {
        match s {
            "text" => MsgKind::Text,
            "image" => MsgKind::Image,
            "voice" => MsgKind::Voice,
            "event" => MsgKind::Event,
            _ => MsgKind::Other,
        }
    }
}

/// A decoded inbound message. The webhook transport produces one of these
/// per delivery; the router consumes it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub kind: MsgKind,
    /// Opaque platform-assigned sender ID.
    pub sender_id: String,
    /// Text body for text messages, event key for event messages.
    pub content: String,
    /// Media handle for voice and other media messages.
    pub media_id: Option<String>,
    /// Platform-hosted URL for image messages.
    pub pic_url: Option<String>,
}

impl Inbound {
    pub fn text(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Text,
            sender_id: sender_id.into(),
            content: content.into(),
            media_id: None,
            pic_url: None,
        }
    }

    pub fn image(sender_id: impl Into<String>, pic_url: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Image,
            sender_id: sender_id.into(),
            content: String::new(),
            media_id: None,
            pic_url: Some(pic_url.into()),
        }
    }

    pub fn voice(sender_id: impl Into<String>, media_id: impl Into<String>) -> Self {
        Self {
            kind: MsgKind::Voice,
            sender_id: sender_id.into(),
            content: String::new(),
            media_id: Some(media_id.into()),
            pic_url: None,
        }
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    Text,
    Image,
}

/// One content fragment of a turn: text, or an image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: PartKind,
    /// Text content, or the image URL / base64 payload.
    pub data: String,
    #[serde(rename = "mime_type", skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
}

impl ContentPart {
    pub fn text(data: impl Into<String>) -> Self {
        Self { kind: PartKind::Text, data: data.into(), mime_type: None }
    }

    pub fn image(data: impl Into<String>, mime_type: Option<String>) -> Self {
        Self { kind: PartKind::Image, data: data.into(), mime_type }
    }
}

/// One exchange unit in a conversation history.
///
/// Invariant: `parts` is non-empty and its order is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Turn {
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentPart::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, parts: vec![ContentPart::text(text)] }
    }

    /// All text parts joined, for backends that only speak flat text.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.kind == PartKind::Text)
            .map(|p| p.data.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
