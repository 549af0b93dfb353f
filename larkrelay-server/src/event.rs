//! Inbound event classification for the Feishu webhook.
//!
//! A single endpoint receives three request shapes: the URL-verification
//! challenge, platform event callbacks, and the direct `input_text` shape
//! used by the spreadsheet integration. Classification happens here so the
//! store, caches, and clients never see raw request bodies.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

/// Mention placeholders Feishu injects into group-chat text (`@_user_1` etc).
static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@_user_\d+").unwrap_or_else(|e| panic!("invalid mention regex: {e}"))
});

// ============================================================================
// Event Types
// ============================================================================

/// A decoded `im.message.receive_v1` event, reduced to the fields the
/// relay acts on.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub sender: MessageSender,
    pub message: MessageBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSender {
    pub sender_id: SenderIds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderIds {
    pub open_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    pub message_id: String,
    pub chat_id: String,
    pub message_type: String,
    pub content: String,
}

impl MessageEvent {
    /// Sender open_id, or a stable placeholder when the platform omits it.
    pub fn sender_open_id(&self) -> &str {
        self.sender.sender_id.open_id.as_deref().unwrap_or("unknown")
    }
}

/// Outcome of classifying one inbound POST body.
#[derive(Debug)]
pub enum InboundEvent {
    /// URL-verification challenge to echo back.
    Challenge(String),
    /// Direct completion request from the spreadsheet path.
    Direct(String),
    /// A chat message event to relay.
    Message(Box<MessageEvent>),
    /// A recognized shape the relay deliberately skips.
    Ignored(&'static str),
    /// Not one of the known request shapes.
    Unrecognized,
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a raw webhook body into one of the known request shapes.
pub fn classify(body: &str) -> InboundEvent {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return InboundEvent::Unrecognized;
    };

    if !value.is_object() {
        return InboundEvent::Unrecognized;
    }

    if let Some(challenge) = value.get("challenge").and_then(|c| c.as_str()) {
        return InboundEvent::Challenge(challenge.to_string());
    }

    if let Some(input) = value.get("input_text").and_then(|t| t.as_str()) {
        return InboundEvent::Direct(input.to_string());
    }

    if let Some(header) = value.get("header") {
        let event_type = header.get("event_type").and_then(|t| t.as_str());
        if event_type != Some(MESSAGE_RECEIVE_EVENT) {
            return InboundEvent::Ignored("event ignored");
        }

        let Some(event) = value.get("event") else {
            return InboundEvent::Ignored("event ignored");
        };

        return match serde_json::from_value::<MessageEvent>(event.clone()) {
            Ok(msg) => InboundEvent::Message(Box::new(msg)),
            Err(e) => {
                tracing::debug!(error = %e, "Message event did not decode, ignoring");
                InboundEvent::Ignored("event ignored")
            }
        };
    }

    InboundEvent::Unrecognized
}

// ============================================================================
// Text Normalization
// ============================================================================

/// Extract usable text from a message event.
///
/// Only `text` messages carry usable content; the content field is itself a
/// JSON string of shape `{"text": "..."}`. Mention placeholders are stripped
/// and the result trimmed. Returns `None` when nothing usable remains.
pub fn normalize_text(message: &MessageBody) -> Option<String> {
    if message.message_type != "text" {
        return None;
    }

    let content: serde_json::Value = serde_json::from_str(&message.content).ok()?;
    let text = content.get("text")?.as_str()?;

    let stripped = MENTION_RE.replace_all(text, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
