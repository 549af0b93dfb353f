//! Per-conversation history backed by the shared key-value store.
//!
//! Session keys are a deterministic composite of chat id and sender open_id,
//! so every message from the same pair lands on the same record. Each write
//! resets the inactivity window; when it elapses the record expires
//! store-side and the conversation starts fresh.

use crate::store::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SESSION_KEY_PREFIX: &str = "feishu:session";

/// Speaker of one conversation turn, using the completion provider's
/// native role pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One element of a conversation history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Conversation history store.
///
/// History length is unbounded within the TTL window; truncation is left to
/// the expiry policy.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Derive the session key for a chat+sender pair.
    ///
    /// Must be stable across calls for the same pair and distinct across
    /// different pairs.
    pub fn session_key(chat_id: &str, sender_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}:{chat_id}:{sender_id}")
    }

    /// Read the stored turn sequence.
    ///
    /// Absent, expired, and undecodable records all read as an empty
    /// history; store failures are logged and mapped to empty as well, so a
    /// degraded store costs context, not availability.
    pub async fn get_history(&self, session_key: &str) -> Vec<Turn> {
        let raw = match self.store.get(session_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "History read failed, starting fresh");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "Stored history undecodable, treating as absent");
                Vec::new()
            }
        }
    }

    /// Overwrite the stored history and reset its expiry window.
    pub async fn save_history(&self, session_key: &str, history: &[Turn]) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_string(history).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set_ex(session_key, &encoded, self.ttl_secs).await
    }

    /// Delete the session record. Idempotent.
    pub async fn clear_history(&self, session_key: &str) -> Result<(), StoreError> {
        self.store.delete(session_key).await
    }
}
