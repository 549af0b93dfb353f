//! Relay bridge between inbound chat events and the completion provider.
//!
//! One exchange per inbound message: read history, call Gemini, append the
//! new turn pair, write history back, reply. Replies are best-effort; every
//! failure downstream of classification still produces a response for the
//! webhook caller.

use crate::event::{normalize_text, MessageEvent};
use crate::feishu::FeishuClient;
use crate::gemini::GeminiClient;
use crate::session::{SessionStore, Turn};
use std::sync::Arc;

/// Reserved input that resets a session instead of being forwarded.
const CLEAR_COMMAND: &str = "/clear";

/// Confirmation sent after a successful history reset.
const CLEAR_CONFIRMATION: &str = "✅ 历史对话已清除，我们可以开始新的话题了。";

/// Generic user-visible failure text.
const FALLBACK_TEXT: &str = "机器人出了一点小问题，请稍后再试。";

/// Outcome of handling one chat message event.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The event was processed (including completion-failure fallbacks).
    Success,
    /// The event was deliberately skipped, with the status to report.
    Ignored(&'static str),
}

fn is_clear_command(text: &str) -> bool {
    text.eq_ignore_ascii_case(CLEAR_COMMAND)
}

fn fallback_with_error(cause: &anyhow::Error) -> String {
    format!("{FALLBACK_TEXT}\n错误: {cause}")
}

/// Orchestrates the chat and direct completion paths.
pub struct RelayBridge {
    sessions: SessionStore,
    feishu: Arc<FeishuClient>,
    gemini: Arc<GeminiClient>,
    allowed_users: Vec<String>,
}

impl RelayBridge {
    pub fn new(
        sessions: SessionStore,
        feishu: Arc<FeishuClient>,
        gemini: Arc<GeminiClient>,
        allowed_users: Vec<String>,
    ) -> Self {
        Self {
            sessions,
            feishu,
            gemini,
            allowed_users,
        }
    }

    /// Empty list means no restriction; "*" also admits everyone.
    fn is_user_allowed(&self, open_id: &str) -> bool {
        self.allowed_users.is_empty()
            || self.allowed_users.iter().any(|u| u == "*" || u == open_id)
    }

    /// Best-effort reply. A delivery failure (including "cannot get token")
    /// is logged and swallowed; there is nothing user-visible left to do.
    async fn send_reply(&self, message_id: &str, text: &str) {
        if let Err(e) = self.feishu.reply(message_id, text).await {
            tracing::error!(message_id = %message_id, error = %e, "Reply delivery failed");
        }
    }

    /// Handle one decoded chat message event.
    pub async fn handle_message(&self, event: &MessageEvent) -> ChatOutcome {
        let Some(text) = normalize_text(&event.message) else {
            tracing::debug!(message_id = %event.message.message_id, "No usable text in message");
            return ChatOutcome::Ignored("empty message ignored");
        };

        let sender = event.sender_open_id();
        if !self.is_user_allowed(sender) {
            tracing::warn!(sender = %sender, "Ignoring message from sender not on allow-list");
            return ChatOutcome::Ignored("sender not allowed");
        }

        let session_key = SessionStore::session_key(&event.message.chat_id, sender);
        let message_id = &event.message.message_id;

        if is_clear_command(&text) {
            match self.sessions.clear_history(&session_key).await {
                Ok(()) => {
                    tracing::info!(session_key = %session_key, "Session history cleared");
                    self.send_reply(message_id, CLEAR_CONFIRMATION).await;
                }
                Err(e) => {
                    tracing::error!(session_key = %session_key, error = %e, "History clear failed");
                    self.send_reply(message_id, FALLBACK_TEXT).await;
                }
            }
            return ChatOutcome::Success;
        }

        let mut history = self.sessions.get_history(&session_key).await;

        match self.gemini.generate(&history, &text).await {
            Ok(reply) => {
                history.push(Turn::user(&text));
                history.push(Turn::model(&reply));
                if let Err(e) = self.sessions.save_history(&session_key, &history).await {
                    tracing::warn!(session_key = %session_key, error = %e, "History write failed");
                }
                self.send_reply(message_id, &reply).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Completion call failed");
                self.send_reply(message_id, &fallback_with_error(&e)).await;
            }
        }

        ChatOutcome::Success
    }

    /// Handle a direct completion request. No session state is touched.
    pub async fn handle_direct(&self, input: &str) -> String {
        match self.gemini.generate(&[], input).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Direct completion failed");
                fallback_with_error(&e)
            }
        }
    }
}
