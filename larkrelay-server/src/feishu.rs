//! Feishu/Lark outbound client.
//!
//! Covers the two platform calls the relay makes: the tenant-token exchange
//! (cached in the shared store under a single global key) and the message
//! reply endpoint.
//!
//! The token cache is read-through: an absent or expired key triggers a
//! synchronous exchange before the dependent call proceeds. Concurrent
//! refreshes are possible and harmless; the overwrite is idempotent and
//! bounded by the TTL.

use crate::store::KvStore;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
const LARK_API_BASE: &str = "https://open.larksuite.com/open-apis";

/// Global store key for the cached tenant token.
const TOKEN_KEY: &str = "feishu:tenant_token";

/// Cache the token for this much less than the provider's stated validity,
/// so a token nearing provider-side expiry is never served from cache.
const TOKEN_TTL_SLACK_SECS: u64 = 600;

/// Floor for the cache TTL when the provider reports a very short validity.
const TOKEN_TTL_MIN_SECS: u64 = 60;

/// Provider default validity when the exchange response omits `expire`.
const TOKEN_DEFAULT_EXPIRE_SECS: u64 = 7200;

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TenantAccessTokenResponse {
    code: i32,
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessageResponse {
    code: i32,
    msg: String,
}

// ============================================================================
// FeishuClient
// ============================================================================

/// Client for the Feishu Open Platform messaging API.
pub struct FeishuClient {
    app_id: String,
    app_secret: String,
    store: Arc<dyn KvStore>,
    client: reqwest::Client,
    base_url: String,
}

impl FeishuClient {
    /// Create a new client. `use_lark` selects the international API base.
    pub fn new(
        app_id: String,
        app_secret: String,
        use_lark: bool,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let base_url = if use_lark {
            LARK_API_BASE
        } else {
            FEISHU_API_BASE
        };

        Self {
            app_id,
            app_secret,
            store,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.to_string(),
        }
    }

    /// Override the API base URL (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Cache TTL for a freshly exchanged token.
    fn cache_ttl(expire_secs: u64) -> u64 {
        expire_secs
            .saturating_sub(TOKEN_TTL_SLACK_SECS)
            .max(TOKEN_TTL_MIN_SECS)
    }

    /// Get the tenant access token, exchanging credentials on cache miss.
    ///
    /// A store read failure degrades to a fresh exchange; a store write
    /// failure is logged and the fresh token is still returned. An exchange
    /// failure is an error: callers treat it as "cannot notify" and skip the
    /// reply rather than retry.
    pub async fn tenant_token(&self) -> Result<String> {
        match self.store.get(TOKEN_KEY).await {
            Ok(Some(token)) => return Ok(token),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Token cache read failed, falling back to fresh exchange");
            }
        }

        let url = self.api_url("/auth/v3/tenant_access_token/internal");
        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Token exchange request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed ({status}): {text}");
        }

        let data: TenantAccessTokenResponse = resp
            .json()
            .await
            .context("Token exchange response did not decode")?;

        if data.code != 0 {
            anyhow::bail!("Feishu token exchange error ({}): {}", data.code, data.msg);
        }

        let token = data
            .tenant_access_token
            .ok_or_else(|| anyhow::anyhow!("Missing tenant_access_token in response"))?;
        let expire = data.expire.unwrap_or(TOKEN_DEFAULT_EXPIRE_SECS);
        let ttl = Self::cache_ttl(expire);

        if let Err(e) = self.store.set_ex(TOKEN_KEY, &token, ttl).await {
            tracing::warn!(error = %e, "Token cache write failed, serving uncached token");
        }

        tracing::info!(ttl_secs = ttl, "Tenant access token refreshed");
        Ok(token)
    }

    /// Reply to a message with a text body.
    pub async fn reply(&self, message_id: &str, text: &str) -> Result<()> {
        let token = self.tenant_token().await?;

        let url = self.api_url(&format!("/im/v1/messages/{message_id}/reply"));
        let content = serde_json::json!({ "text": text });
        let body = serde_json::json!({
            "msg_type": "text",
            "content": content.to_string(),
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await
            .context("Reply request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Feishu reply failed ({status}): {text}");
        }

        let data: ReplyMessageResponse = resp
            .json()
            .await
            .context("Reply response did not decode")?;

        if data.code != 0 {
            anyhow::bail!("Feishu reply error ({}): {}", data.code, data.msg);
        }

        tracing::info!(message_id = %message_id, "Reply delivered");
        Ok(())
    }
}
