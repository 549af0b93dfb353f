//! LarkRelay - Feishu/Lark webhook relay bridging chat messages to Gemini.
//!
//! The service receives chat events from Feishu via a webhook, forwards user
//! text to the Gemini API with short-lived per-conversation history, and
//! posts the reply back. A direct `input_text` request shape bypasses
//! history and returns a single synchronous completion.
//!
//! ```text
//! Feishu ─▶ POST /webhook/feishu ─▶ classify ─▶ RelayBridge ─▶ Gemini
//!    ▲                                              │
//!    └──────────── reply (tenant token) ◀───────────┘
//!                         │
//!                   KvStore (token + session TTLs)
//! ```

#![warn(clippy::all)]

pub mod bridge;
pub mod event;
pub mod feishu;
pub mod gemini;
pub mod routes;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use bridge::{ChatOutcome, RelayBridge};
pub use event::{classify, InboundEvent, MessageEvent};
pub use feishu::FeishuClient;
pub use gemini::GeminiClient;
pub use routes::{build_router, RelayState};
pub use session::{Role, SessionStore, Turn};
pub use store::{KvStore, MemoryKv, RedisKv, StoreError};

use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use larkrelay_common::Config;

/// Select the store backend from configuration.
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    match config.store.redis_url.as_deref() {
        Some(url) => Ok(Arc::new(RedisKv::connect(url).await?)),
        None => {
            tracing::warn!("No Redis URL configured, using in-memory store (state lost on restart)");
            Ok(Arc::new(MemoryKv::new()))
        }
    }
}

/// Build the relay state and router from configuration.
pub async fn build_relay_router(config: &Config) -> anyhow::Result<axum::Router> {
    if !config.feishu.has_credentials() {
        tracing::warn!("Feishu credentials missing, replies will fail (challenges still answered)");
    }

    let store = build_store(config).await?;

    let feishu = Arc::new(FeishuClient::new(
        config.feishu.app_id.clone(),
        config.feishu.app_secret.clone(),
        config.feishu.use_lark,
        store.clone(),
    ));

    let gemini = Arc::new(GeminiClient::new(
        config.gemini.api_key.clone(),
        config.gemini.model.clone(),
    ));
    if !gemini.has_key() {
        tracing::warn!("Gemini API key missing, completions will fail");
    }

    let bridge = RelayBridge::new(
        SessionStore::new(store.clone(), config.store.session_ttl_secs),
        feishu,
        gemini,
        config.feishu.allowed_users.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(RelayState { bridge, store });
    Ok(build_router(state).layer(cors))
}

/// Start the relay HTTP server, running until ctrl-c.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.network.bind.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_relay_router(config).await?;

    tracing::info!("Starting LarkRelay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("LarkRelay shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server cannot shut down cleanly;
        // keep serving instead of exiting immediately.
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
