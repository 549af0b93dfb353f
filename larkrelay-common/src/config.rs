//! Configuration management for LarkRelay.
//!
//! The service reads a single JSON configuration file at
//! `~/.larkrelay/config.json`. Every field has a default, so a missing file
//! yields a runnable (if credential-less) configuration.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `LARKRELAY_BIND_ADDRESS` → network.bind
//! - `LARKRELAY_PORT` → server.port
//! - `LARKRELAY_LOG_LEVEL` → observability.log_level
//! - `FEISHU_APP_ID` → feishu.app_id
//! - `FEISHU_APP_SECRET` → feishu.app_secret
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → gemini.api_key
//! - `REDIS_URL` → store.redis_url

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".larkrelay"),
        |dirs| dirs.home_dir().join(".larkrelay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Global network configuration.
///
/// Controls the bind address. Default is `127.0.0.1` (local only).
/// Set to `0.0.0.0` to allow remote access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address for the HTTP server.
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for the webhook endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    4500
}

// ============================================================================
// Feishu Configuration
// ============================================================================

/// Feishu/Lark application credentials and access policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeishuConfig {
    /// Application ID from the Feishu Open Platform.
    #[serde(default)]
    pub app_id: String,

    /// Application secret from the Feishu Open Platform.
    #[serde(default)]
    pub app_secret: String,

    /// Use the international Lark API base instead of Feishu (China).
    #[serde(default)]
    pub use_lark: bool,

    /// Sender open_ids allowed to talk to the bot.
    /// Empty means no restriction; "*" also allows everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl FeishuConfig {
    /// Whether both credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}

// ============================================================================
// Gemini Configuration
// ============================================================================

/// Gemini completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key for the generative-language API.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name used for completions.
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash-latest".into()
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Key-value store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL (redis://host:port). When absent, the in-memory backend
    /// is used and state is lost on restart.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Session inactivity window in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            session_ttl_secs: default_session_ttl(),
        }
    }
}

fn default_session_ttl() -> u64 {
    3600
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the LarkRelay service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub feishu: FeishuConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("LARKRELAY_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Ok(port) = std::env::var("LARKRELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("LARKRELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(app_id) = std::env::var("FEISHU_APP_ID") {
            self.feishu.app_id = app_id;
        }
        if let Ok(secret) = std::env::var("FEISHU_APP_SECRET") {
            self.feishu.app_secret = secret;
        }

        if let Ok(key) =
            std::env::var("GEMINI_API_KEY").or_else(|_| std::env::var("GOOGLE_API_KEY"))
        {
            self.gemini.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            self.store.redis_url = Some(url);
        }
    }

    /// Save configuration to the default path, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;

        let path = config_path();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
