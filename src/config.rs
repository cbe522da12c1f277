//! Configuration loading and management.
//!
//! Loads orchestrator configuration from `./aviary.toml` (or
//! `$AVIARY_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults. Configuration is read once at startup
//! and passed by value to the supervisor and adapters -- there is no
//! process-wide mutable settings state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

// ── Top-level config ────────────────────────────────────────────

/// Top-level orchestrator configuration loaded from TOML.
///
/// Precedence: env vars > config file > defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AviaryConfig {
    /// Supervisor settings (`[supervisor]`).
    pub supervisor: SupervisorConfig,
    /// Responder provider settings (`[responder]`).
    pub responder: ResponderConfig,
    /// Chat platform adapter settings (`[chat]`).
    pub chat: ChatSection,
    /// Microblog platform adapter settings (`[microblog]`).
    pub microblog: MicroblogSection,
}

impl AviaryConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$AVIARY_CONFIG_PATH` or `./aviary.toml`. A
    /// missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: AviaryConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(AviaryConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("AVIARY_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("aviary.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Responder.
        if let Some(v) = env("AVIARY_GEMINI_API_KEY") {
            self.responder.api_key = Some(v);
        }
        if let Some(v) = env("AVIARY_RESPONDER_MODEL") {
            self.responder.model = v;
        }
        if let Some(v) = env("AVIARY_TUNED_MODEL") {
            self.responder.tuned_model = Some(v);
        }

        // Chat adapter.
        if let Some(v) = env("AVIARY_TELEGRAM_API_TOKEN") {
            self.chat.api_token = Some(v);
        }
        if let Some(v) = env("AVIARY_TELEGRAM_ALLOWED_USERS") {
            self.chat.allowed_user_ids = parse_user_id_list(&v);
        }

        // Microblog adapter.
        if let Some(v) = env("AVIARY_X_API_KEY") {
            self.microblog.api_key = Some(v);
        }
        if let Some(v) = env("AVIARY_X_API_KEY_SECRET") {
            self.microblog.api_secret = Some(v);
        }
        if let Some(v) = env("AVIARY_X_ACCESS_TOKEN") {
            self.microblog.access_token = Some(v);
        }
        if let Some(v) = env("AVIARY_X_ACCESS_TOKEN_SECRET") {
            self.microblog.access_secret = Some(v);
        }
        if let Some(v) = env("AVIARY_RAPIDAPI_KEY") {
            self.microblog.rapidapi_key = Some(v);
        }
        if let Some(v) = env("AVIARY_RAPIDAPI_HOST") {
            self.microblog.rapidapi_host = v;
        }
        if let Some(v) = env("AVIARY_ACCOUNTS_TO_MONITOR") {
            self.microblog.accounts = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML does not parse.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AviaryConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Parse a comma-separated list of numeric user ids, skipping and
/// logging invalid entries.
fn parse_user_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(entry = s, "skipping non-numeric allowed-user id");
                None
            }
        })
        .collect()
}

// ── Supervisor config ───────────────────────────────────────────

/// Supervisor settings (`[supervisor]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds between adapter liveness sweeps.
    pub monitor_interval_seconds: u64,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval_seconds: 5,
            logs_dir: "./logs".to_owned(),
        }
    }
}

// ── Responder config ────────────────────────────────────────────

/// Responder provider settings (`[responder]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Provider API key; without it no responder can be initialized.
    pub api_key: Option<String>,
    /// Default model name.
    pub model: String,
    /// Optional tuned model name; used when present in the provider's
    /// tuned-model listing, otherwise falls back to `model`.
    pub tuned_model: Option<String>,
    /// Optional system instruction passed with every prompt.
    pub system_instruction: Option<String>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_owned(),
            tuned_model: None,
            system_instruction: None,
        }
    }
}

impl std::fmt::Debug for ResponderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("tuned_model", &self.tuned_model)
            .finish()
    }
}

// ── Chat adapter config ─────────────────────────────────────────

/// Chat platform adapter settings (`[chat]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// Whether the adapter starts at all.
    pub enabled: bool,
    /// Bot API token.
    pub api_token: Option<String>,
    /// Allowed user ids; empty means public access.
    pub allowed_user_ids: Vec<i64>,
    /// Seconds between update checks.
    pub polling_interval_seconds: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_token: None,
            allowed_user_ids: Vec::new(),
            polling_interval_seconds: 5,
        }
    }
}

impl std::fmt::Debug for ChatSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSection")
            .field("enabled", &self.enabled)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("polling_interval_seconds", &self.polling_interval_seconds)
            .finish()
    }
}

// ── Microblog adapter config ────────────────────────────────────

/// Microblog platform adapter settings (`[microblog]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct MicroblogSection {
    /// Whether the adapter starts at all.
    pub enabled: bool,
    /// OAuth 1.0a consumer key.
    pub api_key: Option<String>,
    /// OAuth 1.0a consumer secret.
    pub api_secret: Option<String>,
    /// OAuth 1.0a access token.
    pub access_token: Option<String>,
    /// OAuth 1.0a access token secret.
    pub access_secret: Option<String>,
    /// API key for the third-party search endpoint.
    pub rapidapi_key: Option<String>,
    /// Host of the third-party search endpoint.
    pub rapidapi_host: String,
    /// Accounts to monitor for mentions, each with its leading `@`.
    pub accounts: Vec<String>,
    /// Seconds between full account-set sweeps.
    pub polling_interval_seconds: u64,
}

impl Default for MicroblogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_secret: None,
            access_token: None,
            access_secret: None,
            rapidapi_key: None,
            rapidapi_host: "twitter241.p.rapidapi.com".to_owned(),
            accounts: Vec::new(),
            polling_interval_seconds: 60,
        }
    }
}

impl std::fmt::Debug for MicroblogSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroblogSection")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "access_secret",
                &self.access_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "rapidapi_key",
                &self.rapidapi_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rapidapi_host", &self.rapidapi_host)
            .field("accounts", &self.accounts)
            .field("polling_interval_seconds", &self.polling_interval_seconds)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────
