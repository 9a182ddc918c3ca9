// ── Switchyard: Configuration ──────────────────────────────────────────────
// Environment-driven process configuration. Per-model provider credentials
// are NOT read here — each model record names its own env var and the
// adapters resolve it at call time.

use crate::error::{GatewayError, GatewayResult};
use std::path::PathBuf;

/// Default TCP port for the gateway surface.
const DEFAULT_PORT: u16 = 3000;

/// Default classifier endpoint (local Ollama, OpenAI-compatible path).
const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:11434/v1";

/// Default classifier model name.
const DEFAULT_CLASSIFIER_MODEL: &str = "qwen2.5:1.5b-instruct";

/// Default health-probe interval.
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 60_000;

/// Probe intervals below this are rejected as misconfiguration.
const MIN_HEALTH_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub classifier_url: String,
    pub classifier_model: String,
    pub health_interval_ms: u64,
    /// When set, every endpoint except `GET /health` requires
    /// `Authorization: Bearer <key>`.
    pub api_key: Option<String>,
    /// Value of the `anthropic-version` header on Anthropic-shaped calls.
    pub anthropic_version: String,
}

impl GatewayConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> GatewayResult<Self> {
        let port = match env_var("SWITCHYARD_PORT") {
            Some(raw) => {
                let p: u32 = raw
                    .parse()
                    .map_err(|_| GatewayError::Config(format!("SWITCHYARD_PORT is not a number: {raw}")))?;
                if p == 0 || p > 65_535 {
                    return Err(GatewayError::Config(format!("SWITCHYARD_PORT out of range: {p}")));
                }
                p as u16
            }
            None => DEFAULT_PORT,
        };

        let db_path = match env_var("SWITCHYARD_DB_PATH") {
            Some(raw) => expand_tilde(&raw),
            None => default_db_path(),
        };

        let health_interval_ms = match env_var("SWITCHYARD_HEALTH_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = raw.parse().map_err(|_| {
                    GatewayError::Config(format!("SWITCHYARD_HEALTH_INTERVAL_MS is not a number: {raw}"))
                })?;
                if ms < MIN_HEALTH_INTERVAL_MS {
                    return Err(GatewayError::Config(format!(
                        "SWITCHYARD_HEALTH_INTERVAL_MS must be >= {MIN_HEALTH_INTERVAL_MS}, got {ms}"
                    )));
                }
                ms
            }
            None => DEFAULT_HEALTH_INTERVAL_MS,
        };

        Ok(GatewayConfig {
            port,
            db_path,
            classifier_url: env_var("SWITCHYARD_CLASSIFIER_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            classifier_model: env_var("SWITCHYARD_CLASSIFIER_MODEL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
            health_interval_ms,
            api_key: env_var("SWITCHYARD_API_KEY"),
            anthropic_version: env_var("SWITCHYARD_ANTHROPIC_VERSION")
                .unwrap_or_else(|| "2023-06-01".to_string()),
        })
    }
}

/// Read an env var, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `~/.switchyard/router/router.db`, creating parent directories lazily at
/// open time (not here).
fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".switchyard")
        .join("router")
        .join("router.db")
}

/// Expand a leading `~` or `~/` to the user's home directory.
fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_default();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return dirs::home_dir().unwrap_or_default().join(rest);
    }
    PathBuf::from(raw)
}

// ── Tests ──────────────────────────────────────────────────────────────────
