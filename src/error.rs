// ── Switchyard: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the gateway, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Network, Routing…).
//   • The `#[from]` attribute wires std/external error conversions.
//   • Provider failures use the dedicated `ProviderError` below so the
//     dispatcher can classify them by status/message without downcasting.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Gateway configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication / authorization failure.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Request failed client-side validation.
    #[error("{0}")]
    Validation(String),

    /// Every routing tier came up empty, or all candidates failed.
    #[error("No available model")]
    NoAvailableModel,

    /// The selected backend produced zero chunks.
    #[error("Empty response from backend")]
    EmptyBackendResponse,

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for GatewayError {
    fn from(s: String) -> Self {
        GatewayError::Other(s)
    }
}

impl From<&str> for GatewayError {
    fn from(s: &str) -> Self {
        GatewayError::Other(s.to_string())
    }
}

/// All gateway operations should return this type.
pub type GatewayResult<T> = Result<T, GatewayError>;

// ── Provider errors ────────────────────────────────────────────────────────
// One outbound backend call can fail four materially different ways; the
// dispatcher's retry-and-persist logic keys off these variants plus the
// optional HTTP status, so the classification lives here rather than in
// string matching at the call site.

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Backend returned a non-2xx status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Backend returned 429 or an equivalent rate-limit signal.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// The request or stream timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection-level failure (refused, reset, DNS…).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The model record names a credential env var that is not set.
    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

impl ProviderError {
    /// HTTP status attached to this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Classify a reqwest error into timeout vs transport.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_connect() {
            ProviderError::Transport(format!("connection refused: {e}"))
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
