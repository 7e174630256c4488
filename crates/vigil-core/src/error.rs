// ── Core error types ──
//
// Engine-facing errors. Consumers never see HTTP status codes or raw
// reqwest failures; `From<vigil_api::Error>` folds the transport layer
// into the recovery taxonomy the engine acts on.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Recoverable ──────────────────────────────────────────────────
    /// Network-level failure worth retrying with backoff.
    #[error("Network error: {message}")]
    TransientNetwork { message: String },

    /// A single frame or payload could not be decoded. The stream continues.
    #[error("Protocol parse error: {message}")]
    ProtocolParse { message: String },

    /// A late result belonging to a scope that has since been replaced.
    #[error("Result for location {stale} discarded (active location is {active})")]
    ScopeMismatch { stale: String, active: String },

    // ── Terminal ─────────────────────────────────────────────────────
    /// Credentials were rejected. No automatic retry.
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    /// The capture service could not be started within the attempt budget.
    #[error("Capture service unavailable after {attempts} attempts: {message}")]
    ServiceUnavailable { attempts: u32, message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation rejected by platform: {message}")]
    Rejected { message: String },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` for failures the stream and pollers absorb locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. } | Self::ProtocolParse { .. }
        )
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<vigil_api::Error> for CoreError {
    fn from(err: vigil_api::Error) -> Self {
        match err {
            vigil_api::Error::Authorization { status, message } => CoreError::Authorization {
                message: format!("HTTP {status}: {message}"),
            },
            vigil_api::Error::Transport(e) => CoreError::TransientNetwork {
                message: e.to_string(),
            },
            vigil_api::Error::Timeout { timeout_secs } => CoreError::TransientNetwork {
                message: format!("request timed out after {timeout_secs}s"),
            },
            vigil_api::Error::Stream(message) => CoreError::TransientNetwork { message },
            vigil_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            vigil_api::Error::Tls(message) => CoreError::Config {
                message: format!("TLS error: {message}"),
            },
            vigil_api::Error::Http { status: 404, message } => CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: message,
            },
            vigil_api::Error::Http { status, message } => {
                if status >= 500 || status == 408 || status == 429 {
                    CoreError::TransientNetwork {
                        message: format!("HTTP {status}: {message}"),
                    }
                } else {
                    CoreError::Api { status, message }
                }
            }
            vigil_api::Error::Rejected { message } => CoreError::Rejected { message },
            vigil_api::Error::Deserialization { message, body: _ } => {
                CoreError::ProtocolParse { message }
            }
            e @ vigil_api::Error::FrameTooLarge { .. } => CoreError::ProtocolParse {
                message: e.to_string(),
            },
        }
    }
}
