use thiserror::Error;

/// Top-level error type for the `vigil-api` crate.
///
/// Covers every failure mode of the three HTTP surfaces the engine talks
/// to: the event stream, the capture-service control endpoint, and the
/// per-location resource endpoints. `vigil-core` folds these into its own
/// taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// The platform rejected the credentials (HTTP 401 / 403).
    #[error("Authorization failed (HTTP {status}): {message}")]
    Authorization { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request did not complete within the configured bound.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup error (unreadable or invalid CA certificate).
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-2xx response that is not an authorization failure.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Control plane / mutations ───────────────────────────────────
    /// The platform answered 2xx with `{"success": false}`.
    #[error("Request rejected by platform: {message}")]
    Rejected { message: String },

    // ── Stream ──────────────────────────────────────────────────────
    /// The event stream could not be read (I/O error mid-body, wrong
    /// content type, invalid UTF-8).
    #[error("Event stream error: {0}")]
    Stream(String),

    /// A stream block outgrew the decoder's buffer bound.
    #[error("Event stream block exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the failure requires new credentials rather than
    /// a retry.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_request(),
            Self::Timeout { .. } | Self::Stream(_) | Self::Rejected { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authorization { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_is_not_transient() {
        let err = Error::Authorization {
            status: 401,
            message: "bad key".into(),
        };
        assert!(err.is_authorization());
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = Error::Http {
            status: 503,
            message: "unavailable".into(),
        };
        let client = Error::Http {
            status: 404,
            message: "missing".into(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
    }
}
