// Shared transport configuration for building reqwest::Client instances.
//
// Control and resource calls run under a hard request timeout. The event
// stream is a long-lived body, so its client only bounds connection
// setup and relies on the transport's own error signalling afterwards.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::Error;

const USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (lab and staging backends only).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Whole-request bound for control and resource calls.
    pub timeout: Duration,
    /// Connection-setup bound, applied to every client including the stream.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(12),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build the request/response client (bounded by `timeout`).
    pub fn build_client(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        self.builder(headers)?
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build the streaming client. No whole-request timeout: a healthy
    /// stream stays open for the life of the session.
    pub fn build_stream_client(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        self.builder(headers)?
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Tls(format!("failed to build stream client: {e}")))
    }

    fn builder(&self, headers: HeaderMap) -> Result<reqwest::ClientBuilder, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                builder = builder.add_root_certificate(load_ca(path)?);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(builder)
    }
}

fn load_ca(path: &std::path::Path) -> Result<reqwest::Certificate, Error> {
    let pem = std::fs::read(path).map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
    reqwest::Certificate::from_pem(&pem).map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))
}
