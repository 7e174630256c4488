// ── Runtime sync configuration ──
//
// Describes *where* to connect and how the engine paces itself. Carries
// credential data but never touches disk; `vigil-config` (or any other
// secret store) builds a `SyncConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::poller::PollerConfig;

/// Platform credentials. The key is only ever held as a [`SecretString`].
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub api_key: SecretString,
}

impl AuthCredentials {
    pub fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }
}

/// Organization and location that select which entities and streams are
/// relevant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub organization_id: String,
    pub location_id: String,
}

impl Scope {
    pub fn new(organization_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            location_id: location_id.into(),
        }
    }

    /// Same organization, different location.
    pub fn with_location(&self, location_id: impl Into<String>) -> Self {
        Self {
            organization_id: self.organization_id.clone(),
            location_id: location_id.into(),
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    SystemDefaults,
    CustomCa(PathBuf),
    /// Skip verification. Staging backends with self-signed certificates only.
    DangerAcceptInvalid,
}

/// Everything a [`SyncSession`](crate::SyncSession) needs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Platform base URL (e.g. `https://platform.example.com`).
    pub url: Url,
    pub auth: AuthCredentials,
    /// Initial scope; replaced by `switch_scope`.
    pub scope: Scope,
    pub tls: TlsVerification,
    /// Bound on each capture-service status/start/stop call.
    pub control_timeout: Duration,
    pub control_max_attempts: u32,
    pub control_backoff: BackoffPolicy,
    pub stream_backoff: BackoffPolicy,
    pub poll: PollerConfig,
    pub cache_ttl: Duration,
    /// Number of recent event ids remembered for deduplication.
    pub dedup_window: usize,
    /// How long a pushed update outranks a poll carrying an equal or
    /// missing timestamp.
    pub push_priority_window: Duration,
    /// Delay before a refresh requested because zone membership was unknown.
    pub deferred_refresh_delay: Duration,
}

impl SyncConfig {
    pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(12);
    pub const DEFAULT_CONTROL_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
    pub const DEFAULT_DEDUP_WINDOW: usize = 512;
    pub const DEFAULT_PUSH_PRIORITY_WINDOW: Duration = Duration::from_secs(30);
    pub const DEFAULT_DEFERRED_REFRESH_DELAY: Duration = Duration::from_secs(2);

    /// Configuration with every tuning knob at its default.
    pub fn new(url: Url, auth: AuthCredentials, scope: Scope) -> Self {
        Self {
            url,
            auth,
            scope,
            tls: TlsVerification::default(),
            control_timeout: Self::DEFAULT_CONTROL_TIMEOUT,
            control_max_attempts: Self::DEFAULT_CONTROL_MAX_ATTEMPTS,
            control_backoff: BackoffPolicy::control_plane(),
            stream_backoff: BackoffPolicy::streaming(),
            poll: PollerConfig::default(),
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            dedup_window: Self::DEFAULT_DEDUP_WINDOW,
            push_priority_window: Self::DEFAULT_PUSH_PRIORITY_WINDOW,
            deferred_refresh_delay: Self::DEFAULT_DEFERRED_REFRESH_DELAY,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_profiles() {
        let config = SyncConfig::new(
            "https://platform.example.com".parse().unwrap(),
            AuthCredentials::new(SecretString::from("k".to_string())),
            Scope::new("org", "loc"),
        );
        assert_eq!(config.control_timeout, Duration::from_secs(12));
        assert_eq!(config.control_backoff.cap, Duration::from_secs(10));
        assert_eq!(config.stream_backoff.cap, Duration::from_secs(30));
        assert_eq!(config.poll.min_interval, Duration::from_secs(5));
        assert_eq!(config.poll.max_interval, Duration::from_secs(30));
        assert_eq!(config.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn with_location_keeps_organization() {
        let scope = Scope::new("org-1", "loc-1").with_location("loc-2");
        assert_eq!(scope, Scope::new("org-1", "loc-2"));
    }
}
