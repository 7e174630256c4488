//! Profile configuration for vigil sync sessions.
//!
//! TOML profiles, credential resolution (env + secret store + plaintext),
//! and translation to `vigil_core::SyncConfig`. The core never reads
//! disk or the keyring itself; this crate is one way to feed it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use vigil_core::{AuthCredentials, BackoffPolicy, PollerConfig, Scope, SyncConfig, TlsVerification};

const KEYRING_SERVICE: &str = "vigil";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults, overridable per profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named platform profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Tuning shared by every profile. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// Bound on each capture-service control call.
    #[serde(default = "default_control_timeout")]
    pub control_timeout: u64,

    #[serde(default = "default_control_attempts")]
    pub control_max_attempts: u32,

    #[serde(default = "default_poll_min")]
    pub poll_min_interval: u64,

    #[serde(default = "default_poll_max")]
    pub poll_max_interval: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// How long a pushed state outranks a poll that cannot prove it is
    /// newer.
    #[serde(default = "default_push_window")]
    pub push_priority_window: u64,

    /// Quiet period before a reconciler-requested refetch.
    #[serde(default = "default_refresh_delay")]
    pub deferred_refresh_delay: u64,

    /// First live stream reconnect delay.
    #[serde(default = "default_stream_base")]
    pub stream_backoff_base: u64,

    #[serde(default = "default_stream_cap")]
    pub stream_backoff_cap: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            control_timeout: default_control_timeout(),
            control_max_attempts: default_control_attempts(),
            poll_min_interval: default_poll_min(),
            poll_max_interval: default_poll_max(),
            cache_ttl: default_cache_ttl(),
            dedup_window: default_dedup_window(),
            push_priority_window: default_push_window(),
            deferred_refresh_delay: default_refresh_delay(),
            stream_backoff_base: default_stream_base(),
            stream_backoff_cap: default_stream_cap(),
        }
    }
}

fn default_control_timeout() -> u64 {
    SyncConfig::DEFAULT_CONTROL_TIMEOUT.as_secs()
}
fn default_control_attempts() -> u32 {
    SyncConfig::DEFAULT_CONTROL_MAX_ATTEMPTS
}
fn default_poll_min() -> u64 {
    PollerConfig::default().min_interval.as_secs()
}
fn default_poll_max() -> u64 {
    PollerConfig::default().max_interval.as_secs()
}
fn default_cache_ttl() -> u64 {
    SyncConfig::DEFAULT_CACHE_TTL.as_secs()
}
fn default_dedup_window() -> usize {
    SyncConfig::DEFAULT_DEDUP_WINDOW
}
fn default_push_window() -> u64 {
    SyncConfig::DEFAULT_PUSH_PRIORITY_WINDOW.as_secs()
}
fn default_refresh_delay() -> u64 {
    SyncConfig::DEFAULT_DEFERRED_REFRESH_DELAY.as_secs()
}
fn default_stream_base() -> u64 {
    BackoffPolicy::streaming().base.as_secs()
}
fn default_stream_cap() -> u64 {
    BackoffPolicy::streaming().cap.as_secs()
}

/// A named platform profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Platform base URL (e.g. "https://platform.example.com").
    pub url: String,

    pub organization_id: String,

    /// Location selected at session start.
    pub location_id: String,

    /// API key in plaintext. Prefer the keyring or `api_key_env`.
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Override `defaults.control_timeout`.
    pub control_timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "vigil", "vigil").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vigil");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `VIGIL_`-prefixed environment. A missing file
/// yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VIGIL_").split("__"))
        .extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret storage ──────────────────────────────────────────────────

/// Where API keys live outside the config file.
pub trait SecretStore {
    /// `Ok(None)` when nothing is stored for the profile.
    fn api_key(&self, profile_name: &str) -> Result<Option<SecretString>, ConfigError>;

    fn set_api_key(&self, profile_name: &str, key: &str) -> Result<(), ConfigError>;
}

/// The OS keyring, entries named `vigil` / `{profile}/api-key`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key"))
            .map_err(|e| ConfigError::SecretStore(e.to_string()))
    }
}

impl SecretStore for KeyringStore {
    fn api_key(&self, profile_name: &str) -> Result<Option<SecretString>, ConfigError> {
        match Self::entry(profile_name)?.get_password() {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ConfigError::SecretStore(e.to_string())),
        }
    }

    fn set_api_key(&self, profile_name: &str, key: &str) -> Result<(), ConfigError> {
        Self::entry(profile_name)?
            .set_password(key)
            .map_err(|e| ConfigError::SecretStore(e.to_string()))
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve an API key: `api_key_env` variable, then the secret store,
/// then plaintext in the profile.
pub fn resolve_api_key(
    profile: &Profile,
    profile_name: &str,
    store: &impl SecretStore,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
        debug!(variable = %env_name, "api key variable not set");
    }

    // 2. Secret store; an unavailable backend falls through
    match store.api_key(profile_name) {
        Ok(Some(secret)) => return Ok(secret),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "secret store unavailable"),
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        warn!(profile = profile_name, "using plaintext api key from config file");
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Build a `SyncConfig` from a profile and the global defaults.
pub fn profile_to_sync_config(
    config: &Config,
    profile_name: &str,
    store: &impl SecretStore,
) -> Result<SyncConfig, ConfigError> {
    let profile = config
        .profiles
        .get(profile_name)
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: profile_name.into(),
        })?;
    let defaults = &config.defaults;

    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;
    if profile.organization_id.is_empty() || profile.location_id.is_empty() {
        return Err(ConfigError::Validation {
            field: "scope".into(),
            reason: "organization_id and location_id must be set".into(),
        });
    }
    if defaults.poll_min_interval == 0 || defaults.poll_min_interval > defaults.poll_max_interval {
        return Err(ConfigError::Validation {
            field: "poll_min_interval".into(),
            reason: format!(
                "expected 0 < min <= max, got {}..{}",
                defaults.poll_min_interval, defaults.poll_max_interval
            ),
        });
    }

    let (base, cap) = (defaults.stream_backoff_base, defaults.stream_backoff_cap);
    if base == 0 || base > cap {
        return Err(ConfigError::Validation {
            field: "stream_backoff_base".into(),
            reason: format!("expected 0 < base <= cap, got {base}..{cap}"),
        });
    }

    let api_key = resolve_api_key(profile, profile_name, store)?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut sync = SyncConfig::new(
        url,
        AuthCredentials::new(api_key),
        Scope::new(&profile.organization_id, &profile.location_id),
    );
    sync.tls = tls;
    sync.control_timeout =
        Duration::from_secs(profile.control_timeout.unwrap_or(defaults.control_timeout));
    sync.control_max_attempts = defaults.control_max_attempts.max(1);
    sync.poll = PollerConfig {
        min_interval: Duration::from_secs(defaults.poll_min_interval),
        max_interval: Duration::from_secs(defaults.poll_max_interval),
    };
    sync.cache_ttl = Duration::from_secs(defaults.cache_ttl);
    sync.dedup_window = defaults.dedup_window.max(1);
    sync.control_backoff = BackoffPolicy::control_plane();
    sync.stream_backoff = BackoffPolicy::new(Duration::from_secs(base), Duration::from_secs(cap));
    sync.push_priority_window = Duration::from_secs(defaults.push_priority_window);
    sync.deferred_refresh_delay = Duration::from_secs(defaults.deferred_refresh_delay);
    Ok(sync)
}
