// Client configuration.
//
// File: `~/.quill/config.toml`
// Env overrides: `QUILL_SERVER_URL` (the access token override lives in
// `credentials`).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quill_common::types::CurrentUser;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::SessionOptions;
use crate::transport::stomp_ws::StompOptions;

pub const SERVER_URL_ENV: &str = "QUILL_SERVER_URL";
pub const PROBE_PATH: &str = "/api/ws/document/info";

/// Root directory for Quill client state: `~/.quill/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".quill"))
}

/// Path to the config file: `~/.quill/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuillConfig {
    /// Base URL of the Quill server (e.g. `https://quill.example.com`).
    pub server_url: String,
    /// Who this client joins documents as.
    pub identity: IdentityConfig,
    pub presence: PresenceSettings,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            identity: IdentityConfig::default(),
            presence: PresenceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl IdentityConfig {
    /// Complete identity, or `None` if any field is missing.
    pub fn current_user(&self) -> Option<CurrentUser> {
        match (self.user_id, &self.name, &self.email) {
            (Some(id), Some(name), Some(email)) => Some(CurrentUser::new(id, name, email)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSettings {
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Outgoing STOMP heart-beat interval (0 = disabled).
    pub heartbeat_ms: u64,
    /// Heart-beat interval asked of the server; silence for twice the
    /// negotiated interval drops the connection (0 = disabled).
    pub incoming_heartbeat_ms: u64,
    pub app_prefix: String,
    pub topic_prefix: String,
    pub endpoint_path: String,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 10_000,
            heartbeat_ms: 10_000,
            incoming_heartbeat_ms: 10_000,
            app_prefix: "/app".into(),
            topic_prefix: "/topic".into(),
            endpoint_path: "/ws/presence".into(),
        }
    }
}

impl QuillConfig {
    /// Load `~/.quill/config.toml` with env overrides applied. A missing
    /// file yields defaults; an unreadable or invalid one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides(|key| std::env::var(key)))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to `~/.quill/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(server_url) = env(SERVER_URL_ENV) {
            if !server_url.trim().is_empty() {
                self.server_url = server_url.trim().to_string();
            }
        }
        self
    }

    /// Web-socket presence endpoint, with the access token as a query
    /// parameter when one is given.
    pub fn presence_url(&self, token: Option<&str>) -> Result<Url, ConfigError> {
        let mut url = self.server_base()?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|()| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        url.set_path(&join_path(url.path(), &self.presence.endpoint_path));
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    /// URL of the handshake-info endpoint probed before connecting.
    pub fn probe_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.server_base()?;
        let scheme = match url.scheme() {
            "wss" | "https" => "https",
            _ => "http",
        };
        url.set_scheme(scheme).map_err(|()| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        url.set_path(&join_path(url.path(), PROBE_PATH));
        Ok(url)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions { reconnect_delay: Duration::from_millis(self.presence.reconnect_delay_ms) }
    }

    pub fn stomp_options(&self) -> StompOptions {
        StompOptions {
            app_prefix: self.presence.app_prefix.clone(),
            topic_prefix: self.presence.topic_prefix.clone(),
            connect_timeout: Duration::from_millis(self.presence.connect_timeout_ms),
            heartbeat: Duration::from_millis(self.presence.heartbeat_ms),
            incoming_heartbeat: Duration::from_millis(self.presence.incoming_heartbeat_ms),
        }
    }

    /// Parsed server URL. Plain-text schemes are allowed only for loopback
    /// hosts.
    fn server_base(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url).map_err(|error| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: error.to_string(),
        })?;
        match url.scheme() {
            "https" | "wss" => Ok(url),
            "http" | "ws" if is_loopback_host(url.host_str()) => Ok(url),
            "http" | "ws" => Err(ConfigError::InsecureScheme(self.server_url.clone())),
            other => Err(ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                reason: format!("unsupported scheme `{other}`"),
            }),
        }
    }
}

fn join_path(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("invalid server_url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("server_url `{0}` must use https (http is allowed only for localhost)")]
    InsecureScheme(String),
}
