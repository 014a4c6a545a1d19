//! Device configuration
//!
//! Loaded once at boot from a TOML file. Every field has a default, so a
//! missing file or a partial one is fine; secrets can also come from the
//! environment (`WIFI_SSID`, `WIFI_PASSWORD`, `SPOTIFY_CLIENT_ID`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::panel::{DisplayKind, TouchKind};

pub const CONFIG_ENV: &str = "SPOTIFY_CONTROLLER_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_SCOPES: &str = "user-read-playback-state user-modify-playback-state user-read-currently-playing user-read-playback-position user-library-read user-library-modify playlist-read-private playlist-read-collaborative";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub spotify: SpotifyConfig,
    pub app: AppConfig,
    pub display: DisplayConfig,
    /// File the values came from; `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// The host's own network stack.
    #[default]
    Host,
    /// In-process stand-in that "associates" after a fixed latency.
    Simulated,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    pub connect_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub access_point_name: String,
    pub driver: DriverKind,
    pub simulated_latency_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            connect_timeout_secs: 30,
            reconnect_interval_secs: 5,
            max_reconnect_attempts: 10,
            auto_reconnect: true,
            access_point_name: "Spotify-Controller".to_string(),
            driver: DriverKind::Host,
            simulated_latency_ms: 1500,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
    pub scopes: String,
    pub callback_port: u16,
    pub auth_timeout_secs: u64,
    pub auto_start_auth: bool,
    pub request_timeout_secs: u64,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authorize_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            api_base: "https://api.spotify.com/v1".to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
            callback_port: 8080,
            auth_timeout_secs: 300,
            auto_start_auth: true,
            request_timeout_secs: 10,
        }
    }
}

impl SpotifyConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tick_interval_ms: u64,
    pub error_retry_secs: u64,
    pub token_store: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            error_retry_secs: 30,
            token_store: PathBuf::from(".cache/tokens.json"),
            log_dir: PathBuf::from(".logs"),
        }
    }
}

impl AppConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        Duration::from_secs(self.error_retry_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub panel: DisplayKind,
    pub touch: TouchKind,
}

impl Config {
    /// Load from `$SPOTIFY_CONTROLLER_CONFIG` or `./config.toml`, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::from_file(&path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse `path`; a missing file yields the defaults. Runs before
    /// logging is up, so the outcome is recorded in `source` for the caller
    /// to report.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(ssid) = std::env::var("WIFI_SSID") {
            self.network.ssid = ssid;
        }
        if let Ok(password) = std::env::var("WIFI_PASSWORD") {
            self.network.password = password;
        }
        if let Ok(client_id) = std::env::var("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = client_id;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.connect_timeout_secs == 0 {
            return Err(Error::Config("network.connect_timeout_secs must be > 0".into()));
        }
        if self.spotify.auth_timeout_secs == 0 {
            return Err(Error::Config("spotify.auth_timeout_secs must be > 0".into()));
        }
        if self.app.tick_interval_ms == 0 {
            return Err(Error::Config("app.tick_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// True once a network to join has been configured.
    pub fn is_configured(&self) -> bool {
        !self.network.ssid.is_empty()
    }
}
