use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform::{self, PlatformPreference};
use crate::protocol::{StationInfo, StreamSource, Volume};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub social: SocialLinks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// `auto`, `web` or `native`.
    #[serde(default)]
    pub platform: PlatformPreference,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Used when no volume has been persisted yet.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

/// The one station this player is built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default = "default_tagline")]
    pub tagline: String,
    #[serde(default = "default_logo")]
    pub logo: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Shoutcast stats endpoint polled for now-playing data.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
}

/// External links by key (`facebook`, `instagram`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SocialLinks(BTreeMap<String, String>);

impl SocialLinks {
    pub fn new(links: BTreeMap<String, String>) -> Self {
        Self(links)
    }

    /// URL for `key`, or `None` for unknown keys.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Default for SocialLinks {
    fn default() -> Self {
        let links = [
            ("facebook", "https://www.facebook.com/Gabomanjarres"),
            ("instagram", "https://www.instagram.com/gabrielmanja/"),
            ("whatsapp", "https://wa.me/+573003819645"),
            ("tiktok", "https://www.tiktok.com"),
        ];
        Self(
            links
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl StationConfig {
    pub fn stream_source(&self) -> StreamSource {
        StreamSource::new(self.stream_url.clone())
    }

    pub fn info(&self) -> StationInfo {
        StationInfo {
            name: self.name.clone(),
            tagline: self.tagline.clone(),
            logo: self.logo.clone(),
        }
    }
}

impl PlayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn default_volume(&self) -> Volume {
        Volume::clamped(self.default_volume as i64)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            platform: PlatformPreference::default(),
            poll_interval_ms: default_poll_interval_ms(),
            default_volume: default_volume(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            tagline: default_tagline(),
            logo: default_logo(),
            stream_url: default_stream_url(),
            metadata_url: default_metadata_url(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_volume() -> u8 {
    80
}

fn default_station_name() -> String {
    "Undeco RadiOnline".to_string()
}

fn default_tagline() -> String {
    "Tu emisora de confianza".to_string()
}

fn default_logo() -> String {
    "assets/images/UNDECO_Radio_logo.png".to_string()
}

fn default_stream_url() -> String {
    "https://sp1.hostingclouds.net/8006/stream".to_string()
}

fn default_metadata_url() -> String {
    "https://sp1.hostingclouds.net/8006/stats?sid=1".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load `path`, writing a default config there first if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("config: writing defaults to {:?}", path);
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            http: HttpConfig::default(),
            player: PlayerConfig::default(),
            station: StationConfig::default(),
            social: SocialLinks::default(),
        }
    }
}
