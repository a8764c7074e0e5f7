//! Process-wide configuration, loaded once at startup and never mutated.
//!
//! Mirrors the single-TOML-document convention used for relay/server
//! binaries in this ecosystem: one struct, `Default` everywhere, CLI flags
//! and a handful of env vars override the file.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "streamtv", version, about = "Virtual cable head-end: schedules internet-hosted media into 24/7 IPTV channels")]
pub struct Cli {
    /// Path to the TOML configuration file. Missing is not fatal.
    #[arg(long, env = "STREAMTV_CONFIG", default_value = "./streamtv.toml")]
    pub config: PathBuf,

    /// Override database.path from the config file.
    #[arg(long, env = "STREAMTV_DB_PATH")]
    pub db: Option<PathBuf>,

    /// Override server.host.
    #[arg(long, env = "STREAMTV_HOST")]
    pub host: Option<IpAddr>,

    /// Override server.port.
    #[arg(long, env = "STREAMTV_PORT")]
    pub port: Option<u16>,

    /// Override schedule.schedules_dir.
    #[arg(long, env = "STREAMTV_SCHEDULES_DIR")]
    pub schedules_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_key_required: bool,
    pub access_token: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_required: false,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdhrConfig {
    pub enabled: bool,
    pub device_id: String,
    pub friendly_name: String,
    pub tuner_count: u32,
    pub enable_ssdp: bool,
}

impl Default for HdhrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_id: "STREAMTV0001".to_string(),
            friendly_name: "StreamTV".to_string(),
            tuner_count: 4,
            enable_ssdp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    /// EPG build horizon, in days.
    pub build_days: u32,
    /// Maximum concurrent FFmpeg child processes across all channels.
    pub max_concurrent_ffmpeg: usize,
    /// Maximum playout items expanded per schedule walk.
    pub max_items: usize,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            build_days: 1,
            max_concurrent_ffmpeg: 8,
            max_items: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub log_level: String,
    pub threads: Option<u32>,
    pub hwaccel: Option<String>,
    pub hwaccel_device: Option<String>,
    pub youtube_hwaccel: Option<String>,
    pub youtube_video_encoder: Option<String>,
    pub archive_org_hwaccel: Option<String>,
    pub archive_org_video_encoder: Option<String>,
    pub pbs_hwaccel: Option<String>,
    pub pbs_video_encoder: Option<String>,
    pub plex_hwaccel: Option<String>,
    pub plex_video_encoder: Option<String>,
    pub extra_flags: Option<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            log_level: "warning".to_string(),
            threads: None,
            hwaccel: None,
            hwaccel_device: None,
            youtube_hwaccel: None,
            youtube_video_encoder: None,
            archive_org_hwaccel: None,
            archive_org_video_encoder: None,
            pbs_hwaccel: None,
            pbs_video_encoder: None,
            plex_hwaccel: None,
            plex_video_encoder: None,
            extra_flags: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ArchiveOrgConfig {
    pub use_authentication: bool,
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct YoutubeConfig {
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlexConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub use_for_epg: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub schedules_dir: PathBuf,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedules_dir: PathBuf::from("./schedules"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub hdhr: HdhrConfig,
    pub playout: PlayoutConfig,
    pub ffmpeg: FfmpegConfig,
    pub archive_org: ArchiveOrgConfig,
    pub youtube: YoutubeConfig,
    pub plex: PlexConfig,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load from `path` if it exists, else fall back to all defaults.
    /// An unparsable file (present but invalid TOML) is an error; a
    /// missing file is not.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Self::default()
        };
        config.normalize();
        Ok(config)
    }

    /// Apply CLI-flag / env-var overrides on top of the loaded file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(db) = &cli.db {
            self.database.path = Some(db.clone());
        }
        if let Some(host) = cli.host {
            self.server.host = host;
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(dir) = &cli.schedules_dir {
            self.schedule.schedules_dir = dir.clone();
        }
    }

    fn normalize(&mut self) {
        if self.playout.max_items == 0 {
            self.playout.max_items = 1000;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file '{0}': {1}")]
    Read(PathBuf, std::io::Error),
    #[error("cannot parse config file '{0}': {1}")]
    Parse(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.playout.build_days, 1);
        assert_eq!(config.playout.max_items, 1000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/streamtv.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn parses_partial_toml_with_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamtv.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.hdhr.tuner_count, 4);
    }
}
