//! Service configuration.
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file by `main`) plus an optional TOML file describing the camera
//! sources. Every knob has a default so the service starts with no
//! configuration at all.

mod sources;

pub use sources::{SourceEntry, SourcesFile};

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Default staleness threshold before an idle stream is reclaimed.
pub const DEFAULT_STALE_SECS: u64 = 120;

/// Default period of the stale sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default manifest poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default readiness timeout.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Default bound on reaping a killed transcoder.
pub const DEFAULT_TERMINATE_TIMEOUT_SECS: u64 = 5;

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8888,
        }
    }
}

/// Shape of the rolling-window HLS output produced by the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsSettings {
    /// Target duration of each segment in seconds.
    pub segment_secs: u32,
    /// Number of segments kept in the manifest (older ones are deleted).
    pub list_size: u32,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            segment_secs: 2,
            list_size: 3,
        }
    }
}

/// Settings consumed by the stream lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Root of the ephemeral output store.
    pub output_dir: PathBuf,
    /// Idle time after which a stream is reclaimed.
    pub stale_threshold: Duration,
    /// Period of the stale sweep.
    pub sweep_interval: Duration,
    /// Delay between manifest existence checks.
    pub poll_interval: Duration,
    /// Maximum wait for the manifest to appear.
    pub ready_timeout: Duration,
    /// Maximum wait for a killed transcoder to be reaped.
    pub terminate_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            stale_threshold: Duration::from_secs(DEFAULT_STALE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            terminate_timeout: Duration::from_secs(DEFAULT_TERMINATE_TIMEOUT_SECS),
        }
    }
}

impl StreamConfig {
    /// Reject combinations that would make the lifecycle misbehave.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("stale threshold", self.stale_threshold),
            ("sweep interval", self.sweep_interval),
            ("manifest poll interval", self.poll_interval),
            ("manifest readiness timeout", self.ready_timeout),
            ("terminate timeout", self.terminate_timeout),
        ];
        for (label, value) in durations {
            if value.is_zero() {
                return Err(Error::config(format!("{label} must be greater than zero")));
            }
        }

        // A start still in progress must never look idle to the sweeper.
        if self.ready_timeout >= self.stale_threshold {
            return Err(Error::config(format!(
                "manifest readiness timeout ({:?}) must be shorter than the stale threshold ({:?})",
                self.ready_timeout, self.stale_threshold
            )));
        }

        if self.poll_interval >= self.ready_timeout {
            return Err(Error::config(format!(
                "manifest poll interval ({:?}) must be shorter than the readiness timeout ({:?})",
                self.poll_interval, self.ready_timeout
            )));
        }

        Ok(())
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub hls: HlsSettings,
    /// Transcoder binary.
    pub ffmpeg_path: String,
    /// Optional TOML file describing camera sources.
    pub sources_file: Option<PathBuf>,
    /// Fallback source URL with a `{name}` placeholder.
    pub source_url_template: Option<String>,
    /// Directory for rotated log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            hls: HlsSettings::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            sources_file: None,
            source_url_template: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS`, `API_PORT`
    /// - `OUTPUT_DIR`
    /// - `STREAM_STALE_SECS`, `STREAM_SWEEP_INTERVAL_SECS`
    /// - `MANIFEST_POLL_INTERVAL_MS`, `MANIFEST_READY_TIMEOUT_SECS`
    /// - `TERMINATE_TIMEOUT_SECS`
    /// - `FFMPEG_PATH`, `HLS_SEGMENT_SECS`, `HLS_LIST_SIZE`
    /// - `SOURCES_FILE`, `SOURCE_URL_TEMPLATE`
    /// - `LOG_DIR`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = parse_var(&get, "API_PORT")? {
            config.server.port = port;
        }

        if let Some(dir) = get("OUTPUT_DIR") {
            config.stream.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_var(&get, "STREAM_STALE_SECS")? {
            config.stream.stale_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&get, "STREAM_SWEEP_INTERVAL_SECS")? {
            config.stream.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&get, "MANIFEST_POLL_INTERVAL_MS")? {
            config.stream.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&get, "MANIFEST_READY_TIMEOUT_SECS")? {
            config.stream.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&get, "TERMINATE_TIMEOUT_SECS")? {
            config.stream.terminate_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Some(secs) = parse_var(&get, "HLS_SEGMENT_SECS")? {
            config.hls.segment_secs = secs;
        }
        if let Some(size) = parse_var(&get, "HLS_LIST_SIZE")? {
            config.hls.list_size = size;
        }

        config.sources_file = get("SOURCES_FILE").map(PathBuf::from);
        config.source_url_template = get("SOURCE_URL_TEMPLATE");
        config.log_dir = get("LOG_DIR").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        if self.hls.segment_secs == 0 || self.hls.list_size == 0 {
            return Err(Error::config(
                "HLS segment duration and list size must be greater than zero",
            ));
        }
        if self.ffmpeg_path.trim().is_empty() {
            return Err(Error::config("FFMPEG_PATH must not be empty"));
        }
        Ok(())
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

/// Memory-backed location when available, to spare flash storage.
fn default_output_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm.join("camrelay")
    } else {
        std::env::temp_dir().join("camrelay")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.stream.stale_threshold, Duration::from_secs(120));
        assert_eq!(config.stream.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.hls, HlsSettings::default());
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert!(config.stream.output_dir.ends_with("camrelay"));
        assert!(config.sources_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("API_PORT", "9000"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("STREAM_STALE_SECS", "300"),
            ("MANIFEST_POLL_INTERVAL_MS", "5"),
            ("HLS_LIST_SIZE", "5"),
            ("SOURCE_URL_TEMPLATE", "http://{name}.lab:8080/?action=stream"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.stream.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.stream.stale_threshold, Duration::from_secs(300));
        assert_eq!(config.stream.poll_interval, Duration::from_millis(5));
        assert_eq!(config.hls.list_size, 5);
        assert!(config.source_url_template.is_some());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("API_PORT", "  "), ("FFMPEG_PATH", "")]).unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("STREAM_STALE_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("STREAM_STALE_SECS")));
    }

    #[test]
    fn test_readiness_timeout_must_undercut_threshold() {
        let err = load(&[
            ("STREAM_STALE_SECS", "10"),
            ("MANIFEST_READY_TIMEOUT_SECS", "10"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(load(&[("STREAM_SWEEP_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[("HLS_SEGMENT_SECS", "0")]).is_err());
    }
}
