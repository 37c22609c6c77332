use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::telemetry::{DEFAULT_BATCH_SIZE, DEFAULT_SAMPLE_INTERVAL};
use crate::transport::TransportConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub transport: TransportSettings,
    pub position: PositionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub ws_url: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_request_timeout", deserialize_with = "duration")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_folder: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_sample_interval", deserialize_with = "duration")]
    pub sample_interval: Duration,
    #[serde(default = "default_batch_size")]
    pub replay_batch_size: usize,
    #[serde(default = "default_room_scope")]
    pub room_scope: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            replay_batch_size: default_batch_size(),
            room_scope: default_room_scope(),
        }
    }
}

fn default_sample_interval() -> Duration {
    DEFAULT_SAMPLE_INTERVAL
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_room_scope() -> String {
    "course".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay", deserialize_with = "duration")]
    pub reconnect_delay: Duration,
    #[serde(default = "default_connect_timeout", deserialize_with = "duration")]
    pub connect_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay: default_reconnect_delay(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    TransportConfig::default().reconnect_attempts
}

fn default_reconnect_delay() -> Duration {
    TransportConfig::default().reconnect_delay
}

fn default_connect_timeout() -> Duration {
    TransportConfig::default().connect_timeout
}

impl From<&TransportSettings> for TransportConfig {
    fn from(settings: &TransportSettings) -> Self {
        TransportConfig {
            reconnect_attempts: settings.reconnect_attempts,
            reconnect_delay: settings.reconnect_delay,
            connect_timeout: settings.connect_timeout,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum PositionConfig {
    Gpsd {
        #[serde(default = "default_gpsd_address")]
        address: String,
        #[serde(default = "default_gpsd_timeout", deserialize_with = "duration")]
        timeout: Duration,
        /// Wait before reconnecting after the daemon goes away.
        #[serde(default = "default_gpsd_retry_delay", deserialize_with = "duration")]
        retry_delay: Duration,
    },
    Replay {
        path: PathBuf,
        #[serde(default = "default_replay_interval", deserialize_with = "duration")]
        interval: Duration,
    },
}

fn default_gpsd_address() -> String {
    "127.0.0.1:2947".to_string()
}

fn default_gpsd_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_gpsd_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_replay_interval() -> Duration {
    Duration::from_secs(1)
}

impl PositionConfig {
    /// A finished replay stays finished; only a live daemon is reopened.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            PositionConfig::Gpsd { retry_delay, .. } => Some(*retry_delay),
            PositionConfig::Replay { .. } => None,
        }
    }
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
api:
  base_url: https://api.example.com
  ws_url: wss://rt.example.com
  access_token: a
  refresh_token: r
storage:
  base_folder: /tmp/course-tracker
position:
  provider: gpsd
"#;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.api.request_timeout, Duration::from_secs(15));
        assert_eq!(config.telemetry.sample_interval, Duration::from_secs(5));
        assert_eq!(config.telemetry.replay_batch_size, 2_000);
        assert_eq!(config.telemetry.room_scope, "course");
        assert_eq!(config.transport.reconnect_attempts, 10);
        assert_eq!(config.transport.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.position.retry_delay(), Some(Duration::from_secs(5)));
        match config.position {
            PositionConfig::Gpsd {
                address, timeout, ..
            } => {
                assert_eq!(address, "127.0.0.1:2947");
                assert_eq!(timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_humantime_durations_and_replay_provider() {
        let yaml = r#"
api:
  base_url: http://localhost:3000
  ws_url: ws://localhost:3001
  access_token: a
  refresh_token: r
  request_timeout: 2s 500ms
storage:
  base_folder: ./data
telemetry:
  sample_interval: 10s
  room_scope: event
transport:
  reconnect_attempts: 3
  reconnect_delay: 1m
position:
  provider: replay
  path: walk.jsonl
  interval: 250ms
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.api.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.telemetry.sample_interval, Duration::from_secs(10));
        assert_eq!(config.telemetry.replay_batch_size, 2_000);
        assert_eq!(config.telemetry.room_scope, "event");

        let transport = TransportConfig::from(&config.transport);
        assert_eq!(transport.reconnect_attempts, 3);
        assert_eq!(transport.reconnect_delay, Duration::from_secs(60));
        assert_eq!(transport.connect_timeout, Duration::from_secs(10));

        assert_eq!(config.position.retry_delay(), None);
        match config.position {
            PositionConfig::Replay { path, interval } => {
                assert_eq!(path, PathBuf::from("walk.jsonl"));
                assert_eq!(interval, Duration::from_millis(250));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn gpsd_retry_delay_is_configurable() {
        let yaml = MINIMAL.replace("provider: gpsd", "provider: gpsd\n  retry_delay: 750ms");
        let config = Config::from_str(&yaml).unwrap();
        assert_eq!(config.position.retry_delay(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn rejects_bad_durations() {
        let yaml = MINIMAL.replace("provider: gpsd", "provider: gpsd\n  timeout: soon");
        assert!(matches!(Config::from_str(&yaml), Err(ConfigError::Yaml(_))));
    }
}
