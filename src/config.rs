use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cursor: CursorConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default = "default_locale")]
    pub default_locale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Cursors created by the engine round-trip one item at a time.
    #[serde(default)]
    pub shared: bool,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            shared: false,
        }
    }
}

impl CursorConfig {
    pub fn batch_size(&self) -> usize {
        clamp_batch_size(self.default_batch_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period", with = "duration_ms")]
    pub grace_period: Duration,

    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout", with = "duration_ms")]
    pub timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("cortex-expressions/{}", env!("CARGO_PKG_VERSION"))
}

fn default_locale() -> String {
    "en_US".to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cursor: CursorConfig::default(),
            shutdown: ShutdownConfig::default(),
            http: HttpConfig::default(),
            default_locale: default_locale(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &str) -> InternalResult<Self> {
        from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = from_str("{}").unwrap();
        assert_eq!(config.cursor.default_batch_size, 100);
        assert!(!config.cursor.shared);
        assert_eq!(config.shutdown.poll_interval, Duration::from_millis(250));
        assert_eq!(config.default_locale, "en_US");
    }

    #[test]
    fn test_durations_in_millis() {
        let config: EngineConfig =
            from_str(r#"{"shutdown": {"grace_period": 1500, "poll_interval": 10}}"#).unwrap();
        assert_eq!(config.shutdown.grace_period, Duration::from_millis(1500));
        assert_eq!(config.shutdown.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_batch_size_clamped() {
        let config: EngineConfig = from_str(r#"{"cursor": {"default_batch_size": 0}}"#).unwrap();
        assert_eq!(config.cursor.batch_size(), 1);
        assert_eq!(clamp_batch_size(1000), 100);
    }
}
