use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Relative paths resolve against the working directory.
    #[serde(default = "default_photo_dir")]
    pub photo_dir: PathBuf,
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_spin_timeout_ms")]
    pub spin_timeout_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            photo_dir: default_photo_dir(),
            window_title: default_window_title(),
            spin_timeout_ms: default_spin_timeout_ms(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    pub fn spin_timeout(&self) -> Duration {
        Duration::from_millis(self.spin_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::ReadFile(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            result => result,
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if !(1..=100).contains(&config.capture.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "capture.jpeg_quality must be within 1..=100, got {}",
                config.capture.jpeg_quality
            )));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_brokers() -> String {
    "localhost:9092".into()
}
fn default_topic() -> String {
    "camera.image_color".into()
}
fn default_group_id() -> String {
    "image-capture-node".into()
}
fn default_photo_dir() -> PathBuf {
    PathBuf::from("photos")
}
fn default_window_title() -> String {
    "Camera Feed - Press SPACE to capture, ESC to exit".into()
}
fn default_spin_timeout_ms() -> u64 {
    100
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_log_level() -> String {
    "info".into()
}
