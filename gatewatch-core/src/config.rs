use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub cooldown: CooldownConfig,
    pub registry: RegistryConfig,
    pub server: ServerConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    /// Square input edge the detector resizes frames to.
    pub input_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/scrfd_500m.onnx"),
            confidence_threshold: 0.5,
            input_size: 640,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/w600k_mbf.onnx"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Cosine similarity a match must strictly exceed.
    pub threshold: f32,
    /// Detection runs on frames where `frame_count % skip_frames == 0`.
    pub skip_frames: u64,
    /// Downscale factor applied to frames before detection (0.5 = half resolution).
    pub detection_scale: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            skip_frames: 5,
            detection_scale: 0.5,
        }
    }
}

/// Longest accepted cooldown, one week.
pub const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub unknown_secs: u64,
    pub known_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            unknown_secs: 10,
            known_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrySource {
    Directory,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub source: RegistrySource,
    pub faces_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: RegistrySource::Directory,
            faces_dir: PathBuf::from("faces"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Annotated frames are written here when set.
    pub preview_path: Option<PathBuf>,
    /// Write the preview every N frames.
    pub preview_every: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_path: None,
            preview_every: 5,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/gatewatch/gatewatch.toml (system-wide)
    /// 2. ~/.config/gatewatch/gatewatch.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        let system_config = Path::new("/etc/gatewatch/gatewatch.toml");
        if system_config.exists() {
            log::debug!("Using system config {}", system_config.display());
            return Self::load_from(system_config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("gatewatch")
                .join("gatewatch.toml");
            if user_config.exists() {
                log::debug!("Using user config {}", user_config.display());
                return Self::load_from(&user_config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a specific file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions must be non-zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.detection.input_size < 32 || self.detection.input_size % 32 != 0 {
            return Err(ConfigError::Validation(
                "Detection input size must be a multiple of 32 (at least 32)".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::Validation(
                "Matching threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.matching.skip_frames == 0 {
            return Err(ConfigError::Validation(
                "Frame sampling stride must be greater than 0".to_string(),
            ));
        }

        if !(self.matching.detection_scale > 0.0 && self.matching.detection_scale <= 1.0) {
            return Err(ConfigError::Validation(
                "Detection scale must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.server.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Server URL cannot be empty".to_string(),
            ));
        }

        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Server timeout must be greater than 0".to_string(),
            ));
        }

        for (name, secs) in [
            ("unknown_secs", self.cooldown.unknown_secs),
            ("known_secs", self.cooldown.known_secs),
        ] {
            if secs > MAX_COOLDOWN_SECS {
                return Err(ConfigError::Validation(format!(
                    "Cooldown {} must be at most {} seconds, got {}",
                    name, MAX_COOLDOWN_SECS, secs
                )));
            }
        }

        if self.display.preview_every == 0 {
            return Err(ConfigError::Validation(
                "Preview interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
