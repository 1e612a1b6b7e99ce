//! Configuration file support for trapcache.
//!
//! Settings are plain JSON so they can be exported, edited and re-imported.
//! Thresholds are always passed explicitly from here into the cache and the
//! difference engine; nothing reads them from global state.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    BITMAP_CACHE_SIZE, DARK_PIXEL_RATIO_DEFAULT, DARK_PIXEL_SAMPLE_STRIDE_DEFAULT,
    DARK_PIXEL_THRESHOLD_DEFAULT, DEFAULT_MAX_IN_FLIGHT_PREFETCHES, DEFAULT_PREFETCH_WORKERS,
    DIFFERENCE_THRESHOLD_DEFAULT, GREYSCALE_IMAGE_THRESHOLD, GREYSCALE_PIXEL_THRESHOLD,
};

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get all log levels for iteration.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]
    }

    /// Lowercase name, as written in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse a level name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(name))
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Bitmap cache and prefetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Number of decoded images kept in memory
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Background decode threads
    #[serde(default = "default_prefetch_workers")]
    pub prefetch_workers: usize,

    /// Background decodes allowed to be outstanding at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_prefetches: usize,
}

fn default_capacity() -> usize {
    BITMAP_CACHE_SIZE
}

fn default_prefetch_workers() -> usize {
    DEFAULT_PREFETCH_WORKERS
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT_PREFETCHES
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            prefetch_workers: default_prefetch_workers(),
            max_in_flight_prefetches: default_max_in_flight(),
        }
    }
}

impl CacheSettings {
    /// Capacity as a non-zero value, if valid.
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.capacity)
    }
}

/// Difference imaging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceSettings {
    /// Per-channel change required against both neighbors (exclusive)
    #[serde(default = "default_difference_threshold")]
    pub threshold: u8,
}

fn default_difference_threshold() -> u8 {
    DIFFERENCE_THRESHOLD_DEFAULT
}

impl Default for DifferenceSettings {
    fn default() -> Self {
        Self {
            threshold: default_difference_threshold(),
        }
    }
}

/// Dark image classification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarknessSettings {
    /// Luminosity at or below which a pixel is dark
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,

    /// Fraction of dark pixels at which the image is dark
    #[serde(default = "default_dark_ratio")]
    pub dark_ratio: f64,

    /// Examine every Nth pixel
    #[serde(default = "default_sample_stride")]
    pub sample_stride: usize,

    /// Channel spread still counted as grey
    #[serde(default = "default_greyscale_pixel_slop")]
    pub greyscale_pixel_slop: u32,

    /// Fraction of grey pixels for the image to count as greyscale
    #[serde(default = "default_greyscale_image_ratio")]
    pub greyscale_image_ratio: f64,
}

fn default_pixel_threshold() -> u8 {
    DARK_PIXEL_THRESHOLD_DEFAULT
}

fn default_dark_ratio() -> f64 {
    DARK_PIXEL_RATIO_DEFAULT
}

fn default_sample_stride() -> usize {
    DARK_PIXEL_SAMPLE_STRIDE_DEFAULT
}

fn default_greyscale_pixel_slop() -> u32 {
    GREYSCALE_PIXEL_THRESHOLD
}

fn default_greyscale_image_ratio() -> f64 {
    GREYSCALE_IMAGE_THRESHOLD
}

impl Default for DarknessSettings {
    fn default() -> Self {
        Self {
            pixel_threshold: default_pixel_threshold(),
            dark_ratio: default_dark_ratio(),
            sample_stride: default_sample_stride(),
            greyscale_pixel_slop: default_greyscale_pixel_slop(),
            greyscale_image_ratio: default_greyscale_image_ratio(),
        }
    }
}

/// Engine configuration that can be exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Version of the configuration file format
    pub version: u32,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub difference: DifferenceSettings,

    #[serde(default)]
    pub darkness: DarknessSettings,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            cache: CacheSettings::default(),
            difference: DifferenceSettings::default(),
            darkness: DarknessSettings::default(),
            log_level: LogLevel::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if self.cache.prefetch_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.prefetch_workers must be at least 1".to_string(),
            ));
        }
        if self.darkness.sample_stride == 0 {
            return Err(ConfigError::InvalidValue(
                "darkness.sample_stride must be at least 1".to_string(),
            ));
        }
        for (name, ratio) in [
            ("darkness.dark_ratio", self.darkness.dark_ratio),
            ("darkness.greyscale_image_ratio", self.darkness.greyscale_image_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be between 0 and 1, got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "trapcache-config.json"
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("trapcache").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("trapcache")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load_from_path(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save configuration to a file, creating parent directories as needed.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::new();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.cache.capacity, 9);
        assert_eq!(config.difference.threshold, 20);
        assert_eq!(config.darkness.pixel_threshold, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = CacheConfig::new();
        config.cache.capacity = 3;
        config.difference.threshold = 42;
        config.log_level = LogLevel::Debug;

        let json = config.to_json().unwrap();
        assert!(json.contains("\"debug\""));
        let parsed = CacheConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let parsed = CacheConfig::from_json(r#"{ "version": 1, "cache": { "capacity": 4 } }"#)
            .unwrap();
        assert_eq!(parsed.cache.capacity, 4);
        assert_eq!(parsed.cache.prefetch_workers, DEFAULT_PREFETCH_WORKERS);
        assert_eq!(parsed.difference, DifferenceSettings::default());
        assert_eq!(parsed.log_level, LogLevel::Info);
    }

    #[test]
    fn test_version_too_new() {
        let result = CacheConfig::from_json(r#"{ "version": 99 }"#);
        assert!(matches!(
            result,
            Err(ConfigError::VersionTooNew {
                file_version: 99,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_capacity = r#"{ "version": 1, "cache": { "capacity": 0 } }"#;
        assert!(matches!(
            CacheConfig::from_json(zero_capacity),
            Err(ConfigError::InvalidValue(_))
        ));

        let bad_ratio = r#"{ "version": 1, "darkness": { "dark_ratio": 1.5 } }"#;
        assert!(matches!(
            CacheConfig::from_json(bad_ratio),
            Err(ConfigError::InvalidValue(_))
        ));

        assert!(matches!(
            CacheConfig::from_json("not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = CacheConfig::new();
        config.darkness.sample_stride = 7;
        config.save_to_path(&path).unwrap();

        let loaded = CacheConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.darkness.sample_stride, 7);

        assert!(matches!(
            CacheConfig::load_from_path(&dir.path().join("absent.json")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Warn.to_level_filter(), log::LevelFilter::Warn);
        assert_eq!(LogLevel::default().to_level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_log_level_from_name() {
        for level in LogLevel::all() {
            assert_eq!(LogLevel::from_name(level.name()), Some(*level));
        }
        assert_eq!(LogLevel::from_name("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_name("verbose"), None);
    }
}
