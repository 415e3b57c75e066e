//! Configuration management for Acid Cam.
//!
//! Handles loading and saving user configuration to platform-standard config directories:
//! - Linux: `~/.config/acidcam/config.json`
//! - macOS: `~/Library/Application Support/acidcam/config.json`
//! - Windows: `%APPDATA%\acidcam\config.json`

use crate::encoder::OutputType;
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Could not determine user directories")]
    NoUserDirs,
    #[error("Unknown config key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("{0}")]
    Directory(String),
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Custom output directory. If None, uses system default (Videos folder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Codec/container used when none is given on the command line.
    #[serde(default)]
    pub output_type: OutputType,
}

/// Capture-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CaptureConfig {
    /// Camera index used when no input file is given.
    #[serde(default)]
    pub device: u32,
    /// Requested capture width, 0 for the source size.
    #[serde(default)]
    pub width: u32,
    /// Requested capture height, 0 for the source size.
    #[serde(default)]
    pub height: u32,
}

/// Effect configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectsConfig {
    /// Blend factor of the second pass, 0.0 disables it.
    #[serde(default = "default_pass2_alpha")]
    pub pass2_alpha: f32,
}

fn default_pass2_alpha() -> f32 {
    0.75
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            pass2_alpha: default_pass2_alpha(),
        }
    }
}

/// Audio-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AudioConfig {
    /// Copy the source file's audio into recordings.
    #[serde(default)]
    pub enabled: bool,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Keys accepted by [`AppConfig::set_value`].
pub const CONFIG_KEYS: [&str; 7] = [
    "output.directory",
    "output.output_type",
    "capture.device",
    "capture.width",
    "capture.height",
    "effects.pass2_alpha",
    "audio.enabled",
];

impl AppConfig {
    /// Set a value by dotted key, parsing it from a string.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "output.directory" => {
                self.output.directory = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "output.output_type" => {
                self.output.output_type = OutputType::parse(value).ok_or_else(invalid)?;
            }
            "capture.device" => self.capture.device = value.parse().map_err(|_| invalid())?,
            "capture.width" => self.capture.width = value.parse().map_err(|_| invalid())?,
            "capture.height" => self.capture.height = value.parse().map_err(|_| invalid())?,
            "effects.pass2_alpha" => {
                let alpha: f32 = value.parse().map_err(|_| invalid())?;
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(invalid());
                }
                self.effects.pass2_alpha = alpha;
            }
            "audio.enabled" => {
                self.audio.enabled = match value.to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => return Err(invalid()),
                };
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

/// Get the path to the config file.
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    let proj_dirs = ProjectDirs::from("", "", "acidcam").ok_or(ConfigError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> AppConfig {
    match get_config_path() {
        Ok(path) => load_config_from(&path),
        Err(e) => {
            warn!("[Config] {}", e);
            AppConfig::default()
        }
    }
}

/// Load configuration from a specific file, falling back to defaults.
pub fn load_config_from(config_path: &Path) -> AppConfig {
    if !config_path.exists() {
        debug!("[Config] No config file found, using defaults");
        return AppConfig::default();
    }

    match fs::read_to_string(config_path) {
        Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                debug!("[Config] Loaded config from {:?}", config_path);
                config
            }
            Err(e) => {
                warn!("[Config] Failed to parse config file: {}. Using defaults.", e);
                AppConfig::default()
            }
        },
        Err(e) => {
            warn!("[Config] Failed to read config file: {}. Using defaults.", e);
            AppConfig::default()
        }
    }
}

/// Save configuration to disk.
pub fn save_config(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    let path = get_config_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save configuration to a specific file, creating parent directories.
pub fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(config_path, json)?;
    info!("[Config] Saved config to {:?}", config_path);
    Ok(())
}

/// Get the default output directory (system Videos folder).
pub fn get_default_output_dir() -> Result<PathBuf, ConfigError> {
    let user_dirs = UserDirs::new().ok_or(ConfigError::NoUserDirs)?;

    // Try Videos directory first, fall back to home directory
    let output_dir = user_dirs
        .video_dir()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| {
            let home = user_dirs.home_dir().to_path_buf();
            let videos = home.join("Videos");
            if videos.is_dir() || fs::create_dir_all(&videos).is_ok() {
                videos
            } else {
                home
            }
        });

    Ok(output_dir)
}

/// Get the configured output directory, falling back to default if not set.
pub fn get_output_dir(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    match &config.output.directory {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => get_default_output_dir(),
    }
}

/// Validate that a directory exists and is writable.
pub fn validate_directory(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Directory(format!(
            "Directory does not exist: {}",
            path.display()
        )));
    }

    if !path.is_dir() {
        return Err(ConfigError::Directory(format!(
            "Path is not a directory: {}",
            path.display()
        )));
    }

    let test_file = path.join(".acidcam_write_test");
    match fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = fs::remove_file(test_file);
            Ok(())
        }
        Err(_) => Err(ConfigError::Directory(format!(
            "Directory is not writable: {}",
            path.display()
        ))),
    }
}
