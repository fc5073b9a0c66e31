// Configuration management for Slitcam

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable enabling the fake button backend ("1" = on)
pub const ENV_FAKE_GPIO: &str = "SLITCAM_FAKE_GPIO";
/// Environment variable overriding the storage directory (skips USB discovery)
pub const ENV_STORAGE_DIR: &str = "SLITCAM_STORAGE_DIR";
/// Environment variable with extra arguments for the capture tool
pub const ENV_CAMERA_ARGS: &str = "SLITCAM_CAMERA_ARGS";
/// Environment variable pointing at an alternative config file
pub const ENV_CONFIG: &str = "SLITCAM_CONFIG";

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub button: ButtonConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Where recordings go
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory created on the USB drive to hold recordings
    #[serde(default = "default_recordings_subdir")]
    pub recordings_subdir: String,

    /// Volume label prefixes that win when several drives are mounted
    #[serde(default = "default_label_prefixes")]
    pub preferred_label_prefixes: Vec<String>,

    /// Fixed storage directory; bypasses device discovery entirely
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_subdir: default_recordings_subdir(),
            preferred_label_prefixes: default_label_prefixes(),
            storage_dir: None,
        }
    }
}

/// Latching button wiring
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ButtonConfig {
    /// GPIO pin (BCM numbering)
    #[serde(default = "default_button_pin")]
    pub pin: u32,

    /// Pull-up wiring: the switch pulls the line low when ON
    #[serde(default = "default_true")]
    pub pull_up: bool,

    /// Debounce window in milliseconds
    #[serde(default = "default_bounce_ms")]
    pub bounce_ms: u64,

    /// Poll loop interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Use the fake (never pressed) line instead of real GPIO
    #[serde(default)]
    pub fake: bool,

    /// sysfs number of BCM GPIO 0; detected from gpiochip bases when unset
    #[serde(default)]
    pub gpio_base: Option<u32>,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: default_button_pin(),
            pull_up: true,
            bounce_ms: default_bounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            fake: false,
            gpio_base: None,
        }
    }
}

/// Capture and conversion tools
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Capture binaries in order of preference
    #[serde(default = "default_capture_tools")]
    pub tools: Vec<String>,

    /// Remux binary
    #[serde(default = "default_convert_tool")]
    pub convert_tool: String,

    /// Capture frame rate, also passed to the remux as a rate hint
    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Extra capture arguments (shell syntax), appended after the required flags
    #[serde(default)]
    pub extra_args: Option<String>,

    /// Wait per shutdown tier (interrupt, terminate) in milliseconds
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Remove the .h264 once the .mp4 has been written
    #[serde(default)]
    pub delete_source_after_convert: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tools: default_capture_tools(),
            convert_tool: default_convert_tool(),
            framerate: default_framerate(),
            extra_args: None,
            stop_timeout_ms: default_stop_timeout_ms(),
            delete_source_after_convert: false,
        }
    }
}

impl Config {
    /// Load config from disk or return default
    pub fn load_or_default(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config {}: {}", config_path.display(), e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file {}: {}", config_path.display(), e);
                }
            }
        }

        Self::default()
    }

    /// Apply SLITCAM_* environment overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the environment
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_FAKE_GPIO).as_deref() == Some("1") {
            self.button.fake = true;
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|d| !d.trim().is_empty()) {
            self.storage.storage_dir = Some(expand_home(&dir));
        }

        if let Some(args) = lookup(ENV_CAMERA_ARGS) {
            let args = args.trim();
            if !args.is_empty() {
                self.capture.extra_args = Some(args.to_string());
            }
        }
    }
}

/// Resolve which config file to read: explicit flag, then SLITCAM_CONFIG, then the user config dir
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        if !path.trim().is_empty() {
            return expand_home(&path);
        }
    }
    get_default_config_path()
}

/// Get the default config file path
fn get_default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slitcam")
        .join("config.toml")
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn default_recordings_subdir() -> String {
    "slitlamp-recordings".to_string()
}

fn default_label_prefixes() -> Vec<String> {
    vec!["SLITLAMP".to_string(), "SLITLAMP_".to_string()]
}

fn default_button_pin() -> u32 {
    17
}

fn default_bounce_ms() -> u64 {
    50
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_capture_tools() -> Vec<String> {
    // rpicam-vid replaced libcamera-vid on Bookworm
    vec!["rpicam-vid".to_string(), "libcamera-vid".to_string()]
}

fn default_convert_tool() -> String {
    "ffmpeg".to_string()
}

fn default_framerate() -> u32 {
    25
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

/// Default true value (for serde)
fn default_true() -> bool {
    true
}
