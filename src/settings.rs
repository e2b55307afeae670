// src/settings.rs
//
// Persistent link settings, stored as JSON in the user's config directory.
// Every field has a serde default so older or hand-edited files still load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::serial::{ChannelOptions, DataBitsPolicy, LineParams, Parity, StopBits};
use crate::touch::{ScreenGeometry, DEFAULT_CALIBRATION_FILE};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Longest inbound line kept, in bytes
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    #[serde(default)]
    pub data_bits_policy: DataBitsPolicy,

    // Touch
    #[serde(default = "default_calibration_file")]
    pub calibration_file: String,
    #[serde(default = "default_screen_width")]
    pub screen_width: i32,
    #[serde(default = "default_screen_height")]
    pub screen_height: i32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud() -> u32 {
    115200
}
fn default_data_bits() -> u8 {
    8
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_max_line_len() -> usize {
    255
}
fn default_calibration_file() -> String {
    DEFAULT_CALIBRATION_FILE.to_string()
}
fn default_screen_width() -> i32 {
    800
}
fn default_screen_height() -> i32 {
    480
}
fn default_poll_interval_ms() -> u64 {
    5
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            read_timeout_ms: default_read_timeout_ms(),
            max_line_len: default_max_line_len(),
            data_bits_policy: DataBitsPolicy::default(),
            calibration_file: default_calibration_file(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            poll_interval_ms: default_poll_interval_ms(),
            log_dir: None,
        }
    }
}

impl LinkSettings {
    pub fn line_params(&self) -> LineParams {
        LineParams {
            baud: self.baud,
            stop_bits: self.stop_bits,
            parity: self.parity,
            data_bits: self.data_bits,
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_line_len: self.max_line_len,
            data_bits_policy: self.data_bits_policy,
        }
    }

    pub fn screen(&self) -> ScreenGeometry {
        ScreenGeometry {
            width: self.screen_width,
            height: self.screen_height,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `<config dir>/hmi-link/settings.json`
pub fn default_settings_path() -> Result<PathBuf, String> {
    let config_dir = dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join("hmi-link").join("settings.json"))
}

/// Read settings from `path`, or the defaults if it doesn't exist.
pub fn load_settings(path: &Path) -> Result<LinkSettings, String> {
    if !path.exists() {
        tlog!("[settings] {} not found, using defaults", path.display());
        return Ok(LinkSettings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| format!("Failed to read settings: {}", e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
}

pub fn save_settings(path: &Path, settings: &LinkSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create settings dir: {}", e))?;
        }
    }

    let content =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;

    tlog!("[settings] Saved to {}", path.display());
    Ok(())
}
