//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the rain-config.toml file.
//! It provides a centralized way to configure the gauge calibration, rainfall detection
//! timing, the GPIO pin of the bucket and where statistics are persisted.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "rain-config.toml";

/// Errors raised while reading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration loaded from rain-config.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Gauge calibration and rainfall detection
    pub gauge: GaugeConfig,
    /// Tip input wiring
    pub hardware: HardwareConfig,
    /// Statistics persistence
    pub storage: StorageConfig,
}

/// Rain gauge calibration and detection timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GaugeConfig {
    /// Rain millimeters per bucket tip
    pub bucket_factor: f32,
    /// Minimal spacing of two accepted tips in milliseconds
    pub debounce_ms: u32,
    /// Upper bound of the silence that ends a rainfall, in minutes
    pub offset_max_minutes: u32,
    /// Tips needed to recognize a rainfall (never fewer than 2)
    pub start_tips: u32,
    /// Period of the main-loop evaluation in milliseconds
    pub measure_period_ms: u64,
}

/// GPIO wiring of the tipping bucket
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// BCM number of the reed switch input
    pub tip_pin: u8,
}

/// Where the statistics snapshot lives between reboots
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: String,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        GaugeConfig {
            bucket_factor: 0.2794,
            debounce_ms: 300,
            offset_max_minutes: 5,
            start_tips: 2,
            measure_period_ms: 5147, // prime, avoids beating with other timers
        }
    }
}

impl GaugeConfig {
    pub fn offset_max_ms(&self) -> u32 {
        self.offset_max_minutes.saturating_mul(60_000)
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig { tip_pin: 17 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            snapshot_path: "/var/lib/rain-bucket/statistics.json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from rain-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::read_from_path(&path) {
            Ok(config) => {
                info!(
                    "Loaded configuration: {} mm/tip, offset max {} min",
                    config.gauge.bucket_factor, config.gauge.offset_max_minutes
                );
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config file found, using default configuration");
                Self::default()
            }
            Err(e) => {
                warn!("{}: {}", path.as_ref().display(), e);
                warn!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Read and parse a configuration file without any fallback
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
