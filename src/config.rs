//! ==============================================================================
//! config.rs - host configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - HardwareConfig: GPIO pins for the servo and the lid switch.
//!     - TimingConfig: delays used by the controller and the actuation task.
//!     - NetworkConfig: HTTP client settings.
//!     - DeviceConfigPath: where the device record (endpoint, token, id) lives.
//!     - LoggingConfig: default tracing filter.
//!
//! the device record itself is NOT part of this file; it is owned by the
//! controller and persisted through device.rs.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub hardware: HardwareConfig,
    pub timing: TimingConfig,
    pub network: NetworkConfig,
    pub device: DeviceConfigPath,
    pub logging: LoggingConfig,
    /// file this config was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HardwareConfig {
    pub servo_pin: u8,
    /// lid switch; reads LOW while the box is closed
    pub trigger_pin: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self { servo_pin: 17, trigger_pin: 26 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub splash_secs: u64,
    pub register_retry_secs: u64,
    pub register_confirm_secs: u64,
    pub connection_backoff_secs: u64,
    pub sensor_poll_ms: u64,
    pub pulse_interval_ms: u64,
    pub cycle_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            splash_secs: 3,
            register_retry_secs: 10,
            register_confirm_secs: 3,
            connection_backoff_secs: 5,
            sensor_poll_ms: 100,
            pulse_interval_ms: 500,
            cycle_delay_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn splash(&self) -> Duration {
        Duration::from_secs(self.splash_secs)
    }

    pub fn register_retry(&self) -> Duration {
        Duration::from_secs(self.register_retry_secs)
    }

    pub fn register_confirm(&self) -> Duration {
        Duration::from_secs(self.register_confirm_secs)
    }

    pub fn connection_backoff(&self) -> Duration {
        Duration::from_secs(self.connection_backoff_secs)
    }

    pub fn sensor_poll(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfigPath {
    pub config_path: PathBuf,
}

impl Default for DeviceConfigPath {
    fn default() -> Self {
        Self { config_path: PathBuf::from("config").join("device.toml") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.source = Some(path.as_ref().to_path_buf());

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before the tracing subscriber exists, so problems are reported
    /// on stderr.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        match &self.source {
            Some(path) => tracing::info!("Loaded host config from {}", path.display()),
            None => tracing::warn!("No host config file found - using defaults"),
        }
        tracing::info!(
            servo_pin = self.hardware.servo_pin,
            trigger_pin = self.hardware.trigger_pin,
            device_config = %self.device.config_path.display(),
            log_level = %self.logging.level,
            "host configuration"
        );
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
[hardware]
servo_pin = 12

[timing]
cycle_delay_secs = 2
"#,
        )
        .unwrap();

        assert_eq!(config.hardware.servo_pin, 12);
        assert_eq!(config.hardware.trigger_pin, 26);
        assert_eq!(config.timing.cycle_delay(), Duration::from_secs(2));
        assert_eq!(config.timing.register_retry(), Duration::from_secs(10));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[network]\ntimeout_secs = 3\n").unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.network.timeout_secs, 3);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[timing\nsplash_secs = ").unwrap();

        assert!(HostConfig::load(&path).is_err());
    }
}
