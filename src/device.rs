//! ==============================================================================
//! device.rs - device identity and its persisted record
//! ==============================================================================
//!
//! purpose:
//!     the device record holds what the box needs to talk to its backend:
//!     endpoint, bearer token, hardware id and whether registration is done.
//!     it is created on first boot and rewritten after registration.
//!
//! relationships:
//!     - owned by: controller.rs (the only writer)
//!     - persisted through: ConfigStore (TomlConfigStore on the device)
//!
//! ==============================================================================

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// digits in a hardware id
pub const HARDWARE_ID_LENGTH: usize = 9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API endpoint configured")]
    MissingEndpoint,
    #[error("invalid API endpoint: {0:?}")]
    InvalidEndpoint(String),
    #[error("device config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("device config unreadable: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("device config could not be encoded: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// persisted device record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeviceConfig {
    pub endpoint: String,
    pub token: String,
    pub hardware_id: String,
    #[serde(rename = "SetUp")]
    pub registered: bool,
}

impl DeviceConfig {
    /// strip whitespace and stray quotes from hand-edited endpoints
    pub fn normalize(&mut self) {
        self.endpoint = self.endpoint.trim().replace('"', "");
    }

    /// an unusable endpoint is fatal; the box cannot do anything without it
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if !is_valid_endpoint(&self.endpoint) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        Ok(())
    }
}

fn endpoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?:http|ftp)s?://",
            r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)",
            r"|localhost",
            r"|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
            r"(?::\d+)?",
            r"(?:/?|[/?]\S+)$",
        ))
        .expect("endpoint pattern compiles")
    })
}

/// http(s)/ftp(s) URL with a domain, localhost or IPv4 host
pub fn is_valid_endpoint(url: &str) -> bool {
    endpoint_regex().is_match(url)
}

pub fn generate_hardware_id() -> String {
    let mut rng = rand::thread_rng();
    (0..HARDWARE_ID_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// "123456789" -> "123 456 789", easier to read off the screen
pub fn group_hardware_id(hardware_id: &str) -> String {
    hardware_id
        .as_bytes()
        .chunks(3)
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

// ==============================================================================
// persistence
// ==============================================================================

/// persistence surface for the device record; holds no state of its own
pub trait ConfigStore: Send {
    fn exists(&self) -> bool;
    /// replace whatever is stored with an empty record
    fn create_default(&self) -> Result<(), ConfigError>;
    fn load(&self) -> Result<DeviceConfig, ConfigError>;
    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl ConfigStore for TomlConfigStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn create_default(&self) -> Result<(), ConfigError> {
        if self.exists() {
            std::fs::remove_file(&self.path)?;
        }
        self.save(&DeviceConfig::default())
    }

    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.path)?;
        let mut config: DeviceConfig = toml::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(config)?)?;
        Ok(())
    }
}
