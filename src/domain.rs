//! ==============================================================================
//! domain.rs - message and settings types shared by the controller and actuator
//! ==============================================================================
//!
//! relationships:
//!     - produced by: network.rs (decoded from GET /api/messages)
//!     - consumed by: controller.rs, actuation.rs
//!
//! ==============================================================================

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// a message waiting to be delivered
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: u64,
    pub text: String,
    pub author_name: String,
    /// hex without leading '#', e.g. "ffffff"
    pub text_color: String,
    pub background_color: String,
}

#[derive(Deserialize)]
struct WireMessage {
    id: u64,
    text: String,
    author: WireAuthor,
    #[serde(default)]
    text_color: Option<String>,
    #[serde(default)]
    background_color: Option<String>,
}

#[derive(Deserialize)]
struct WireAuthor {
    name: String,
}

impl PendingMessage {
    /// decode the `message` field of a fetch response
    ///
    /// an empty object means "nothing pending".
    pub fn from_wire(value: serde_json::Value) -> Result<Option<Self>, String> {
        if value.as_object().is_some_and(|m| m.is_empty()) {
            return Ok(None);
        }

        let wire: WireMessage =
            serde_json::from_value(value).map_err(|e| format!("malformed message: {e}"))?;

        Ok(Some(Self {
            id: wire.id,
            text: wire.text,
            author_name: wire.author.name,
            text_color: wire.text_color.unwrap_or_else(|| "ffffff".to_string()),
            background_color: wire.background_color.unwrap_or_else(|| "000000".to_string()),
        }))
    }
}

/// server-controlled behaviour knobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    pub muted: bool,
    pub rotation_count: u32,
    pub fetch_interval_secs: u64,
    /// tracked for the backend; actuation uses the fixed cycle delay
    pub rotation_interval_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            muted: false,
            rotation_count: 1,
            fetch_interval_secs: 60,
            rotation_interval_secs: 30,
        }
    }
}

impl RuntimeSettings {
    /// apply a partial update; absent fields keep their current value
    pub fn merge(&mut self, update: &SettingsUpdate) {
        if let Some(muted) = update.mute {
            self.muted = muted;
        }
        if let Some(count) = update.rotation_count {
            self.rotation_count = count;
        }
        if let Some(interval) = update.fetch_interval {
            self.fetch_interval_secs = interval;
        }
        if let Some(interval) = update.rotation_interval {
            self.rotation_interval_secs = interval;
        }
    }
}

/// the `settings` block of a fetch response
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, deserialize_with = "flag")]
    pub mute: Option<bool>,
    #[serde(default, deserialize_with = "whole_number")]
    pub rotation_count: Option<u32>,
    #[serde(default, deserialize_with = "whole_number")]
    pub fetch_interval: Option<u64>,
    #[serde(default, deserialize_with = "whole_number")]
    pub rotation_interval: Option<u64>,
}

/// backend sends mute as either a bool or 0/1
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|v| v != 0.0))),
        Some(other) => Err(D::Error::custom(format!("expected bool for mute, got {other}"))),
    }
}

/// counts and intervals arrive as numbers or as numeric strings ("3")
fn whole_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let parsed = match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v.trunc() as u64)),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| T::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("expected a non-negative integer, got {value}")))
}

/// decoded result of GET /api/messages
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub message: Option<PendingMessage>,
    pub settings: SettingsUpdate,
}

// ==============================================================================
// shared settings
// ==============================================================================
// written by both the controller (its fetches) and the actuation task (its
// self-refresh). every merge happens under one write lock and every read
// returns a whole copy, so neither side sees a half-applied update.

#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<RuntimeSettings>>,
}

impl SharedSettings {
    #[cfg(test)]
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { inner: Arc::new(RwLock::new(settings)) }
    }

    pub async fn snapshot(&self) -> RuntimeSettings {
        *self.inner.read().await
    }

    /// merge an update and return the resulting snapshot
    pub async fn apply(&self, update: &SettingsUpdate) -> RuntimeSettings {
        let mut guard = self.inner.write().await;
        guard.merge(update);
        *guard
    }
}
