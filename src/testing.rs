//! test doubles for the backend and the device record

use crate::device::{ConfigError, ConfigStore, DeviceConfig};
use crate::domain::{FetchResponse, PendingMessage, SettingsUpdate};
use crate::network::{MessageApi, NetworkError};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn message(id: u64) -> PendingMessage {
    PendingMessage {
        id,
        text: format!("message {id}"),
        author_name: "Robin".into(),
        text_color: "ffffff".into(),
        background_color: "000000".into(),
    }
}

pub fn response(message: Option<PendingMessage>, settings: SettingsUpdate) -> FetchResponse {
    FetchResponse { message, settings }
}

pub fn muted(mute: bool) -> SettingsUpdate {
    SettingsUpdate { mute: Some(mute), ..Default::default() }
}

/// poll `cond` on the (possibly paused) tokio clock
pub async fn wait_until(cond: impl Fn() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// backend that replays queued outcomes, then repeats `idle`
pub struct ScriptedApi {
    registrations: Mutex<VecDeque<Option<String>>>,
    fetches: Mutex<VecDeque<Result<FetchResponse, NetworkError>>>,
    idle: Mutex<Result<FetchResponse, NetworkError>>,
    acks: Mutex<Vec<u64>>,
    session: Mutex<(String, String)>,
    fetch_calls: AtomicUsize,
}

impl Default for ScriptedApi {
    fn default() -> Self {
        Self {
            registrations: Mutex::default(),
            fetches: Mutex::default(),
            idle: Mutex::new(Ok(response(None, SettingsUpdate::default()))),
            acks: Mutex::default(),
            session: Mutex::default(),
            fetch_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_registration(&self, token: Option<&str>) {
        self.registrations.lock().unwrap().push_back(token.map(str::to_string));
    }

    pub fn push_fetch(&self, outcome: Result<FetchResponse, NetworkError>) {
        self.fetches.lock().unwrap().push_back(outcome);
    }

    pub fn set_idle(&self, outcome: Result<FetchResponse, NetworkError>) {
        *self.idle.lock().unwrap() = outcome;
    }

    pub fn acks(&self) -> Vec<u64> {
        self.acks.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> String {
        self.session.lock().unwrap().0.clone()
    }

    pub fn token(&self) -> String {
        self.session.lock().unwrap().1.clone()
    }
}

#[async_trait]
impl MessageApi for ScriptedApi {
    fn connect(&self, endpoint: &str, token: &str) {
        *self.session.lock().unwrap() = (endpoint.to_string(), token.to_string());
    }

    fn set_token(&self, token: &str) {
        self.session.lock().unwrap().1 = token.to_string();
    }

    fn clear_token(&self) {
        self.session.lock().unwrap().1.clear();
    }

    async fn register_device(&self, _hardware_id: &str) -> Option<String> {
        self.registrations.lock().unwrap().pop_front().flatten()
    }

    async fn fetch_messages(&self) -> Result<FetchResponse, NetworkError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.fetches.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.idle.lock().unwrap().clone())
    }

    async fn acknowledge_read(&self, message_id: u64) -> Result<(), NetworkError> {
        if self.token().is_empty() || message_id == 0 {
            return Err(NetworkError::InvalidToken);
        }
        self.acks.lock().unwrap().push(message_id);
        Ok(())
    }
}

/// device record kept in memory
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    record: Arc<Mutex<Option<DeviceConfig>>>,
}

impl MemoryConfigStore {
    pub fn with(config: DeviceConfig) -> Self {
        Self { record: Arc::new(Mutex::new(Some(config))) }
    }

    pub fn stored(&self) -> Option<DeviceConfig> {
        self.record.lock().unwrap().clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn exists(&self) -> bool {
        self.record.lock().unwrap().is_some()
    }

    fn create_default(&self) -> Result<(), ConfigError> {
        *self.record.lock().unwrap() = Some(DeviceConfig::default());
        Ok(())
    }

    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let mut config = self
            .stored()
            .ok_or_else(|| ConfigError::Io(std::io::ErrorKind::NotFound.into()))?;
        config.normalize();
        Ok(config)
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        *self.record.lock().unwrap() = Some(config.clone());
        Ok(())
    }
}
