//! ==============================================================================
//! controller.rs - the message box state machine
//! ==============================================================================
//!
//! purpose:
//!     a single flat loop. every state handler does its work and returns the
//!     next state; errors are turned into states right where they happen, so
//!     the loop never unwinds or re-enters itself.
//!
//!     LoadConfig ──┬──> RegisterDevice ──> FetchMessages <──┐
//!                  └────────────────────────> │  ▲   │      │
//!                                             ▼  │   ▼      │
//!                                          Notify ──> Reading
//!
//! relationships:
//!     - uses: network.rs (MessageApi), actuation.rs (servo task)
//!     - uses: hal.rs (Renderer, InputSensor, Actuator), device.rs (ConfigStore)
//!
//! ==============================================================================

use crate::actuation::ActuationCoordinator;
use crate::config::TimingConfig;
use crate::device::{generate_hardware_id, group_hardware_id, ConfigError, ConfigStore, DeviceConfig};
use crate::domain::{PendingMessage, SharedSettings};
use crate::hal::{Actuator, InputSensor, Renderer};
use crate::network::{fetch_and_apply, MessageApi, NetworkError};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    LoadConfig,
    RegisterDevice,
    FetchMessages,
    Notify,
    Reading,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadConfig => "LoadConfig",
            Self::RegisterDevice => "RegisterDevice",
            Self::FetchMessages => "FetchMessages",
            Self::Notify => "Notify",
            Self::Reading => "Reading",
        };
        f.write_str(name)
    }
}

/// the physical side of the box
#[derive(Clone)]
pub struct Peripherals {
    pub renderer: Arc<dyn Renderer>,
    pub actuator: Arc<dyn Actuator>,
    pub sensor: Arc<dyn InputSensor>,
}

pub struct Controller {
    state: ControllerState,
    config: DeviceConfig,
    pending: Option<PendingMessage>,
    settings: SharedSettings,
    api: Arc<dyn MessageApi>,
    store: Box<dyn ConfigStore>,
    peripherals: Peripherals,
    timing: TimingConfig,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn new(
        api: Arc<dyn MessageApi>,
        store: Box<dyn ConfigStore>,
        peripherals: Peripherals,
        timing: TimingConfig,
    ) -> Self {
        Self {
            state: ControllerState::LoadConfig,
            config: DeviceConfig::default(),
            pending: None,
            settings: SharedSettings::default(),
            api,
            store,
            peripherals,
            timing,
            shutdown: CancellationToken::new(),
        }
    }

    /// cancelling this token makes `run` return once any running servo task
    /// has been joined
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[cfg(test)]
    pub fn pending(&self) -> Option<&PendingMessage> {
        self.pending.as_ref()
    }

    #[cfg(test)]
    pub fn device_config(&self) -> &DeviceConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// run until shut down; a configuration error is the only failure
    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("Messagebox started");
        self.peripherals.renderer.show_centered_prompt("MESSAGEBOX");
        tokio::time::sleep(self.timing.splash()).await;

        let shutdown = self.shutdown.clone();
        loop {
            // Notify is left to finish on its own so the servo task gets joined
            let interruptible = self.state != ControllerState::Notify;
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled(), if interruptible => break,
                next = self.step() => next?,
            };
            tracing::info!("Current state: {}", next);
        }

        tracing::info!(state = %self.state, "Controller stopped");
        Ok(())
    }

    /// execute the current state once and move to the next one
    pub async fn step(&mut self) -> Result<ControllerState, ConfigError> {
        let next = match self.state {
            ControllerState::LoadConfig => self.load_config().map_err(|e| {
                tracing::error!(state = %self.state, "Fatal configuration error: {}", e);
                e
            })?,
            ControllerState::RegisterDevice => self.register_device().await,
            ControllerState::FetchMessages => match self.fetch_messages().await {
                Ok(next) => next,
                Err(e) => self.recover(e).await,
            },
            ControllerState::Notify => self.notify().await,
            ControllerState::Reading => self.reading().await,
        };
        self.state = next;
        Ok(next)
    }

    fn load_config(&mut self) -> Result<ControllerState, ConfigError> {
        tracing::info!("Loading device config");

        if !self.store.exists() {
            tracing::warn!("No device config found, creating default");
            self.store.create_default()?;
        }

        let mut config = self.store.load()?;
        config.validate()?;

        if config.hardware_id.is_empty() {
            config.hardware_id = generate_hardware_id();
            tracing::info!("Generated hardware ID: {}", config.hardware_id);
            self.store.save(&config)?;
        }

        self.api.connect(&config.endpoint, &config.token);
        tracing::info!(
            endpoint = %config.endpoint,
            registered = config.registered,
            has_token = !config.token.is_empty(),
            "Device config loaded"
        );

        let next = if config.registered {
            ControllerState::FetchMessages
        } else {
            ControllerState::RegisterDevice
        };
        self.config = config;
        Ok(next)
    }

    async fn register_device(&mut self) -> ControllerState {
        let hardware_id = self.config.hardware_id.clone();
        tracing::info!("Registering box as {}", hardware_id);

        let id_text = group_hardware_id(&hardware_id);
        self.peripherals.renderer.show_text(&format!("Personal ID:\n{id_text}"));

        let Some(token) = self.api.register_device(&hardware_id).await else {
            tracing::debug!("No token yet, retrying in {:?}", self.timing.register_retry());
            tokio::time::sleep(self.timing.register_retry()).await;
            return ControllerState::RegisterDevice;
        };

        tracing::info!("Device registered");
        self.api.set_token(&token);
        self.config.token = token;
        self.config.registered = true;
        if let Err(e) = self.store.save(&self.config) {
            // the token still works for this run; it is lost on restart
            tracing::error!(state = %self.state, "Failed to persist registration: {}", e);
        }

        self.peripherals.renderer.show_centered_prompt("DEVICE REGISTERED");
        tokio::time::sleep(self.timing.register_confirm()).await;
        ControllerState::FetchMessages
    }

    async fn fetch_messages(&mut self) -> Result<ControllerState, NetworkError> {
        // while muted this shortcut is skipped on purpose: a muted box keeps
        // re-fetching every cycle, even with a message already in hand
        let current = self.settings.snapshot().await;
        if self.pending.is_some() && !current.muted {
            return Ok(ControllerState::Notify);
        }

        tracing::info!("Fetching messages");
        let (response, settings) = fetch_and_apply(self.api.as_ref(), &self.settings).await?;
        self.pending = response.message;

        let renderer = &self.peripherals.renderer;
        renderer.show_centered_prompt(if settings.muted { "DEVICE MUTED" } else { "NO MESSAGES" });

        if let Some(message) = &self.pending {
            tracing::info!(id = message.id, author = %message.author_name, "Message received");
            renderer.show_message(message);

            if !settings.muted {
                return Ok(ControllerState::Notify);
            }
            tracing::info!("Device muted, not notifying");
        }

        tokio::time::sleep(Duration::from_secs(settings.fetch_interval_secs)).await;
        Ok(ControllerState::FetchMessages)
    }

    async fn recover(&mut self, error: NetworkError) -> ControllerState {
        if error.requires_registration() {
            tracing::warn!(state = %self.state, "{}, registering again", error);
            self.api.clear_token();
            self.config.token.clear();
            return ControllerState::RegisterDevice;
        }

        match &error {
            NetworkError::ConnectionError(detail) => {
                tracing::error!(state = %self.state, "No connection, trying again: {}", detail);
                self.peripherals.renderer.show_text("No connection");
            }
            _ => tracing::error!(state = %self.state, "{}", error),
        }
        tokio::time::sleep(self.timing.connection_backoff()).await;
        ControllerState::FetchMessages
    }

    async fn notify(&mut self) -> ControllerState {
        tracing::info!("Notifying user");

        let actuation = ActuationCoordinator::new(
            Arc::clone(&self.api),
            Arc::clone(&self.peripherals.actuator),
            self.settings.clone(),
            self.timing.clone(),
        )
        .spawn(&self.shutdown);

        while !self.peripherals.sensor.is_open() {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.timing.sensor_poll()) => {}
            }
        }
        if self.peripherals.sensor.is_open() {
            tracing::info!("Box opened");
        }

        // joined before leaving, so a re-entered Notify never finds a second servo task
        actuation.stop().await;
        ControllerState::Reading
    }

    async fn reading(&mut self) -> ControllerState {
        let Some(message) = self.pending.take() else {
            return ControllerState::FetchMessages;
        };

        tracing::info!(id = message.id, "Marking message as read");
        if let Err(e) = self.api.acknowledge_read(message.id).await {
            tracing::warn!(state = %self.state, id = message.id, "Read acknowledgement failed: {}", e);
        }

        tracing::info!("Waiting for box to be closed");
        while self.peripherals.sensor.is_open() {
            tokio::time::sleep(self.timing.sensor_poll()).await;
        }
        tracing::info!("Box closed");
        ControllerState::FetchMessages
    }
}
