//! ==============================================================================
//! main.rs - messagebox host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the controller of a locked message box. the box polls its backend
//!     for a personal message, wiggles the latch servo when one arrives and
//!     marks it as read once the lid has been opened.
//!
//! responsibilities:
//!     - load host.toml (pins, timings, log level)
//!     - initialize tracing
//!     - pick the hardware layer (rppal on the Pi, mock elsewhere)
//!     - hand everything to the controller and run it until killed
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                   rust host (this file)                  │
//!     │   ┌──────────────────┐         ┌───────────────────────┐ │
//!     │   │ controller loop  │ spawns  │ actuation task        │ │
//!     │   │ (state machine)  │ ──────> │ (servo + mute check)  │ │
//!     │   └───┬──────────┬───┘         └──────────┬────────────┘ │
//!     │       │          │   SharedSettings (RwLock)             │
//!     │       ▼          ▼                        ▼              │
//!     │  ┌─────────┐ ┌────────────┐   ┌──────────────────────┐   │
//!     │  │ device  │ │ network    │   │ hal: servo / lid /   │   │
//!     │  │ .toml   │ │ (reqwest)  │   │ screen               │   │
//!     │  └─────────┘ └────────────┘   └──────────────────────┘   │
//!     └──────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod actuation;
mod config;
mod controller;
mod device;
mod domain;
mod gpio;
mod hal;
mod network;
#[cfg(test)]
mod testing;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::controller::{Controller, Peripherals};
use crate::device::TomlConfigStore;
use crate::hal::LogRenderer;
use crate::network::NetworkClient;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = config::HostConfig::load_or_default();

    // step 2: logging (RUST_LOG wins over host.toml)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    config.log_summary();

    // step 3: hardware
    let peripherals = peripherals(&config)?;
    let actuator = Arc::clone(&peripherals.actuator);

    // step 4: backend client + device record
    let api = Arc::new(NetworkClient::new(Duration::from_secs(config.network.timeout_secs))?);
    let store = TomlConfigStore::new(&config.device.config_path);

    // step 5: run until killed
    let controller = Controller::new(api, Box::new(store), peripherals, config.timing.clone());
    let shutdown = controller.shutdown_token();
    let run = controller.run();
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            shutdown.cancel();
            // waits for the servo task, so the reset below never races a move
            run.await
        }
    };

    if let Err(e) = &result {
        tracing::error!("Controller stopped: {:#}", e);
    }
    if let Err(e) = actuator.reset() {
        tracing::warn!("Servo reset failed: {:#}", e);
    }
    result
}

#[cfg(feature = "hardware")]
fn peripherals(config: &config::HostConfig) -> Result<Peripherals> {
    Ok(Peripherals {
        renderer: Arc::new(LogRenderer),
        actuator: Arc::new(gpio::ServoMotor::new(config.hardware.servo_pin)?),
        sensor: Arc::new(gpio::LidSwitch::new(config.hardware.trigger_pin)?),
    })
}

#[cfg(not(feature = "hardware"))]
fn peripherals(_config: &config::HostConfig) -> Result<Peripherals> {
    let hal = Arc::new(hal::MockHal::new());
    Ok(Peripherals {
        renderer: Arc::new(LogRenderer),
        actuator: hal.clone(),
        sensor: hal,
    })
}
