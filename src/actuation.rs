//! ==============================================================================
//! actuation.rs - background servo routine while the controller notifies
//! ==============================================================================
//!
//! purpose:
//!     wiggles the latch servo to tell the user a message is waiting. it runs
//!     as its own task next to the controller's lid polling loop.
//!
//! cycle:
//!     1. stop if cancelled
//!     2. refresh settings from the backend (mute may flip at any time)
//!     3. unless muted: `rotation_count` x (wait, 180°, wait, 0°, wait)
//!     4. wait `cycle_delay`, or stop early on cancellation
//!
//! a started rotation always finishes; cancellation is only observed
//! between rotations and during the idle waits.
//!
//! ==============================================================================

use crate::config::TimingConfig;
use crate::domain::SharedSettings;
use crate::hal::{Actuator, MAX_ANGLE};
use crate::network::{fetch_and_apply, MessageApi};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ActuationCoordinator {
    api: Arc<dyn MessageApi>,
    actuator: Arc<dyn Actuator>,
    settings: SharedSettings,
    timing: TimingConfig,
}

/// a running coordinator; dropping it does NOT stop the task, call `stop`
pub struct ActuationHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActuationHandle {
    /// cancel and wait for the task to finish its current motion
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Actuation task ended abnormally: {}", e);
        }
    }
}

impl ActuationCoordinator {
    pub fn new(
        api: Arc<dyn MessageApi>,
        actuator: Arc<dyn Actuator>,
        settings: SharedSettings,
        timing: TimingConfig,
    ) -> Self {
        Self { api, actuator, settings, timing }
    }

    /// start the task; it also stops when `shutdown` is cancelled
    pub fn spawn(self, shutdown: &CancellationToken) -> ActuationHandle {
        let cancel = shutdown.child_token();
        let task = tokio::spawn(self.run(cancel.clone()));
        ActuationHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        tracing::info!("Rotating servo");

        while !cancel.is_cancelled() {
            let refreshed = tokio::select! {
                _ = cancel.cancelled() => break,
                r = fetch_and_apply(self.api.as_ref(), &self.settings) => r,
            };
            let settings = match refreshed {
                Ok((_, settings)) => settings,
                Err(e) => {
                    tracing::warn!("Settings refresh failed, keeping last known: {}", e);
                    self.settings.snapshot().await
                }
            };

            if settings.muted {
                tracing::debug!("Muted, skipping rotation");
            } else {
                for _ in 0..settings.rotation_count {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.rotate_once().await;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timing.cycle_delay()) => {}
            }
        }

        let actuator = Arc::clone(&self.actuator);
        match tokio::task::spawn_blocking(move || actuator.reset()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Servo reset failed: {:#}", e),
            Err(e) => tracing::warn!("Servo reset task failed: {}", e),
        }
        tracing::info!("Servo stopped");
    }

    async fn rotate_once(&self) {
        let pause = self.timing.pulse_interval();
        tokio::time::sleep(pause).await;
        self.drive(MAX_ANGLE).await;
        tokio::time::sleep(pause).await;
        self.drive(0).await;
        tokio::time::sleep(pause).await;
    }

    /// servo moves block for the settle time, keep them off the runtime threads
    async fn drive(&self, angle: u16) {
        let actuator = Arc::clone(&self.actuator);
        match tokio::task::spawn_blocking(move || actuator.pulse(angle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Servo move to {} failed: {:#}", angle, e),
            Err(e) => tracing::warn!("Servo task failed: {}", e),
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RuntimeSettings, SettingsUpdate};
    use crate::hal::MockHal;
    use crate::network::NetworkError;
    use crate::testing::{muted, response, wait_until, ScriptedApi};
    use std::time::Duration;
    use tokio::time::Instant;

    fn coordinator(api: Arc<ScriptedApi>, hal: Arc<MockHal>, settings: SharedSettings) -> ActuationCoordinator {
        ActuationCoordinator::new(api, hal, settings, TimingConfig::default())
    }

    fn start(api: Arc<ScriptedApi>, hal: Arc<MockHal>, settings: SharedSettings) -> ActuationHandle {
        coordinator(api, hal, settings).spawn(&CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_rotation_count_times_per_cycle() {
        let api = ScriptedApi::new();
        api.set_idle(Ok(response(
            None,
            SettingsUpdate { rotation_count: Some(2), ..Default::default() },
        )));
        let hal = Arc::new(MockHal::new());

        let handle = start(api.clone(), hal.clone(), SharedSettings::default());
        wait_until(|| hal.pulses().len() >= 4).await;
        handle.stop().await;

        assert_eq!(&hal.pulses()[..4], &[180, 0, 180, 0]);
        assert_eq!(hal.resets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_never_pulses_but_keeps_refreshing() {
        let api = ScriptedApi::new();
        api.set_idle(Ok(response(None, muted(true))));
        let hal = Arc::new(MockHal::new());
        let settings = SharedSettings::default();

        let handle = start(api.clone(), hal.clone(), settings.clone());
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.stop().await;

        assert!(hal.pulses().is_empty());
        assert!(api.fetch_calls() >= 2);
        assert!(settings.snapshot().await.muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmute_mid_notify_starts_rotating() {
        let api = ScriptedApi::new();
        api.push_fetch(Ok(response(None, muted(true))));
        api.set_idle(Ok(response(None, muted(false))));
        let hal = Arc::new(MockHal::new());

        let handle = start(api.clone(), hal.clone(), SharedSettings::default());
        wait_until(|| hal.pulses().len() >= 2).await;
        handle.stop().await;

        assert!(api.fetch_calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_last_settings() {
        let api = ScriptedApi::new();
        api.set_idle(Err(NetworkError::ConnectionError("down".into())));
        let hal = Arc::new(MockHal::new());
        let settings = SharedSettings::new(RuntimeSettings { muted: true, ..Default::default() });

        let handle = start(api.clone(), hal.clone(), settings);
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.stop().await;

        assert!(hal.pulses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_cycle_delay() {
        let api = ScriptedApi::new();
        let hal = Arc::new(MockHal::new());

        let handle = start(api.clone(), hal.clone(), SharedSettings::default());
        wait_until(|| hal.pulses().len() >= 2).await;
        // give the task time to reach the idle wait
        tokio::time::sleep(Duration::from_secs(2)).await;

        let started = Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < TimingConfig::default().cycle_delay());
        assert_eq!(hal.pulses().len() % 2, 0, "rotation left half done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_shutdown_stops_task() {
        let api = ScriptedApi::new();
        let hal = Arc::new(MockHal::new());
        let shutdown = CancellationToken::new();

        let handle = coordinator(api, hal.clone(), SharedSettings::default()).spawn(&shutdown);
        wait_until(|| hal.pulses().len() >= 2).await;
        shutdown.cancel();
        handle.task.await.unwrap();

        assert_eq!(hal.resets(), 1);
        assert_eq!(hal.pulses().len() % 2, 0);
    }
}
