//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     the controller never touches a driver directly. it talks to three
//!     capabilities:
//!     - Renderer:    what the screen shows
//!     - Actuator:    the servo that works the latch
//!     - InputSensor: the lid switch (open / closed)
//!
//! design philosophy:
//!     - "Compile Anywhere": without feature="hardware" the host builds and
//!       runs on any machine using MockHal.
//!     - on the Pi, gpio.rs provides rppal-backed implementations.
//!
//! relationships:
//!     - used by: controller.rs, actuation.rs
//!     - implemented by: gpio.rs (real), MockHal (dev + tests), LogRenderer
//!
//! ==============================================================================

use crate::domain::PendingMessage;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

pub trait Renderer: Send + Sync {
    fn show_text(&self, text: &str);
    fn show_message(&self, message: &PendingMessage);
    fn show_centered_prompt(&self, text: &str);
}

pub trait Actuator: Send + Sync {
    /// move to `angle` degrees (0..=180); blocks until the move settles
    fn pulse(&self, angle: u16) -> Result<()>;
    /// stop driving the servo
    fn reset(&self) -> Result<()>;
}

pub trait InputSensor: Send + Sync {
    fn is_open(&self) -> bool;
}

pub const MAX_ANGLE: u16 = 180;

// ==============================================================================================
// LOG RENDERER
// ==============================================================================================
// pixel rendering lives outside this crate; the host reports what would be
// on the screen.

pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn show_text(&self, text: &str) {
        tracing::info!(target: "display", "{}", text.replace('\n', " | "));
    }

    fn show_message(&self, message: &PendingMessage) {
        tracing::info!(
            target: "display",
            text_color = %message.text_color,
            background_color = %message.background_color,
            "\"{}\" from {}",
            message.text,
            message.author_name
        );
    }

    fn show_centered_prompt(&self, text: &str) {
        tracing::info!(target: "display", "[ {} ]", text);
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Builds and Tests)
// ==============================================================================================

/// what a mock screen was asked to draw
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    Text(String),
    Message(PendingMessage),
    Prompt(String),
}

/// in-memory box: records every pulse and screen, lid state is settable
#[cfg_attr(any(feature = "hardware", not(test)), allow(dead_code))]
#[derive(Default)]
pub struct MockHal {
    open: AtomicBool,
    resets: AtomicUsize,
    pulses: Mutex<Vec<u16>>,
    screens: Mutex<Vec<Screen>>,
}

#[cfg_attr(any(feature = "hardware", not(test)), allow(dead_code))]
impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::default()
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn pulses(&self) -> Vec<u16> {
        self.pulses.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn screens(&self) -> Vec<Screen> {
        self.screens.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_screen(&self) -> Option<Screen> {
        self.screens().pop()
    }

    fn draw(&self, screen: Screen) {
        tracing::debug!("[MOCK SCREEN] {:?}", screen);
        self.screens.lock().unwrap_or_else(PoisonError::into_inner).push(screen);
    }
}

impl Renderer for MockHal {
    fn show_text(&self, text: &str) {
        self.draw(Screen::Text(text.to_string()));
    }

    fn show_message(&self, message: &PendingMessage) {
        self.draw(Screen::Message(message.clone()));
    }

    fn show_centered_prompt(&self, text: &str) {
        self.draw(Screen::Prompt(text.to_string()));
    }
}

impl Actuator for MockHal {
    fn pulse(&self, angle: u16) -> Result<()> {
        if angle > MAX_ANGLE {
            anyhow::bail!("angle {} out of range", angle);
        }
        tracing::debug!("[MOCK SERVO] Rotate to {}", angle);
        self.pulses.lock().unwrap_or_else(PoisonError::into_inner).push(angle);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        tracing::debug!("[MOCK SERVO] Reset");
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl InputSensor for MockHal {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_rejects_out_of_range_angle() {
        let hal = MockHal::new();
        assert!(hal.pulse(181).is_err());
        assert!(hal.pulse(180).is_ok());
        assert_eq!(hal.pulses(), vec![180]);
    }

    #[test]
    fn test_mock_lid_and_screen() {
        let hal = MockHal::new();
        assert!(!hal.is_open());
        hal.set_open(true);
        assert!(hal.is_open());

        hal.show_centered_prompt("NO MESSAGES");
        assert_eq!(hal.last_screen(), Some(Screen::Prompt("NO MESSAGES".into())));
    }
}
