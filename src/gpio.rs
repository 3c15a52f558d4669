//! ==============================================================================
//! gpio.rs - raspberry pi drivers for the latch servo and the lid switch
//! ==============================================================================
//!
//! hardware:
//!     - servo (sg90 class) on a gpio pin, driven with 50Hz software pwm
//!     - lid switch on a gpio pin with pull-up; LOW = lid pressed down = closed
//!
//! relationships:
//!     - implements: hal.rs (Actuator, InputSensor)
//!     - uses: rppal (only with feature="hardware")
//!
//! ==============================================================================

/// duty cycle (0.0..=1.0) for an angle: 2% at 0°, 12% at 180°
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub fn duty_cycle(angle: u16) -> f64 {
    (2.0 + f64::from(angle) / 18.0) / 100.0
}

#[cfg(feature = "hardware")]
pub use self::hardware::{LidSwitch, ServoMotor};

#[cfg(feature = "hardware")]
mod hardware {
    use super::duty_cycle;
    use crate::hal::{Actuator, InputSensor, MAX_ANGLE};

    use anyhow::Result;
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// servo pwm frequency
    const SERVO_FREQUENCY_HZ: f64 = 50.0;

    /// time given to the servo to reach its position before the pwm is dropped
    const SERVO_SETTLE: Duration = Duration::from_millis(250);

    pub struct ServoMotor {
        pin: Mutex<OutputPin>,
    }

    impl ServoMotor {
        pub fn new(pin: u8) -> Result<Self> {
            tracing::info!("Using REAL servo on GPIO {}", pin);
            let mut output = Gpio::new()?.get(pin)?.into_output();
            output.set_low();
            Ok(Self { pin: Mutex::new(output) })
        }
    }

    impl Actuator for ServoMotor {
        fn pulse(&self, angle: u16) -> Result<()> {
            if angle > MAX_ANGLE {
                anyhow::bail!("angle {} out of range", angle);
            }
            let mut pin = self.pin.lock().unwrap_or_else(PoisonError::into_inner);
            pin.set_pwm_frequency(SERVO_FREQUENCY_HZ, duty_cycle(angle))?;
            std::thread::sleep(SERVO_SETTLE);
            // holding the pwm makes the servo jitter
            pin.clear_pwm()?;
            Ok(())
        }

        fn reset(&self) -> Result<()> {
            let mut pin = self.pin.lock().unwrap_or_else(PoisonError::into_inner);
            pin.clear_pwm()?;
            pin.set_low();
            Ok(())
        }
    }

    pub struct LidSwitch {
        pin: InputPin,
    }

    impl LidSwitch {
        pub fn new(pin: u8) -> Result<Self> {
            tracing::info!("Using REAL lid switch on GPIO {}", pin);
            Ok(Self { pin: Gpio::new()?.get(pin)?.into_input_pullup() })
        }
    }

    impl InputSensor for LidSwitch {
        fn is_open(&self) -> bool {
            self.pin.is_high()
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_cycle_range() {
        assert!((duty_cycle(0) - 0.02).abs() < 1e-9);
        assert!((duty_cycle(90) - 0.07).abs() < 1e-9);
        assert!((duty_cycle(180) - 0.12).abs() < 1e-9);
    }
}
