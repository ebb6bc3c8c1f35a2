//! Host output driver that logs every hardware command.

use std::collections::BTreeSet;

use tracing::{debug, info};

use windbridge_core::hardware::clamp_direction_mv;
use windbridge_core::{DirectionChannel, OutputDriver, OutputError};

/// Pulse channels available on the target's LED PWM controller.
const PULSE_CHANNELS: usize = 8;
/// Pins from here on are input-only on the target.
const FIRST_INPUT_ONLY_PIN: u8 = 34;

/// Mirrors the target's channel bookkeeping and logs what would be driven.
#[derive(Debug, Default)]
pub struct LogOutput {
    claimed: BTreeSet<u8>,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDriver for LogOutput {
    fn set_direction_voltage(&mut self, channel: DirectionChannel, millivolts: u16) {
        let millivolts = clamp_direction_mv(i32::from(millivolts));
        debug!("DAC {:?} = {} mV", channel, millivolts);
    }

    fn claim_pulse_channel(&mut self, pin: u8) -> Result<(), OutputError> {
        if pin >= FIRST_INPUT_ONLY_PIN {
            return Err(OutputError::InvalidPin(pin));
        }
        if !self.claimed.contains(&pin) && self.claimed.len() >= PULSE_CHANNELS {
            return Err(OutputError::ChannelUnavailable(pin));
        }
        self.claimed.insert(pin);
        info!("Pulse channel claimed on pin {}", pin);
        Ok(())
    }

    fn set_pulse_output(&mut self, pin: u8, frequency_hz: f32, duty_percent: u8) -> Result<(), OutputError> {
        if !self.claimed.contains(&pin) {
            return Err(OutputError::ChannelUnavailable(pin));
        }
        debug!("Pin {}: {:.2} Hz at {}% duty", pin, frequency_hz, duty_percent);
        Ok(())
    }

    fn disable_output(&mut self, pin: u8) {
        debug!("Pin {} parked", pin);
    }

    fn release_pulse_channel(&mut self, pin: u8) {
        if self.claimed.remove(&pin) {
            info!("Pulse channel released on pin {}", pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_input_only_pins() {
        let mut output = LogOutput::new();
        assert_eq!(output.claim_pulse_channel(35), Err(OutputError::InvalidPin(35)));
        assert!(output.claim_pulse_channel(14).is_ok());
    }

    #[test]
    fn test_pulse_requires_claim() {
        let mut output = LogOutput::new();
        assert!(output.set_pulse_output(16, 20.0, 10).is_err());
        output.claim_pulse_channel(16).unwrap();
        assert!(output.set_pulse_output(16, 20.0, 10).is_ok());
        output.release_pulse_channel(16);
        assert!(output.set_pulse_output(16, 20.0, 10).is_err());
    }

    #[test]
    fn test_channel_limit() {
        let mut output = LogOutput::new();
        for pin in 0..PULSE_CHANNELS as u8 {
            output.claim_pulse_channel(pin).unwrap();
        }
        assert_eq!(output.claim_pulse_channel(20), Err(OutputError::ChannelUnavailable(20)));
        assert!(output.claim_pulse_channel(0).is_ok());
    }
}
