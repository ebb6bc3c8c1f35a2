//! Hardware output abstraction.
//!
//! Peripheral programming (DAC, PWM/LEDC, GPIO) lives outside the core.
//! Implementations provide platform-specific drivers:
//! - a peripheral driver on the embedded target
//! - a logging driver on the host
//! - [`MemoryOutput`] for tests
//!
//! Once a pulse channel is configured it runs autonomously; callers only
//! reconfigure it when the frequency or duty changes.

use std::collections::BTreeMap;

use thiserror::Error;

/// Lowest voltage ever written to a direction channel.
pub const DIRECTION_MV_MIN: u16 = 200;
/// Highest voltage ever written to a direction channel.
pub const DIRECTION_MV_MAX: u16 = 3100;

/// Clamp a direction voltage to the safe output range.
pub fn clamp_direction_mv(millivolts: i32) -> u16 {
    millivolts.clamp(i32::from(DIRECTION_MV_MIN), i32::from(DIRECTION_MV_MAX)) as u16
}

/// Errors reported by an output driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// No free pulse channel could be claimed for the pin.
    #[error("No pulse channel available for pin {0}")]
    ChannelUnavailable(u8),

    /// The pin cannot drive a pulse output.
    #[error("Pin {0} cannot be used as an output")]
    InvalidPin(u8),
}

/// The two DAC channels forming a direction voltage pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectionChannel {
    Sine,
    Cosine,
}

/// Abstract hardware output.
///
/// All methods are synchronous; none is ever called while the shared data
/// mutex is held.
pub trait OutputDriver: Send {
    /// Write a direction voltage; implementations clamp to the safe range.
    fn set_direction_voltage(&mut self, channel: DirectionChannel, millivolts: u16);

    /// Claim the pulse channel behind `pin`.
    fn claim_pulse_channel(&mut self, pin: u8) -> Result<(), OutputError>;

    /// Drive `pin` with a square wave.
    fn set_pulse_output(
        &mut self,
        pin: u8,
        frequency_hz: f32,
        duty_percent: u8,
    ) -> Result<(), OutputError>;

    /// Park the pulse channel behind `pin` (output held low).
    fn disable_output(&mut self, pin: u8);

    /// Release the pulse channel behind `pin`.
    fn release_pulse_channel(&mut self, pin: u8);
}

/// Pulse state of one pin as seen by [`MemoryOutput`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinState {
    pub claimed: bool,
    /// Active frequency and duty; `None` while parked.
    pub pulse: Option<(f32, u8)>,
}

/// In-memory output driver recording every command.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutput {
    pub pins: BTreeMap<u8, PinState>,
    pub direction_mv: BTreeMap<DirectionChannel, u16>,
    /// Number of channel claims, per pin.
    pub claims: BTreeMap<u8, u32>,
    /// Number of channel releases, per pin.
    pub releases: BTreeMap<u8, u32>,
    /// Number of pulse reconfigurations.
    pub pulse_writes: u32,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current frequency on `pin`, or `None` when parked or unclaimed.
    pub fn frequency(&self, pin: u8) -> Option<f32> {
        self.pins.get(&pin).and_then(|p| p.pulse).map(|(hz, _)| hz)
    }

    /// Whether the channel behind `pin` is claimed.
    pub fn is_claimed(&self, pin: u8) -> bool {
        self.pins.get(&pin).map(|p| p.claimed).unwrap_or(false)
    }
}

impl OutputDriver for MemoryOutput {
    fn set_direction_voltage(&mut self, channel: DirectionChannel, millivolts: u16) {
        self.direction_mv
            .insert(channel, clamp_direction_mv(i32::from(millivolts)));
    }

    fn claim_pulse_channel(&mut self, pin: u8) -> Result<(), OutputError> {
        *self.claims.entry(pin).or_default() += 1;
        self.pins.insert(
            pin,
            PinState {
                claimed: true,
                pulse: None,
            },
        );
        Ok(())
    }

    fn set_pulse_output(
        &mut self,
        pin: u8,
        frequency_hz: f32,
        duty_percent: u8,
    ) -> Result<(), OutputError> {
        let state = self
            .pins
            .get_mut(&pin)
            .filter(|p| p.claimed)
            .ok_or(OutputError::ChannelUnavailable(pin))?;
        state.pulse = Some((frequency_hz, duty_percent));
        self.pulse_writes += 1;
        Ok(())
    }

    fn disable_output(&mut self, pin: u8) {
        if let Some(state) = self.pins.get_mut(&pin) {
            state.pulse = None;
        }
    }

    fn release_pulse_channel(&mut self, pin: u8) {
        *self.releases.entry(pin).or_default() += 1;
        self.pins.remove(&pin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_clamp() {
        assert_eq!(clamp_direction_mv(-500), DIRECTION_MV_MIN);
        assert_eq!(clamp_direction_mv(9000), DIRECTION_MV_MAX);
        assert_eq!(clamp_direction_mv(1650), 1650);
    }

    #[test]
    fn test_pulse_requires_claim() {
        let mut out = MemoryOutput::new();
        assert_eq!(
            out.set_pulse_output(14, 10.0, 50),
            Err(OutputError::ChannelUnavailable(14))
        );

        out.claim_pulse_channel(14).unwrap();
        out.set_pulse_output(14, 10.0, 50).unwrap();
        assert_eq!(out.frequency(14), Some(10.0));

        out.disable_output(14);
        assert_eq!(out.frequency(14), None);
        assert!(out.is_claimed(14));

        out.release_pulse_channel(14);
        assert!(!out.is_claimed(14));
    }
}
