//! Display pulse engine.
//!
//! Converts display readings into hardware output:
//! - Speed becomes a pulse frequency (`speed * pulses_per_knot`, clamped to
//!   the display's ceiling) passed through a [`FrequencyFilter`]
//! - Logic Wind direction becomes a sine/cosine DAC voltage pair
//!
//! The engine is owned by the control task. It never touches the shared
//! state; callers pass a snapshot of the display.

use crate::display::{Display, DisplayConfig, FilterConfig, StalePolicy, DISPLAY_COUNT};
use crate::hardware::{clamp_direction_mv, DirectionChannel, OutputDriver, OutputError};
use crate::model::{wrap360, MeterType};

/// Smallest per-cycle step, so an output at rest can start moving.
pub const MIN_STEP_HZ: f32 = 1.0;

/// Outputs this close to zero with a zero target park the channel.
pub const ZERO_SNAP_HZ: f32 = 0.5;

/// Midpoint of the direction voltage swing.
pub const DIRECTION_CENTER_MV: i32 = 1650;

/// Direction swing amplitude at 100 % gain.
pub const DIRECTION_AMPLITUDE_MV: f32 = 1250.0;

/// Pulse frequency for a speed, clamped to `[0, max_freq_hz]`.
pub fn target_frequency(speed_kn: f32, pulses_per_knot: f32, max_freq_hz: u16) -> f32 {
    let hz = speed_kn * pulses_per_knot;
    if hz.is_finite() {
        hz.clamp(0.0, f32::from(max_freq_hz))
    } else {
        0.0
    }
}

/// Sine/cosine voltage pair for a dial angle.
///
/// `invert` mirrors the dial; `gain_percent` scales the swing around the
/// midpoint. Both voltages are clamped to the safe DAC range.
pub fn direction_millivolts(angle_deg: f32, invert: bool, gain_percent: u16) -> (u16, u16) {
    let angle = if invert {
        wrap360(360.0 - angle_deg)
    } else {
        wrap360(angle_deg)
    };
    let amplitude = DIRECTION_AMPLITUDE_MV * f32::from(gain_percent) / 100.0;
    let radians = angle.to_radians();
    let sine = DIRECTION_CENTER_MV + (amplitude * radians.sin()).round() as i32;
    let cosine = DIRECTION_CENTER_MV + (amplitude * radians.cos()).round() as i32;
    (clamp_direction_mv(sine), clamp_direction_mv(cosine))
}

/// Smoothing, deadband and step limiting for one pulse channel.
///
/// Applied in that order on every cycle. The output approaches the target
/// monotonically and never crosses it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrequencyFilter {
    smoothed_hz: Option<f32>,
    output_hz: f32,
}

impl FrequencyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frequency currently driven.
    pub fn output_hz(&self) -> f32 {
        self.output_hz
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one target and return the new output frequency.
    pub fn step(&mut self, target_hz: f32, config: &FilterConfig) -> f32 {
        let previous = self.smoothed_hz.unwrap_or(self.output_hz);
        let smoothed = config.alpha * previous + (1.0 - config.alpha) * target_hz;
        self.smoothed_hz = Some(smoothed);

        if target_hz <= 0.0 && smoothed < config.deadband_hz.max(ZERO_SNAP_HZ) {
            self.smoothed_hz = Some(0.0);
            self.output_hz = 0.0;
            return self.output_hz;
        }

        let delta = smoothed - self.output_hz;
        if delta.abs() < config.deadband_hz {
            return self.output_hz;
        }

        let max_step = (self.output_hz * config.max_step_percent / 100.0).max(MIN_STEP_HZ);
        self.output_hz = (self.output_hz + delta.clamp(-max_step, max_step)).max(0.0);
        self.output_hz
    }
}

/// What one display update drove.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PulseOutput {
    /// Driven frequency; 0 when the channel is parked or stopped.
    pub frequency_hz: f32,
    pub duty_percent: u8,
    /// Direction voltages written this cycle.
    pub direction_mv: Option<(u16, u16)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    claimed_pin: Option<u8>,
    filter: FrequencyFilter,
    /// Frequency and duty last written; `None` while parked.
    driven: Option<(f32, u8)>,
}

/// Pulse engine driving all display outputs.
pub struct PulseEngine<O: OutputDriver> {
    output: O,
    channels: [Channel; DISPLAY_COUNT],
    /// Display owning the single direction DAC pair.
    direction_owner: Option<usize>,
}

impl<O: OutputDriver> PulseEngine<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            channels: [Channel::default(); DISPLAY_COUNT],
            direction_owner: None,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Whether display `index` holds a pulse channel.
    pub fn is_running(&self, index: usize) -> bool {
        self.channels
            .get(index)
            .map(|c| c.claimed_pin.is_some())
            .unwrap_or(false)
    }

    /// Frequency currently driven by display `index`.
    pub fn frequency_hz(&self, index: usize) -> f32 {
        self.channels
            .get(index)
            .and_then(|c| c.driven)
            .map(|(hz, _)| hz)
            .unwrap_or(0.0)
    }

    /// Claim the pulse channel of display `index`.
    ///
    /// Idempotent: a display already holding the configured pin is left
    /// alone. A display holding a different pin releases it first.
    pub fn start_display(&mut self, index: usize, config: &DisplayConfig) -> Result<(), OutputError> {
        let Some(channel) = self.channels.get_mut(index) else {
            return Ok(());
        };
        if channel.claimed_pin == Some(config.output_pin) {
            return Ok(());
        }
        if let Some(old_pin) = channel.claimed_pin.take() {
            self.output.disable_output(old_pin);
            self.output.release_pulse_channel(old_pin);
        }
        channel.filter.reset();
        channel.driven = None;
        self.output.claim_pulse_channel(config.output_pin)?;
        channel.claimed_pin = Some(config.output_pin);
        Ok(())
    }

    /// Release the pulse channel of display `index`. Idempotent.
    pub fn stop_display(&mut self, index: usize) {
        let Some(channel) = self.channels.get_mut(index) else {
            return;
        };
        if let Some(pin) = channel.claimed_pin.take() {
            self.output.disable_output(pin);
            self.output.release_pulse_channel(pin);
        }
        channel.filter.reset();
        channel.driven = None;
        if self.direction_owner == Some(index) {
            self.direction_owner = None;
        }
    }

    /// Recompute and drive display `index` from a snapshot of its state.
    pub fn update_display_pulse(
        &mut self,
        index: usize,
        display: &Display,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> Result<PulseOutput, OutputError> {
        let config = &display.config;
        if index >= DISPLAY_COUNT || !config.enabled {
            self.stop_display(index);
            return Ok(PulseOutput::default());
        }
        self.start_display(index, config)?;

        // a frozen display holds its reading however old it gets
        let stale = !config.freeze && display.reading.is_stale(now_ms, stale_after_ms);
        let speed_kn = match (stale, config.stale_policy) {
            (true, StalePolicy::Zero) => 0.0,
            _ => display.reading.current_speed_kn,
        };

        let mut result = PulseOutput {
            duty_percent: config.duty_percent,
            ..Default::default()
        };

        if config.meter_type == MeterType::LogicWind && self.owns_direction(index) {
            let angle = config.calibrated_angle(display.reading.current_angle_deg);
            let (sine, cosine) = direction_millivolts(angle, config.invert, config.gain_percent);
            self.output.set_direction_voltage(DirectionChannel::Sine, sine);
            self.output.set_direction_voltage(DirectionChannel::Cosine, cosine);
            result.direction_mv = Some((sine, cosine));
        } else if self.direction_owner == Some(index) {
            self.direction_owner = None;
        }

        let target = target_frequency(speed_kn, config.pulses_per_knot, config.max_freq_hz);
        let channel = &mut self.channels[index];
        let hz = channel.filter.step(target, &config.filter);
        let desired = (hz > 0.0).then_some((hz, config.duty_percent));

        if desired != channel.driven {
            let pin = config.output_pin;
            match desired {
                Some((hz, duty)) => self.output.set_pulse_output(pin, hz, duty)?,
                None => self.output.disable_output(pin),
            }
            channel.driven = desired;
        }

        result.frequency_hz = hz;
        Ok(result)
    }

    /// The lowest-indexed running Logic Wind display owns the DAC pair.
    fn owns_direction(&mut self, index: usize) -> bool {
        match self.direction_owner {
            Some(owner) if owner == index => true,
            Some(owner) if owner < index && self.is_running(owner) => false,
            _ => {
                self.direction_owner = Some(index);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayReading;
    use crate::hardware::MemoryOutput;
    use proptest::prelude::*;

    fn sumlog(enabled: bool) -> Display {
        Display::new(DisplayConfig {
            enabled,
            pulses_per_knot: 2.0,
            max_freq_hz: 100,
            ..DisplayConfig::for_display(0)
        })
    }

    #[test]
    fn test_target_frequency_clamps() {
        assert_eq!(target_frequency(10.0, 2.0, 150), 20.0);
        assert_eq!(target_frequency(100.0, 2.0, 150), 150.0);
        assert_eq!(target_frequency(-3.0, 2.0, 150), 0.0);
        assert_eq!(target_frequency(f32::NAN, 2.0, 150), 0.0);
    }

    #[test]
    fn test_direction_voltages() {
        assert_eq!(direction_millivolts(0.0, false, 100), (1650, 2900));
        assert_eq!(direction_millivolts(90.0, false, 100), (2900, 1650));
        assert_eq!(direction_millivolts(90.0, true, 100), (400, 1650));
        assert_eq!(direction_millivolts(0.0, false, 200), (1650, 3100));
        assert_eq!(direction_millivolts(180.0, false, 200), (1650, 200));
    }

    #[test]
    fn test_deadband_retains_output() {
        let config = FilterConfig {
            alpha: 0.1,
            deadband_hz: 2.0,
            max_step_percent: 100.0,
        };
        let mut filter = FrequencyFilter::new();
        for _ in 0..50 {
            filter.step(20.0, &config);
        }
        let settled = filter.output_hz();
        assert_eq!(filter.step(21.0, &config), settled);
    }

    #[test]
    fn test_step_limit() {
        let config = FilterConfig {
            alpha: 0.1,
            deadband_hz: 0.0,
            max_step_percent: 10.0,
        };
        let mut filter = FrequencyFilter::new();
        assert_eq!(filter.step(100.0, &config), MIN_STEP_HZ);
        for _ in 0..30 {
            let before = filter.output_hz();
            let after = filter.step(100.0, &config);
            assert!(after - before <= (before * 0.1).max(MIN_STEP_HZ) + 1.0e-4);
        }
    }

    #[test]
    fn test_zero_target_parks() {
        let config = FilterConfig::default();
        let mut filter = FrequencyFilter::new();
        for _ in 0..100 {
            filter.step(40.0, &config);
        }
        let mut cycles = 0;
        while filter.step(0.0, &config) > 0.0 {
            cycles += 1;
            assert!(cycles < 200);
        }
        assert_eq!(filter.output_hz(), 0.0);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let display = sumlog(true);

        engine.start_display(0, &display.config).unwrap();
        engine.start_display(0, &display.config).unwrap();
        assert_eq!(engine.output().claims.get(&14), Some(&1));

        engine.stop_display(0);
        engine.stop_display(0);
        assert_eq!(engine.output().releases.get(&14), Some(&1));
        assert!(!engine.is_running(0));
    }

    #[test]
    fn test_pin_change_releases_old_pin() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = sumlog(true);
        engine.start_display(0, &display.config).unwrap();

        display.config.output_pin = 25;
        engine.start_display(0, &display.config).unwrap();

        assert!(!engine.output().is_claimed(14));
        assert!(engine.output().is_claimed(25));
    }

    #[test]
    fn test_disabled_display_releases_channel() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = sumlog(true);
        display.record(Some(10.0), None, 0);
        engine.update_display_pulse(0, &display, 0, 10_000).unwrap();
        assert!(engine.output().is_claimed(14));

        display.config.enabled = false;
        let out = engine.update_display_pulse(0, &display, 0, 10_000).unwrap();
        assert_eq!(out.frequency_hz, 0.0);
        assert!(!engine.output().is_claimed(14));
    }

    #[test]
    fn test_update_drives_pulse_and_skips_unchanged() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = sumlog(true);
        display.config.filter = FilterConfig {
            alpha: 0.1,
            deadband_hz: 0.5,
            max_step_percent: 100.0,
        };
        display.record(Some(10.0), None, 0);

        for _ in 0..40 {
            engine.update_display_pulse(0, &display, 0, 10_000).unwrap();
        }
        let hz = engine.output().frequency(14).unwrap();
        assert!((hz - 20.0).abs() < 0.5);

        let writes = engine.output().pulse_writes;
        engine.update_display_pulse(0, &display, 0, 10_000).unwrap();
        assert_eq!(engine.output().pulse_writes, writes);
    }

    #[test]
    fn test_stale_zero_policy_parks_channel() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = sumlog(true);
        display.config.stale_policy = StalePolicy::Zero;
        display.record(Some(10.0), None, 0);

        for _ in 0..20 {
            engine.update_display_pulse(0, &display, 1_000, 10_000).unwrap();
        }
        assert!(engine.output().frequency(14).is_some());

        for _ in 0..200 {
            engine.update_display_pulse(0, &display, 60_000, 10_000).unwrap();
        }
        assert_eq!(engine.output().frequency(14), None);
        assert!(engine.output().is_claimed(14));
    }

    #[test]
    fn test_frozen_display_holds_when_stale() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = sumlog(true);
        display.config.stale_policy = StalePolicy::Zero;
        display.record(Some(10.0), None, 0);
        display.config.freeze = true;

        for _ in 0..200 {
            engine.update_display_pulse(0, &display, 1_000, 10_000).unwrap();
        }
        let held = engine.output().frequency(14).unwrap();

        for _ in 0..200 {
            engine.update_display_pulse(0, &display, 60_000, 10_000).unwrap();
        }
        let hz = engine.output().frequency(14).unwrap();
        assert!((hz - held).abs() < 0.5);
        assert!(engine.output().is_claimed(14));
    }

    #[test]
    fn test_logic_wind_direction_applies_offset() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let mut display = Display::new(DisplayConfig {
            enabled: true,
            meter_type: MeterType::LogicWind,
            offset_deg: 45,
            ..DisplayConfig::for_display(0)
        });
        display.reading = DisplayReading {
            current_speed_kn: 0.0,
            current_angle_deg: 45.0,
            last_update_ms: Some(0),
        };

        let out = engine.update_display_pulse(0, &display, 0, 10_000).unwrap();
        assert_eq!(out.direction_mv, Some((2900, 1650)));
        assert_eq!(
            engine.output().direction_mv.get(&DirectionChannel::Sine),
            Some(&2900)
        );
    }

    #[test]
    fn test_first_logic_wind_owns_direction() {
        let mut engine = PulseEngine::new(MemoryOutput::new());
        let first = Display::new(DisplayConfig {
            enabled: true,
            meter_type: MeterType::LogicWind,
            ..DisplayConfig::for_display(0)
        });
        let second = Display::new(DisplayConfig {
            enabled: true,
            meter_type: MeterType::LogicWind,
            ..DisplayConfig::for_display(1)
        });

        engine.update_display_pulse(0, &first, 0, 10_000).unwrap();
        let out = engine.update_display_pulse(1, &second, 0, 10_000).unwrap();
        assert_eq!(out.direction_mv, None);

        engine.stop_display(0);
        let out = engine.update_display_pulse(1, &second, 0, 10_000).unwrap();
        assert!(out.direction_mv.is_some());
    }

    proptest! {
        #[test]
        fn filter_converges_without_overshoot(
            target in 0.0f32..500.0,
            alpha in 0.1f32..0.9,
            deadband in 0.0f32..2.0,
            max_step in 1.0f32..100.0,
        ) {
            let config = FilterConfig { alpha, deadband_hz: deadband, max_step_percent: max_step };
            let mut filter = FrequencyFilter::new();
            for _ in 0..1000 {
                let out = filter.step(target, &config);
                prop_assert!(out <= target + 1.0e-3 * target.max(1.0));
            }
            let err = (filter.output_hz() - target).abs();
            prop_assert!(err <= deadband.max(ZERO_SNAP_HZ) + 1.0e-3 * target.max(1.0));
        }
    }
}
