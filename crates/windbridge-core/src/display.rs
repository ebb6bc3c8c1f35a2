//! Per-display configuration and runtime readings.
//!
//! The bridge drives exactly [`DISPLAY_COUNT`] gauge outputs. Each has a
//! [`DisplayConfig`] written by configuration writers and a
//! [`DisplayReading`] written by the aggregator.
//!
//! Out-of-range configuration values are clamped into their valid domain
//! rather than rejected, so a bad write can never leave a gauge
//! uncontrollable.

use serde::{Deserialize, Serialize};

use crate::model::{wrap360, DataType, MeterType};

/// Number of display outputs.
pub const DISPLAY_COUNT: usize = 3;

/// Valid range for `offset_deg`.
pub const OFFSET_RANGE: (i16, i16) = (-180, 180);
/// Valid range for `max_freq_hz`.
pub const MAX_FREQ_RANGE: (u16, u16) = (10, 500);
/// Valid range for `duty_percent`.
pub const DUTY_RANGE: (u8, u8) = (1, 99);
/// Valid range for the smoothing coefficient.
pub const ALPHA_RANGE: (f32, f32) = (0.1, 0.9);
/// Lower bound for `pulses_per_knot`.
pub const MIN_PULSES_PER_KNOT: f32 = 0.01;
/// Upper bound for `pulses_per_knot`.
pub const MAX_PULSES_PER_KNOT: f32 = 100.0;
/// Highest valid output pin.
pub const MAX_OUTPUT_PIN: u8 = 39;
/// Valid range for the direction gain.
pub const GAIN_RANGE: (u16, u16) = (10, 200);

/// Frequency filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Exponential smoothing weight of the previous value (0.1-0.9).
    pub alpha: f32,
    /// Changes smaller than this (Hz) do not reach the hardware.
    pub deadband_hz: f32,
    /// Largest per-cycle change, as a percentage of the previous output.
    pub max_step_percent: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            deadband_hz: 0.5,
            max_step_percent: 15.0,
        }
    }
}

impl FilterConfig {
    /// Clamp every parameter into its valid domain.
    pub fn clamp(&mut self) {
        let defaults = Self::default();
        self.alpha = clamp_f32(self.alpha, ALPHA_RANGE.0, ALPHA_RANGE.1, defaults.alpha);
        self.deadband_hz = clamp_f32(self.deadband_hz, 0.0, 50.0, defaults.deadband_hz);
        self.max_step_percent =
            clamp_f32(self.max_step_percent, 1.0, 100.0, defaults.max_step_percent);
    }
}

/// What a display does once its data goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StalePolicy {
    /// Keep showing the last valid reading.
    #[default]
    Hold,
    /// Drive the speed to zero (parks the pulse channel).
    Zero,
}

/// Configuration of one display output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub meter_type: MeterType,
    pub data_type: DataType,
    /// Direction calibration, degrees (-180..=180).
    pub offset_deg: i16,
    /// Pulses per knot of speed.
    pub pulses_per_knot: f32,
    /// Frequency ceiling protecting the meter (10..=500 Hz).
    pub max_freq_hz: u16,
    /// Pulse duty cycle (1..=99 %).
    pub duty_percent: u8,
    /// Output pin of the pulse channel.
    pub output_pin: u8,
    /// Test angle used by the manual "go to angle" tool (0..=359).
    pub manual_test_angle: u16,
    /// Mirror the direction output.
    pub invert: bool,
    /// Direction amplitude gain in percent.
    pub gain_percent: u16,
    /// Ignore incoming NMEA data while set.
    pub freeze: bool,
    pub stale_policy: StalePolicy,
    pub filter: FilterConfig,
    /// Legacy sentence selector ("MWV", "VWR", "VWT").
    ///
    /// Only consulted when a stored configuration carries no `dataType`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self::for_display(0)
    }
}

impl DisplayConfig {
    /// Factory defaults for the display at `index` (0-based).
    pub fn for_display(index: usize) -> Self {
        Self {
            enabled: false,
            meter_type: MeterType::Sumlog,
            data_type: DataType::ApparentWind,
            offset_deg: 0,
            pulses_per_knot: 1.0,
            max_freq_hz: 150,
            duty_percent: 10,
            output_pin: 12 + 2 * (index as u8 + 1),
            manual_test_angle: 0,
            invert: false,
            gain_percent: 100,
            freeze: false,
            stale_policy: StalePolicy::Hold,
            filter: FilterConfig::default(),
            sentence: None,
        }
    }

    /// Clamp every field into its valid domain.
    pub fn clamp(&mut self) {
        let defaults = Self::default();
        self.offset_deg = self.offset_deg.clamp(OFFSET_RANGE.0, OFFSET_RANGE.1);
        self.pulses_per_knot = clamp_f32(
            self.pulses_per_knot,
            MIN_PULSES_PER_KNOT,
            MAX_PULSES_PER_KNOT,
            defaults.pulses_per_knot,
        );
        self.max_freq_hz = self.max_freq_hz.clamp(MAX_FREQ_RANGE.0, MAX_FREQ_RANGE.1);
        self.duty_percent = self.duty_percent.clamp(DUTY_RANGE.0, DUTY_RANGE.1);
        self.output_pin = self.output_pin.min(MAX_OUTPUT_PIN);
        self.manual_test_angle = self.manual_test_angle.min(359);
        self.gain_percent = self.gain_percent.clamp(GAIN_RANGE.0, GAIN_RANGE.1);
        self.filter.clamp();
    }

    /// Builder-style [`clamp`](Self::clamp).
    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }

    /// Apply the calibration offset to a raw angle.
    pub fn calibrated_angle(&self, angle_deg: f32) -> f32 {
        wrap360(angle_deg + f32::from(self.offset_deg))
    }
}

/// Runtime reading of one display, written by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayReading {
    pub current_speed_kn: f32,
    pub current_angle_deg: f32,
    /// Time of the last data update; `None` until the first one.
    pub last_update_ms: Option<u64>,
}

impl DisplayReading {
    /// Whether the reading is older than `stale_after_ms`.
    pub fn is_stale(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        match self.last_update_ms {
            Some(at) => now_ms.saturating_sub(at) > stale_after_ms,
            None => true,
        }
    }
}

/// Configuration and reading of one display.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    pub config: DisplayConfig,
    pub reading: DisplayReading,
}

impl Display {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            reading: DisplayReading::default(),
        }
    }

    /// Write a new reading, keeping the previous speed when none is given.
    pub fn record(&mut self, speed_kn: Option<f32>, angle_deg: Option<f32>, now_ms: u64) {
        if let Some(speed) = speed_kn {
            self.reading.current_speed_kn = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        }
        if let Some(angle) = angle_deg {
            self.reading.current_angle_deg = wrap360(angle);
        }
        self.reading.last_update_ms = Some(now_ms);
    }
}

fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_per_display() {
        assert_eq!(DisplayConfig::for_display(0).output_pin, 14);
        assert_eq!(DisplayConfig::for_display(1).output_pin, 16);
        assert_eq!(DisplayConfig::for_display(2).output_pin, 18);
        assert_eq!(DisplayConfig::for_display(2).max_freq_hz, 150);
    }

    #[test]
    fn test_clamp_out_of_range() {
        let config = DisplayConfig {
            offset_deg: 300,
            pulses_per_knot: -4.0,
            max_freq_hz: 5000,
            duty_percent: 0,
            manual_test_angle: 720,
            gain_percent: 1,
            filter: FilterConfig {
                alpha: 2.0,
                deadband_hz: -1.0,
                max_step_percent: f32::NAN,
            },
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.offset_deg, 180);
        assert_eq!(config.pulses_per_knot, MIN_PULSES_PER_KNOT);
        assert_eq!(config.max_freq_hz, 500);
        assert_eq!(config.duty_percent, 1);
        assert_eq!(config.manual_test_angle, 359);
        assert_eq!(config.gain_percent, 10);
        assert_eq!(
            config.filter,
            FilterConfig {
                alpha: 0.9,
                deadband_hz: 0.0,
                max_step_percent: 15.0,
            }
        );
    }

    #[test]
    fn test_calibrated_angle_wraps() {
        let config = DisplayConfig {
            offset_deg: -90,
            ..Default::default()
        };
        assert_eq!(config.calibrated_angle(45.0), 315.0);
        assert_eq!(config.calibrated_angle(90.0), 0.0);
    }

    #[test]
    fn test_record_keeps_speed_when_absent() {
        let mut display = Display::default();
        display.record(Some(12.5), Some(45.0), 100);
        display.record(None, Some(370.0), 200);

        assert_eq!(display.reading.current_speed_kn, 12.5);
        assert_eq!(display.reading.current_angle_deg, 10.0);
        assert_eq!(display.reading.last_update_ms, Some(200));
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: DisplayConfig =
            serde_json::from_str(r#"{"enabled":true,"meterType":"logicwind"}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.meter_type, MeterType::LogicWind);
        assert_eq!(config.filter, FilterConfig::default());
        assert_eq!(config.duty_percent, 10);
    }

    #[test]
    fn test_staleness() {
        let reading = DisplayReading {
            last_update_ms: Some(1_000),
            ..Default::default()
        };
        assert!(!reading.is_stale(5_000, 10_000));
        assert!(reading.is_stale(11_001, 10_000));
        assert!(DisplayReading::default().is_stale(0, 10_000));
    }
}
