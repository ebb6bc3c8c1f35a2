//! Wind data aggregation.
//!
//! Holds the latest apparent wind, true wind, ground track and heading with
//! their receive times, and derives the quantities the instruments do not
//! send directly:
//! - True wind, by subtracting the vessel's motion from the apparent wind
//! - VMG, by projecting boat speed onto the true wind angle
//!
//! Derived values are only produced from inputs younger than the staleness
//! threshold. A failed derivation leaves the previous result in place, aging.

use serde::{Deserialize, Serialize};

use crate::model::{
    wrap360, HeadingSample, NavSample, Sample, SentenceKind, WindReference, WindSample,
};

/// Default staleness threshold for derived quantities.
pub const DEFAULT_STALE_AFTER_MS: u64 = 10_000;

/// A value with its receive time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timed {
    pub value: f32,
    pub timestamp_ms: u64,
}

impl Timed {
    fn fresh(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= stale_after_ms
    }
}

/// Subtract the vessel's motion from an apparent wind vector.
///
/// `track_offset_deg` is the direction of travel relative to the bow
/// (COG minus heading; 0 without a heading). Returns `(speed, angle)` with
/// the angle relative to the bow in `[0, 360)`.
pub fn true_wind(
    apparent_speed_kn: f32,
    apparent_angle_deg: f32,
    boat_speed_kn: f32,
    track_offset_deg: f32,
) -> (f32, f32) {
    let awa = apparent_angle_deg.to_radians();
    let beta = track_offset_deg.to_radians();
    let x = apparent_speed_kn * awa.cos() - boat_speed_kn * beta.cos();
    let y = apparent_speed_kn * awa.sin() - boat_speed_kn * beta.sin();
    let speed = x.hypot(y);
    if speed < 1.0e-4 {
        return (0.0, 0.0);
    }
    (speed, wrap360(y.atan2(x).to_degrees()))
}

/// Velocity made good toward the wind; negative when sailing away from it.
pub fn velocity_made_good(boat_speed_kn: f32, true_angle_deg: f32) -> f32 {
    boat_speed_kn * true_angle_deg.to_radians().cos()
}

/// Latest wind and navigation quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindAggregator {
    pub apparent: Option<WindSample>,
    /// True wind as sent by an instrument (MWV(T) or VWT).
    pub true_native: Option<WindSample>,
    /// True wind derived from apparent wind and ground track.
    pub true_computed: Option<WindSample>,
    pub sog: Option<Timed>,
    pub cog: Option<Timed>,
    pub heading: Option<HeadingSample>,
    /// Signed VMG.
    pub vmg: Option<Timed>,
    pub stale_after_ms: u64,
}

impl Default for WindAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER_MS)
    }
}

impl WindAggregator {
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            apparent: None,
            true_native: None,
            true_computed: None,
            sog: None,
            cog: None,
            heading: None,
            vmg: None,
            stale_after_ms,
        }
    }

    /// Store a decoded sample.
    ///
    /// Ground track values missing from a sentence keep their previous
    /// value; only present values are refreshed.
    pub fn record(&mut self, sample: &Sample) {
        match sample {
            Sample::Wind(wind) => match wind.reference {
                WindReference::Relative => self.apparent = Some(*wind),
                WindReference::True => self.true_native = Some(*wind),
            },
            Sample::Nav(nav) => self.record_nav(nav),
            Sample::Heading(heading) => self.heading = Some(*heading),
        }
    }

    fn record_nav(&mut self, nav: &NavSample) {
        if let Some(sog) = nav.sog_kn {
            self.sog = Some(Timed {
                value: sog.max(0.0),
                timestamp_ms: nav.timestamp_ms,
            });
        }
        if let Some(cog) = nav.cog_deg {
            self.cog = Some(Timed {
                value: wrap360(cog),
                timestamp_ms: nav.timestamp_ms,
            });
        }
    }

    fn is_fresh(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(timestamp_ms) <= self.stale_after_ms
    }

    /// Whether an instrument-sent true wind with a speed is current.
    pub fn has_fresh_native_true(&self, now_ms: u64) -> bool {
        self.true_native
            .map(|w| w.speed_kn.is_some() && self.is_fresh(w.timestamp_ms, now_ms))
            .unwrap_or(false)
    }

    /// Derive true wind from the latest apparent wind and ground track.
    ///
    /// Returns `None` and keeps the previous result when the apparent wind
    /// (with speed) or SOG is missing or stale.
    pub fn calculate_true_wind(&mut self, now_ms: u64) -> Option<WindSample> {
        let apparent = self
            .apparent
            .filter(|w| self.is_fresh(w.timestamp_ms, now_ms))?;
        let apparent_speed = apparent.speed_kn?;
        let sog = self.sog.filter(|s| s.fresh(now_ms, self.stale_after_ms))?;

        let cog = self.cog.filter(|c| c.fresh(now_ms, self.stale_after_ms));
        let heading = self
            .heading
            .filter(|h| self.is_fresh(h.timestamp_ms, now_ms));
        let track_offset = match (cog, heading) {
            (Some(cog), Some(heading)) => cog.value - heading.heading_deg,
            _ => 0.0,
        };

        let (speed, angle) = true_wind(apparent_speed, apparent.angle_deg, sog.value, track_offset);
        let sample = WindSample {
            speed_kn: Some(speed),
            angle_deg: angle,
            reference: WindReference::True,
            source: None,
            timestamp_ms: now_ms,
        };
        self.true_computed = Some(sample);
        Some(sample)
    }

    /// Most recent fresh true wind, preferring the instrument's own.
    pub fn current_true_wind(&self, now_ms: u64) -> Option<WindSample> {
        [self.true_native, self.true_computed]
            .into_iter()
            .flatten()
            .find(|w| w.speed_kn.is_some() && self.is_fresh(w.timestamp_ms, now_ms))
    }

    /// Derive signed VMG from boat speed and true wind angle.
    ///
    /// Returns `None` when true wind or SOG is unavailable.
    pub fn calculate_vmg(&mut self, now_ms: u64) -> Option<f32> {
        let true_wind = self.current_true_wind(now_ms)?;
        let sog = self.sog.filter(|s| s.fresh(now_ms, self.stale_after_ms))?;
        let vmg = velocity_made_good(sog.value, true_wind.angle_deg);
        self.vmg = Some(Timed {
            value: vmg,
            timestamp_ms: now_ms,
        });
        Some(vmg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HeadingReference;

    fn apparent(speed: f32, angle: f32, at: u64) -> Sample {
        Sample::Wind(WindSample {
            speed_kn: Some(speed),
            angle_deg: angle,
            reference: WindReference::Relative,
            source: Some(SentenceKind::Mwv),
            timestamp_ms: at,
        })
    }

    fn nav(sog: f32, cog: f32, at: u64) -> Sample {
        Sample::Nav(NavSample {
            sog_kn: Some(sog),
            cog_deg: Some(cog),
            timestamp_ms: at,
        })
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_true_wind_head_to_wind_cancels() {
        let (speed, angle) = true_wind(6.0, 0.0, 6.0, 0.0);
        assert_eq!((speed, angle), (0.0, 0.0));
    }

    #[test]
    fn test_true_wind_beam_reach() {
        let (speed, angle) = true_wind(10.0, 90.0, 6.0, 0.0);
        assert!(close(speed, 11.662));
        assert!(close(angle, 120.964));
    }

    #[test]
    fn test_true_wind_port_side() {
        let (speed, angle) = true_wind(10.0, 270.0, 6.0, 0.0);
        assert!(close(speed, 11.662));
        assert!(close(angle, 239.036));
    }

    #[test]
    fn test_vmg_sign() {
        assert!(close(velocity_made_good(6.0, 0.0), 6.0));
        assert!(close(velocity_made_good(6.0, 180.0), -6.0));
        assert!(close(velocity_made_good(6.0, 90.0), 0.0));
    }

    #[test]
    fn test_calculate_true_wind_requires_gps() {
        let mut agg = WindAggregator::default();
        agg.record(&apparent(10.0, 90.0, 1_000));
        assert_eq!(agg.calculate_true_wind(1_000), None);

        agg.record(&nav(6.0, 0.0, 1_000));
        let wind = agg.calculate_true_wind(1_000).unwrap();
        assert!(close(wind.speed_kn.unwrap(), 11.662));
        assert_eq!(wind.reference, WindReference::True);
        assert_eq!(wind.source, None);
    }

    #[test]
    fn test_calculate_true_wind_stale_keeps_previous() {
        let mut agg = WindAggregator::default();
        agg.record(&apparent(10.0, 90.0, 0));
        agg.record(&nav(6.0, 0.0, 0));
        let first = agg.calculate_true_wind(0).unwrap();

        assert_eq!(agg.calculate_true_wind(10_001), None);
        assert_eq!(agg.true_computed, Some(first));
    }

    #[test]
    fn test_heading_rotates_track() {
        let mut agg = WindAggregator::default();
        agg.record(&apparent(10.0, 90.0, 0));
        agg.record(&nav(6.0, 90.0, 0));
        agg.record(&Sample::Heading(HeadingSample {
            heading_deg: 90.0,
            reference: HeadingReference::True,
            timestamp_ms: 0,
        }));
        let aligned = agg.calculate_true_wind(0).unwrap();

        agg.record(&Sample::Heading(HeadingSample {
            heading_deg: 0.0,
            reference: HeadingReference::True,
            timestamp_ms: 0,
        }));
        let crabbing = agg.calculate_true_wind(0).unwrap();

        assert!(close(aligned.angle_deg, 120.964));
        // track toward the wind side cancels part of it
        assert!(close(crabbing.angle_deg, 90.0));
        assert!(close(crabbing.speed_kn.unwrap(), 4.0));
    }

    #[test]
    fn test_missing_nav_fields_keep_previous() {
        let mut agg = WindAggregator::default();
        agg.record(&nav(6.0, 45.0, 0));
        agg.record(&Sample::Nav(NavSample {
            sog_kn: Some(5.0),
            cog_deg: None,
            timestamp_ms: 100,
        }));
        assert_eq!(agg.sog.map(|s| s.value), Some(5.0));
        assert_eq!(agg.cog.map(|c| c.value), Some(45.0));
    }

    #[test]
    fn test_vmg_requires_true_wind() {
        let mut agg = WindAggregator::default();
        agg.record(&nav(6.0, 0.0, 0));
        assert_eq!(agg.calculate_vmg(0), None);

        agg.record(&apparent(10.0, 90.0, 0));
        agg.calculate_true_wind(0);
        let vmg = agg.calculate_vmg(0).unwrap();
        assert!(close(vmg, -3.087));
    }

    #[test]
    fn test_native_true_wind_preferred() {
        let mut agg = WindAggregator::default();
        agg.record(&Sample::Wind(WindSample {
            speed_kn: Some(10.0),
            angle_deg: 0.0,
            reference: WindReference::True,
            source: Some(SentenceKind::Mwv),
            timestamp_ms: 0,
        }));
        agg.record(&apparent(10.0, 90.0, 0));
        agg.record(&nav(6.0, 0.0, 0));
        agg.calculate_true_wind(0);

        assert!(agg.has_fresh_native_true(0));
        assert_eq!(agg.current_true_wind(0).unwrap().angle_deg, 0.0);
    }

    #[test]
    fn test_native_true_wind_without_speed_ignored() {
        let mut agg = WindAggregator::default();
        agg.record(&Sample::Wind(WindSample {
            speed_kn: None,
            angle_deg: 30.0,
            reference: WindReference::True,
            source: Some(SentenceKind::Mwv),
            timestamp_ms: 0,
        }));
        agg.record(&apparent(10.0, 90.0, 0));
        agg.record(&nav(6.0, 0.0, 0));
        agg.calculate_true_wind(0);

        assert!(!agg.has_fresh_native_true(0));
        assert!(close(agg.current_true_wind(0).unwrap().speed_kn.unwrap(), 11.662));
    }
}
