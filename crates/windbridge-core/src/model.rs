//! Wind bridge data model types.
//!
//! These types represent the decoded quantities flowing through the bridge:
//! - Wind samples (apparent or true, from MWV/VWR/VWT or computed)
//! - Navigation samples (SOG/COG from RMC/VTG)
//! - Heading samples (HDT/HDM)
//! - Display categories used to route samples to gauges
//!
//! All timestamps are milliseconds on a monotonic clock supplied by the caller.

use serde::{Deserialize, Serialize};

/// Knots per metre-per-second.
pub const KN_PER_MS: f32 = 1.943_844;

/// Kilometres-per-hour per knot.
pub const KMH_PER_KN: f32 = 1.852;

/// Wrap an angle in degrees into `[0, 360)`.
///
/// Non-finite input maps to 0.
pub fn wrap360(deg: f32) -> f32 {
    if !deg.is_finite() {
        return 0.0;
    }
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle in degrees into `[-180, 180)`.
pub fn wrap180(deg: f32) -> f32 {
    let wrapped = wrap360(deg);
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// NMEA 0183 sentence kinds consumed by the bridge.
///
/// Only the formatter (last three characters of the address field) is
/// significant; the talker prefix is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceKind {
    /// Wind speed and angle, relative or true.
    Mwv,
    /// Relative wind speed and angle with L/R hemisphere.
    Vwr,
    /// True wind speed and angle with L/R hemisphere.
    Vwt,
    /// Recommended minimum navigation data.
    Rmc,
    /// Track made good and ground speed.
    Vtg,
    /// Heading, true.
    Hdt,
    /// Heading, magnetic.
    Hdm,
}

impl SentenceKind {
    /// All consumed kinds.
    pub const ALL: [SentenceKind; 7] = [
        SentenceKind::Mwv,
        SentenceKind::Vwr,
        SentenceKind::Vwt,
        SentenceKind::Rmc,
        SentenceKind::Vtg,
        SentenceKind::Hdt,
        SentenceKind::Hdm,
    ];

    /// Look up a kind by its three-letter formatter.
    pub fn from_formatter(formatter: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(formatter))
    }

    /// The three-letter formatter.
    pub fn as_str(&self) -> &'static str {
        match self {
            SentenceKind::Mwv => "MWV",
            SentenceKind::Vwr => "VWR",
            SentenceKind::Vwt => "VWT",
            SentenceKind::Rmc => "RMC",
            SentenceKind::Vtg => "VTG",
            SentenceKind::Hdt => "HDT",
            SentenceKind::Hdm => "HDM",
        }
    }
}

impl std::fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference frame of a wind angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindReference {
    /// Relative to the bow, uncorrected for vessel motion (apparent).
    Relative,
    /// Corrected for vessel motion.
    True,
}

impl WindReference {
    /// Parse the NMEA reference letter (`R` or `T`).
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "R" | "r" => Some(WindReference::Relative),
            "T" | "t" => Some(WindReference::True),
            _ => None,
        }
    }
}

/// A decoded or computed wind observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindSample {
    /// Wind speed in knots, absent when the sentence carried no speed.
    pub speed_kn: Option<f32>,
    /// Wind angle in degrees, always within `[0, 360)`.
    pub angle_deg: f32,
    /// Reference frame of the angle.
    pub reference: WindReference,
    /// Sentence the sample came from (`None` when computed).
    pub source: Option<SentenceKind>,
    /// Monotonic receive time.
    pub timestamp_ms: u64,
}

/// A decoded ground-track observation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavSample {
    /// Speed over ground in knots.
    pub sog_kn: Option<f32>,
    /// Course over ground, true, in degrees.
    pub cog_deg: Option<f32>,
    /// Monotonic receive time.
    pub timestamp_ms: u64,
}

/// Whether a heading is referenced to true or magnetic north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeadingReference {
    True,
    Magnetic,
}

/// A decoded vessel heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadingSample {
    /// Heading in degrees, within `[0, 360)`.
    pub heading_deg: f32,
    pub reference: HeadingReference,
    /// Monotonic receive time.
    pub timestamp_ms: u64,
}

/// One decoded sentence payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Wind(WindSample),
    Nav(NavSample),
    Heading(HeadingSample),
}

/// Gauge family driven by a display output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterType {
    /// Direction (DAC voltage pair) plus speed (pulse train).
    #[serde(alias = "logic_wind")]
    LogicWind,
    /// Speed only (pulse train).
    #[default]
    Sumlog,
}

/// Quantity a display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    #[default]
    ApparentWind,
    TrueWind,
    Vmg,
    /// Reserved; never populated.
    GroundWind,
    Sog,
    Cog,
}

impl DataType {
    /// Whether a received wind sentence feeds this category.
    ///
    /// Computed true wind and VMG are routed separately by the aggregator.
    pub fn accepts_wind(&self, kind: SentenceKind, reference: WindReference) -> bool {
        match self {
            DataType::ApparentWind => matches!(
                (kind, reference),
                (SentenceKind::Mwv, WindReference::Relative) | (SentenceKind::Vwr, _)
            ),
            DataType::TrueWind => matches!(
                (kind, reference),
                (SentenceKind::Mwv, WindReference::True) | (SentenceKind::Vwt, _)
            ),
            _ => false,
        }
    }

    /// Map a legacy `sentence` selector onto a category.
    ///
    /// `MWV` and `VWR` meant apparent wind, `VWT` meant true wind.
    pub fn from_legacy_sentence(sentence: &str) -> Option<Self> {
        match SentenceKind::from_formatter(sentence.trim())? {
            SentenceKind::Mwv | SentenceKind::Vwr => Some(DataType::ApparentWind),
            SentenceKind::Vwt => Some(DataType::TrueWind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap360() {
        assert_eq!(wrap360(0.0), 0.0);
        assert_eq!(wrap360(360.0), 0.0);
        assert_eq!(wrap360(-90.0), 270.0);
        assert_eq!(wrap360(725.0), 5.0);
        assert_eq!(wrap360(f32::NAN), 0.0);
        assert_eq!(wrap360(-1.0e-9), 0.0);
    }

    #[test]
    fn test_wrap180() {
        assert_eq!(wrap180(190.0), -170.0);
        assert_eq!(wrap180(-190.0), 170.0);
        assert_eq!(wrap180(45.0), 45.0);
    }

    #[test]
    fn test_formatter_lookup() {
        assert_eq!(SentenceKind::from_formatter("MWV"), Some(SentenceKind::Mwv));
        assert_eq!(SentenceKind::from_formatter("hdm"), Some(SentenceKind::Hdm));
        assert_eq!(SentenceKind::from_formatter("GGA"), None);
    }

    #[test]
    fn test_category_routing() {
        use SentenceKind::*;
        use WindReference::*;

        assert!(DataType::ApparentWind.accepts_wind(Mwv, Relative));
        assert!(DataType::ApparentWind.accepts_wind(Vwr, Relative));
        assert!(!DataType::ApparentWind.accepts_wind(Mwv, True));
        assert!(DataType::TrueWind.accepts_wind(Mwv, True));
        assert!(DataType::TrueWind.accepts_wind(Vwt, True));
        assert!(!DataType::Vmg.accepts_wind(Mwv, Relative));
        assert!(!DataType::GroundWind.accepts_wind(Mwv, True));
    }

    #[test]
    fn test_legacy_sentence_mapping() {
        assert_eq!(DataType::from_legacy_sentence("MWV"), Some(DataType::ApparentWind));
        assert_eq!(DataType::from_legacy_sentence("VWR"), Some(DataType::ApparentWind));
        assert_eq!(DataType::from_legacy_sentence("VWT"), Some(DataType::TrueWind));
        assert_eq!(DataType::from_legacy_sentence("RMC"), None);
        assert_eq!(DataType::from_legacy_sentence(""), None);
    }

    proptest! {
        #[test]
        fn wrapped_angle_in_range(deg in -1.0e6f32..1.0e6f32) {
            let wrapped = wrap360(deg);
            prop_assert!((0.0..360.0).contains(&wrapped));
        }

        #[test]
        fn offset_then_inverse_is_stable(deg in 0.0f32..360.0, offset in -180i32..=180) {
            let once = wrap360(wrap360(deg + offset as f32) - offset as f32);
            let twice = wrap360(wrap360(once + offset as f32) - offset as f32);
            prop_assert!((0.0..360.0).contains(&once));
            let diff = wrap180(once - twice).abs();
            prop_assert!(diff < 1.0e-3);
        }
    }
}
