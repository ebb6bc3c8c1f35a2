//! Per-sentence decoding.
//!
//! The formatter (last three characters of the address field) selects the
//! decoder; the talker prefix is ignored. Wind speeds are converted to
//! knots and angles wrapped to `[0, 360)`.

use windbridge_core::model::{
    wrap360, HeadingReference, HeadingSample, NavSample, Sample, SentenceKind, WindReference,
    WindSample, KMH_PER_KN, KN_PER_MS,
};

use crate::codec::{split_fields, validate, NmeaError, MAX_FIELDS};

type Fields<'a> = heapless::Vec<&'a str, MAX_FIELDS>;

/// A validated and decoded sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedSentence {
    pub kind: SentenceKind,
    pub sample: Sample,
}

/// Validate and decode one line received at `now_ms`.
pub fn parse_line(line: &str, now_ms: u64) -> Result<ParsedSentence, NmeaError> {
    let payload = validate(line)?;
    let fields = split_fields(payload);
    let address = fields.first().copied().unwrap_or_default();
    let formatter = address
        .len()
        .checked_sub(3)
        .and_then(|start| address.get(start..))
        .ok_or(NmeaError::UnsupportedSentence)?;
    let kind = SentenceKind::from_formatter(formatter).ok_or(NmeaError::UnsupportedSentence)?;

    let sample = match kind {
        SentenceKind::Mwv => decode_mwv(&fields, now_ms)?,
        SentenceKind::Vwr => decode_vw(&fields, kind, WindReference::Relative, now_ms)?,
        SentenceKind::Vwt => decode_vw(&fields, kind, WindReference::True, now_ms)?,
        SentenceKind::Rmc => decode_rmc(&fields, now_ms),
        SentenceKind::Vtg => decode_vtg(&fields, now_ms),
        SentenceKind::Hdt => decode_heading(&fields, HeadingReference::True, now_ms)?,
        SentenceKind::Hdm => decode_heading(&fields, HeadingReference::Magnetic, now_ms)?,
    };
    Ok(ParsedSentence { kind, sample })
}

fn field<'a>(fields: &Fields<'a>, index: usize) -> &'a str {
    fields.get(index).copied().map(str::trim).unwrap_or_default()
}

/// Parse an optional number; empty fields are `None`.
fn number(fields: &Fields<'_>, index: usize, name: &'static str) -> Result<Option<f32>, NmeaError> {
    let raw = field(fields, index);
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(NmeaError::InvalidNumber(name)),
    }
}

fn required(fields: &Fields<'_>, index: usize, name: &'static str) -> Result<f32, NmeaError> {
    number(fields, index, name)?.ok_or(NmeaError::MissingField(name))
}

/// Convert a speed to knots according to its unit letter.
fn to_knots(speed: f32, unit: &str) -> Result<f32, NmeaError> {
    match unit {
        "N" | "n" => Ok(speed),
        "M" | "m" => Ok(speed * KN_PER_MS),
        "K" | "k" => Ok(speed / KMH_PER_KN),
        _ => Err(NmeaError::InvalidUnit("speed unit")),
    }
}

fn non_negative(speed: f32) -> Result<f32, NmeaError> {
    if speed < 0.0 {
        Err(NmeaError::InvalidNumber("speed"))
    } else {
        Ok(speed)
    }
}

/// `$--MWV,angle,R|T,speed,K|M|N,A|V*hh`
fn decode_mwv(fields: &Fields<'_>, now_ms: u64) -> Result<Sample, NmeaError> {
    match field(fields, 5) {
        "A" | "a" => {}
        "V" | "v" => return Err(NmeaError::InvalidStatus),
        "" => return Err(NmeaError::MissingField("status")),
        _ => return Err(NmeaError::InvalidStatus),
    }
    let angle = required(fields, 1, "angle")?;
    let reference = match field(fields, 2) {
        "" => return Err(NmeaError::MissingField("reference")),
        letter => WindReference::from_letter(letter).ok_or(NmeaError::InvalidUnit("reference"))?,
    };
    let speed_kn = match number(fields, 3, "speed")? {
        Some(speed) => Some(non_negative(to_knots(speed, field(fields, 4))?)?),
        None => None,
    };

    Ok(Sample::Wind(WindSample {
        speed_kn,
        angle_deg: wrap360(angle),
        reference,
        source: Some(SentenceKind::Mwv),
        timestamp_ms: now_ms,
    }))
}

/// `$--VWR,angle,L|R,kn,N,m/s,M,km/h,K*hh` (VWT identical).
///
/// The angle is measured off the bow to port (`L`) or starboard (`R`).
/// The first populated speed field wins: knots, then m/s, then km/h.
fn decode_vw(
    fields: &Fields<'_>,
    kind: SentenceKind,
    reference: WindReference,
    now_ms: u64,
) -> Result<Sample, NmeaError> {
    let angle = required(fields, 1, "angle")?;
    let angle_deg = match field(fields, 2) {
        "R" | "r" => wrap360(angle),
        "L" | "l" => wrap360(360.0 - angle),
        "" => return Err(NmeaError::MissingField("hemisphere")),
        _ => return Err(NmeaError::InvalidUnit("hemisphere")),
    };

    let mut speed_kn = None;
    for (index, unit) in [(3, "N"), (5, "M"), (7, "K")] {
        if let Some(speed) = number(fields, index, "speed")? {
            let unit = match field(fields, index + 1) {
                "" => unit,
                given => given,
            };
            speed_kn = Some(non_negative(to_knots(speed, unit)?)?);
            break;
        }
    }

    Ok(Sample::Wind(WindSample {
        speed_kn,
        angle_deg,
        reference,
        source: Some(kind),
        timestamp_ms: now_ms,
    }))
}

/// Optional numeric field; malformed or negative values are absent.
fn lenient(fields: &Fields<'_>, index: usize) -> Option<f32> {
    number(fields, index, "value")
        .ok()
        .flatten()
        .filter(|v| *v >= 0.0)
}

/// `$--RMC,time,A|V,lat,N,lon,E,sog,cog,date,var,E|W*hh`
///
/// A void fix (`V`) yields a sample with no SOG or COG.
fn decode_rmc(fields: &Fields<'_>, now_ms: u64) -> Sample {
    let valid = matches!(field(fields, 2), "A" | "a");
    Sample::Nav(NavSample {
        sog_kn: lenient(fields, 7).filter(|_| valid),
        cog_deg: lenient(fields, 8).filter(|_| valid).map(wrap360),
        timestamp_ms: now_ms,
    })
}

/// `$--VTG,cog,T,cogm,M,sog,N,kmh,K[,mode]*hh`
///
/// Ground speed falls back to the km/h field. Mode `N` (not valid) yields
/// a sample with no SOG or COG.
fn decode_vtg(fields: &Fields<'_>, now_ms: u64) -> Sample {
    let valid = !matches!(field(fields, 9), "N" | "n");
    let sog_kn = lenient(fields, 5).or_else(|| lenient(fields, 7).map(|kmh| kmh / KMH_PER_KN));
    Sample::Nav(NavSample {
        sog_kn: sog_kn.filter(|_| valid),
        cog_deg: lenient(fields, 1).filter(|_| valid).map(wrap360),
        timestamp_ms: now_ms,
    })
}

/// `$--HDT,heading,T*hh` / `$--HDM,heading,M*hh`
fn decode_heading(
    fields: &Fields<'_>,
    reference: HeadingReference,
    now_ms: u64,
) -> Result<Sample, NmeaError> {
    let heading = required(fields, 1, "heading")?;
    Ok(Sample::Heading(HeadingSample {
        heading_deg: wrap360(heading),
        reference,
        timestamp_ms: now_ms,
    }))
}
