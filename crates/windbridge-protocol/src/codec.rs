//! Sentence framing: checksum, field splitting and encoding.
//!
//! Wire format:
//! - `$` start delimiter
//! - Address field (talker + formatter, e.g. `WIMWV`)
//! - Comma-separated data fields
//! - `*` followed by two hex digits: XOR of every byte between `$` and `*`
//! - `\r\n` terminator

use core::fmt::Write;

use thiserror::Error;
use windbridge_core::state::DropReason;

/// Longest accepted sentence, excluding the line terminator.
pub const MAX_SENTENCE_LEN: usize = 128;

/// Fields kept per sentence, address included; extra fields are dropped.
pub const MAX_FIELDS: usize = 20;

/// Encoded sentence including the terminator.
pub type SentenceString = heapless::String<{ MAX_SENTENCE_LEN + 2 }>;

/// Reasons a line is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NmeaError {
    #[error("Sentence does not start with '$'")]
    MissingStart,

    #[error("Sentence has no '*' checksum delimiter")]
    MissingChecksum,

    #[error("Checksum is not two hex digits")]
    BadChecksumDigits,

    #[error("Checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("Sentence exceeds 128 bytes")]
    TooLong,

    #[error("Unsupported sentence type")]
    UnsupportedSentence,

    #[error("Status field marks the data invalid")]
    InvalidStatus,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid number in field: {0}")]
    InvalidNumber(&'static str),

    #[error("Invalid unit or reference letter in field: {0}")]
    InvalidUnit(&'static str),
}

impl NmeaError {
    /// Diagnostic counter bucket for this error.
    pub fn drop_reason(&self) -> DropReason {
        match self {
            NmeaError::MissingStart | NmeaError::MissingChecksum | NmeaError::BadChecksumDigits => {
                DropReason::Malformed
            }
            NmeaError::ChecksumMismatch { .. } => DropReason::ChecksumMismatch,
            NmeaError::TooLong => DropReason::TooLong,
            NmeaError::UnsupportedSentence => DropReason::Unsupported,
            NmeaError::InvalidStatus => DropReason::InvalidStatus,
            NmeaError::MissingField(_) | NmeaError::InvalidNumber(_) | NmeaError::InvalidUnit(_) => {
                DropReason::InvalidField
            }
        }
    }
}

/// XOR of every byte in `payload`.
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Validate framing and checksum; returns the payload between `$` and `*`.
///
/// Surrounding whitespace and the line terminator are ignored. Checksum
/// digits are case-insensitive.
pub fn validate(line: &str) -> Result<&str, NmeaError> {
    let line = line.trim();
    if line.len() > MAX_SENTENCE_LEN {
        return Err(NmeaError::TooLong);
    }
    let body = line.strip_prefix('$').ok_or(NmeaError::MissingStart)?;
    let (payload, digits) = body.split_once('*').ok_or(NmeaError::MissingChecksum)?;

    let expected = match digits.as_bytes() {
        [hi, lo] => match (hex_digit(*hi), hex_digit(*lo)) {
            (Some(hi), Some(lo)) => (hi << 4) | lo,
            _ => return Err(NmeaError::BadChecksumDigits),
        },
        _ => return Err(NmeaError::BadChecksumDigits),
    };

    let computed = checksum(payload);
    if computed != expected {
        return Err(NmeaError::ChecksumMismatch { expected, computed });
    }
    Ok(payload)
}

/// Split a payload on commas, keeping at most [`MAX_FIELDS`] fields.
pub fn split_fields(payload: &str) -> heapless::Vec<&str, MAX_FIELDS> {
    let mut fields = heapless::Vec::new();
    for field in payload.split(',') {
        if fields.push(field).is_err() {
            break;
        }
    }
    fields
}

/// Render `$ADDRESS,f1,f2,...*HH\r\n`.
pub fn encode_sentence(address: &str, fields: &[&str]) -> Result<SentenceString, NmeaError> {
    let mut payload: heapless::String<MAX_SENTENCE_LEN> = heapless::String::new();
    payload.push_str(address).map_err(|_| NmeaError::TooLong)?;
    for field in fields {
        payload.push(',').map_err(|_| NmeaError::TooLong)?;
        payload.push_str(field).map_err(|_| NmeaError::TooLong)?;
    }

    let mut out = SentenceString::new();
    write!(out, "${}*{:02X}\r\n", payload, checksum(&payload)).map_err(|_| NmeaError::TooLong)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MWV: &str = "$WIMWV,045.0,R,12.5,N,A*14";

    #[test]
    fn test_checksum_accepts_valid() {
        assert_eq!(validate(MWV), Ok("WIMWV,045.0,R,12.5,N,A"));
        assert_eq!(validate("$HEHDT,274.1,T*2f\r\n"), Ok("HEHDT,274.1,T"));
    }

    #[test]
    fn test_checksum_rejects_wrong_digits() {
        assert_eq!(
            validate("$WIMWV,045.0,R,12.5,N,A*16"),
            Err(NmeaError::ChecksumMismatch {
                expected: 0x16,
                computed: 0x14
            })
        );
    }

    #[test]
    fn test_framing_errors() {
        assert_eq!(validate("WIMWV,045.0,R*14"), Err(NmeaError::MissingStart));
        assert_eq!(validate("$WIMWV,045.0,R"), Err(NmeaError::MissingChecksum));
        assert_eq!(validate("$WIMWV*1"), Err(NmeaError::BadChecksumDigits));
        assert_eq!(validate("$WIMWV*ZZ"), Err(NmeaError::BadChecksumDigits));
        let long = format!("${}*00", "A".repeat(MAX_SENTENCE_LEN));
        assert_eq!(validate(&long), Err(NmeaError::TooLong));
    }

    #[test]
    fn test_split_discards_excess_fields() {
        let payload = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        let fields = split_fields(&payload);
        assert_eq!(fields.len(), MAX_FIELDS);
        assert_eq!(fields[MAX_FIELDS - 1], "19");
    }

    #[test]
    fn test_split_keeps_empty_fields() {
        let fields = split_fields("GPVTG,,T,,M,,N,,K");
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[1], "");
    }

    #[test]
    fn test_encode_sentence() {
        let line = encode_sentence("WIMWV", &["045.0", "R", "12.5", "N", "A"]).unwrap();
        assert_eq!(line.as_str(), "$WIMWV,045.0,R,12.5,N,A*14\r\n");
        assert!(validate(&line).is_ok());

        let too_many = ["X"; 80];
        assert_eq!(encode_sentence("IIMWV", &too_many), Err(NmeaError::TooLong));
    }

    #[test]
    fn test_drop_reasons() {
        assert_eq!(NmeaError::MissingStart.drop_reason(), DropReason::Malformed);
        assert_eq!(
            NmeaError::InvalidNumber("angle").drop_reason(),
            DropReason::InvalidField
        );
    }

    proptest! {
        #[test]
        fn single_bit_flip_rejected(
            address in "[A-Z]{5}",
            fields in proptest::collection::vec("[A-Z0-9.]{0,6}", 0..8),
            position in any::<proptest::sample::Index>(),
            bit in 0u8..7,
        ) {
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let line = encode_sentence(&address, &refs).unwrap();
            let star = line.find('*').unwrap();
            // any byte between `$` and `*`
            let index = 1 + position.index(star - 1);
            let mut bytes = line.as_bytes().to_vec();
            bytes[index] ^= 1 << bit;
            let flipped = String::from_utf8(bytes).unwrap();
            prop_assert!(validate(&flipped).is_err());
        }

        #[test]
        fn encoded_sentences_validate(fields in proptest::collection::vec("[A-Z0-9.]{0,6}", 0..8)) {
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let line = encode_sentence("IIXDR", &refs).unwrap();
            prop_assert!(validate(&line).is_ok());
        }
    }
}
