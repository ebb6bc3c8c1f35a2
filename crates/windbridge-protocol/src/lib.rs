//! # windbridge-protocol
//!
//! NMEA 0183 wire codec for the wind bridge.
//!
//! Only the sentences the bridge consumes are decoded: MWV, VWR, VWT, RMC,
//! VTG, HDT and HDM. Any talker prefix is accepted.

pub mod codec;
pub mod sentences;

pub use codec::{checksum, encode_sentence, split_fields, validate, NmeaError};
pub use sentences::{parse_line, ParsedSentence};
