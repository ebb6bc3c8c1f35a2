//! # windbridge-providers
//!
//! Network transports delivering NMEA 0183 lines to the wind bridge:
//! - UDP: datagrams on a bound port
//! - TCP: a persistent client connection with reconnect and backoff
//! - HTTP: periodic GET polling of a URL
//!
//! Exactly one endpoint is active at a time. Failures are never terminal;
//! the [`TransportManager`] retries with exponential backoff.

pub mod backoff;
pub mod http;
pub mod line;
pub mod transport;

pub use backoff::Backoff;
pub use line::{LineBuffer, LineEvent, MAX_LINE_LEN};
pub use transport::{LinkState, TransportError, TransportEvent, TransportManager, TransportOptions};
