//! # windbridge-core
//!
//! Core data model and state for the wind instrument bridge.
//!
//! This crate provides:
//! - Sample types (wind, navigation, heading) and angle helpers
//! - Per-display configuration with domain clamping
//! - The wind aggregator (true wind and VMG derivation)
//! - The pulse engine (frequency filtering, direction voltages)
//! - The mutex-guarded shared state used by the network and control tasks
//! - Configuration storage abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the same logic runs on the host and on embedded targets.

pub mod config;
pub mod display;
pub mod hardware;
pub mod model;
pub mod pulse;
pub mod state;
pub mod wind;

pub use config::{
    load_config, BridgeConfig, ConfigError, ConfigStorage, ConnectionProfile, Endpoint,
    MemoryConfigStorage, NetworkConfig, Protocol,
};
pub use display::{Display, DisplayConfig, FilterConfig, StalePolicy, DISPLAY_COUNT};
pub use hardware::{DirectionChannel, MemoryOutput, OutputDriver, OutputError};
pub use model::*;
pub use pulse::{PulseEngine, PulseOutput};
pub use state::{BridgeState, DropReason, SharedState, TransportStatus};
pub use wind::WindAggregator;
