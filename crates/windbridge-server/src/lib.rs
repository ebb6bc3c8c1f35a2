//! # windbridge-server
//!
//! Concurrency core of the wind bridge.
//!
//! Two tokio tasks share one [`SharedState`](windbridge_core::SharedState):
//! - the network task owns the transport and parser
//! - the control task owns the pulse engine, configuration writes and
//!   status queries
//!
//! Reconfiguration of the transport goes through a pause/acknowledge gate.

pub mod bridge;
pub mod clock;
pub mod control;
pub mod network;
pub mod pause;
pub mod status;

pub use bridge::{BridgeHandle, BridgeOptions, WindBridge};
pub use clock::Clock;
pub use control::{BridgeClient, ControlCommand, ControlError, TICK_INTERVAL};
pub use pause::{pause_gate, PauseController, PauseListener, PAUSE_ACK_TIMEOUT};
pub use status::{DisplayStatus, StatusSnapshot};
