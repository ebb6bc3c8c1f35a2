//! Read-only status snapshots for the external status layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use windbridge_core::config::ConnectionProfile;
use windbridge_core::state::{BridgeState, Diagnostics};
use windbridge_core::{DisplayConfig, Endpoint, OutputDriver, PulseEngine, TransportStatus};

/// State of one display at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStatus {
    /// 1-based display number.
    pub number: usize,
    pub config: DisplayConfig,
    pub current_speed_kn: f32,
    pub current_angle_deg: f32,
    pub last_update_ms: Option<u64>,
    pub stale: bool,
    /// Whether the display holds its pulse channel.
    pub running: bool,
    pub frequency_hz: f32,
}

/// Everything the status layer shows, captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_ms: u64,
    pub displays: Vec<DisplayStatus>,
    pub active_slot: usize,
    pub active_profile: ConnectionProfile,
    pub history: Vec<Endpoint>,
    pub transport: TransportStatus,
    /// Link flag of the active profile's protocol.
    pub connected: bool,
    pub data_age_ms: Option<u64>,
    pub diagnostics: Diagnostics,
}

impl StatusSnapshot {
    /// Combine a state copy with the engine's output state.
    pub fn capture<O: OutputDriver>(state: &BridgeState, engine: &PulseEngine<O>, now_ms: u64) -> Self {
        let stale_after_ms = state.aggregator.stale_after_ms;
        let displays = state
            .displays
            .iter()
            .enumerate()
            .map(|(index, display)| DisplayStatus {
                number: index + 1,
                config: display.config.clone(),
                current_speed_kn: display.reading.current_speed_kn,
                current_angle_deg: display.reading.current_angle_deg,
                last_update_ms: display.reading.last_update_ms,
                stale: display.reading.is_stale(now_ms, stale_after_ms),
                running: engine.is_running(index),
                frequency_hz: engine.frequency_hz(index),
            })
            .collect();
        let active_profile = state.network.active_profile().clone();

        Self {
            timestamp: Utc::now(),
            uptime_ms: now_ms,
            displays,
            active_slot: state.network.active,
            connected: state
                .transport
                .is_connected(active_profile.endpoint.protocol()),
            active_profile,
            history: state.network.history.iter().cloned().collect(),
            transport: state.transport,
            data_age_ms: state.transport.data_age_ms(now_ms),
            diagnostics: state.diagnostics.clone(),
        }
    }
}
