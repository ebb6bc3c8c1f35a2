//! Shared bridge state.
//!
//! [`BridgeState`] owns everything the network and control tasks share:
//! - The display array (configuration and readings)
//! - The wind aggregator
//! - Transport link flags and data age
//! - Sentence diagnostics
//! - The network configuration and active endpoint
//!
//! [`SharedState`] is the only way to reach it from a task. Every accessor
//! holds the lock for field reads and writes only; callers never perform
//! I/O with the guard held.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::{BridgeConfig, Endpoint, NetworkConfig, Protocol};
use crate::display::{Display, DisplayConfig, DISPLAY_COUNT};
use crate::model::{DataType, Sample, SentenceKind, WindReference};
use crate::wind::WindAggregator;

/// Capacity of the diagnostic raw-sentence copy.
pub const RAW_LINE_CAPACITY: usize = 128;

/// Why an inbound line was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Missing `$` or `*`, or bad checksum digits.
    Malformed,
    ChecksumMismatch,
    /// Line longer than the buffer bound.
    TooLong,
    /// Formatter the bridge does not consume.
    Unsupported,
    /// Status field marking the data invalid.
    InvalidStatus,
    /// Required field missing, not a number, or with an unknown unit.
    InvalidField,
}

/// Dropped-line counters, one per [`DropReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropCounters {
    pub malformed: u64,
    pub checksum_mismatch: u64,
    pub too_long: u64,
    pub unsupported: u64,
    pub invalid_status: u64,
    pub invalid_field: u64,
}

impl DropCounters {
    pub fn increment(&mut self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &mut self.malformed,
            DropReason::ChecksumMismatch => &mut self.checksum_mismatch,
            DropReason::TooLong => &mut self.too_long,
            DropReason::Unsupported => &mut self.unsupported,
            DropReason::InvalidStatus => &mut self.invalid_status,
            DropReason::InvalidField => &mut self.invalid_field,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.malformed
            + self.checksum_mismatch
            + self.too_long
            + self.unsupported
            + self.invalid_status
            + self.invalid_field
    }
}

/// Sentence diagnostics for the status layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Last accepted raw line.
    pub last_raw: heapless::String<RAW_LINE_CAPACITY>,
    /// Set when `last_raw` holds only a prefix of the line.
    pub last_raw_truncated: bool,
    pub last_kind: Option<SentenceKind>,
    pub seen_mwv_relative: bool,
    pub seen_mwv_true: bool,
    pub seen_vwr: bool,
    pub seen_vwt: bool,
    pub accepted: u64,
    pub drops: DropCounters,
}

impl Diagnostics {
    fn record_accepted(&mut self, kind: SentenceKind, reference: Option<WindReference>, raw: &str) {
        self.last_raw.clear();
        self.last_raw_truncated = false;
        for c in raw.trim_end().chars() {
            if self.last_raw.push(c).is_err() {
                self.last_raw_truncated = true;
                break;
            }
        }
        self.last_kind = Some(kind);
        match (kind, reference) {
            (SentenceKind::Mwv, Some(WindReference::Relative)) => self.seen_mwv_relative = true,
            (SentenceKind::Mwv, Some(WindReference::True)) => self.seen_mwv_true = true,
            (SentenceKind::Vwr, _) => self.seen_vwr = true,
            (SentenceKind::Vwt, _) => self.seen_vwt = true,
            _ => {}
        }
        self.accepted = self.accepted.saturating_add(1);
    }
}

/// Link flags and data age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatus {
    pub udp_connected: bool,
    pub tcp_connected: bool,
    pub http_connected: bool,
    /// Time of the last accepted sentence.
    pub last_data_ms: Option<u64>,
}

impl TransportStatus {
    pub fn is_connected(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Udp => self.udp_connected,
            Protocol::Tcp => self.tcp_connected,
            Protocol::Http => self.http_connected,
        }
    }

    fn set_connected(&mut self, protocol: Protocol, connected: bool) {
        match protocol {
            Protocol::Udp => self.udp_connected = connected,
            Protocol::Tcp => self.tcp_connected = connected,
            Protocol::Http => self.http_connected = connected,
        }
    }

    /// Milliseconds since the last accepted sentence.
    pub fn data_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_data_ms.map(|at| now_ms.saturating_sub(at))
    }
}

/// Everything guarded by the data mutex.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeState {
    pub displays: [Display; DISPLAY_COUNT],
    pub aggregator: WindAggregator,
    pub transport: TransportStatus,
    pub diagnostics: Diagnostics,
    pub network: NetworkConfig,
    /// Bumped whenever the active endpoint changes.
    pub endpoint_generation: u64,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl BridgeState {
    pub fn new(config: BridgeConfig) -> Self {
        let BridgeConfig {
            displays,
            network,
            stale_after_ms,
        } = config;
        Self {
            displays: displays.map(|c| Display::new(c.clamped())),
            aggregator: WindAggregator::new(stale_after_ms),
            transport: TransportStatus::default(),
            diagnostics: Diagnostics::default(),
            network,
            endpoint_generation: 0,
        }
    }

    /// Write a wind reading to every display whose category it feeds.
    ///
    /// Frozen and disabled displays are skipped. Returns the number of
    /// displays updated.
    pub fn update_displays_for_sentence(
        &mut self,
        kind: SentenceKind,
        reference: WindReference,
        angle_deg: f32,
        speed_kn: Option<f32>,
        now_ms: u64,
    ) -> usize {
        let mut updated = 0;
        for display in self.displays.iter_mut().filter(|d| is_live(d)) {
            if display.config.data_type.accepts_wind(kind, reference) {
                display.record(speed_kn, Some(angle_deg), now_ms);
                updated += 1;
            }
        }
        updated
    }

    /// Write a derived or ground-track reading to one category.
    fn update_displays_for_category(
        &mut self,
        data_type: DataType,
        speed_kn: Option<f32>,
        angle_deg: Option<f32>,
        now_ms: u64,
    ) -> usize {
        if speed_kn.is_none() && angle_deg.is_none() {
            return 0;
        }
        let mut updated = 0;
        for display in self.displays.iter_mut().filter(|d| is_live(d)) {
            if display.config.data_type == data_type {
                display.record(speed_kn, angle_deg, now_ms);
                updated += 1;
            }
        }
        updated
    }

    /// Feed one decoded sentence through the aggregator to the displays.
    ///
    /// Returns the number of display updates performed.
    pub fn apply_sentence(
        &mut self,
        kind: SentenceKind,
        sample: &Sample,
        raw_line: &str,
        now_ms: u64,
    ) -> usize {
        let reference = match sample {
            Sample::Wind(wind) => Some(wind.reference),
            _ => None,
        };
        self.diagnostics.record_accepted(kind, reference, raw_line);
        self.transport.last_data_ms = Some(now_ms);
        self.aggregator.record(sample);

        let mut updated = 0;
        match sample {
            Sample::Wind(wind) => {
                updated += self.update_displays_for_sentence(
                    kind,
                    wind.reference,
                    wind.angle_deg,
                    wind.speed_kn,
                    now_ms,
                );
                if wind.reference == WindReference::Relative {
                    if let Some(computed) = self.aggregator.calculate_true_wind(now_ms) {
                        if !self.aggregator.has_fresh_native_true(now_ms) {
                            updated += self.update_displays_for_category(
                                DataType::TrueWind,
                                computed.speed_kn,
                                Some(computed.angle_deg),
                                now_ms,
                            );
                        }
                    }
                }
                updated += self.refresh_vmg(now_ms);
            }
            Sample::Nav(nav) => {
                updated += self.update_displays_for_category(DataType::Sog, nav.sog_kn, nav.cog_deg, now_ms);
                updated += self.update_displays_for_category(DataType::Cog, None, nav.cog_deg, now_ms);
            }
            Sample::Heading(_) => {}
        }
        updated
    }

    fn refresh_vmg(&mut self, now_ms: u64) -> usize {
        let Some(vmg) = self.aggregator.calculate_vmg(now_ms) else {
            return 0;
        };
        let angle = self
            .aggregator
            .current_true_wind(now_ms)
            .map(|w| w.angle_deg);
        self.update_displays_for_category(DataType::Vmg, Some(vmg.abs()), angle, now_ms)
    }

    /// Endpoint of the active profile.
    pub fn active_endpoint(&self) -> &Endpoint {
        &self.network.active_profile().endpoint
    }

    /// Replace the network configuration.
    ///
    /// Returns `true` when the active endpoint changed; the generation is
    /// bumped and the old link flag cleared in that case.
    pub fn replace_network(&mut self, network: NetworkConfig) -> bool {
        let previous = self.active_endpoint().clone();
        self.network = network;
        if *self.active_endpoint() == previous {
            return false;
        }
        self.transport.set_connected(previous.protocol(), false);
        self.endpoint_generation = self.endpoint_generation.wrapping_add(1);
        true
    }
}

fn is_live(display: &Display) -> bool {
    display.config.enabled && !display.config.freeze
}

/// Cloneable handle to the single data mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<BridgeState>>,
}

impl SharedState {
    pub fn new(state: BridgeState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> BridgeState {
        self.lock().clone()
    }

    pub fn display(&self, index: usize) -> Option<Display> {
        self.lock().displays.get(index).cloned()
    }

    /// Replace a display's configuration (clamped); keeps its reading.
    pub fn set_display_config(&self, index: usize, config: DisplayConfig) -> bool {
        match self.lock().displays.get_mut(index) {
            Some(display) => {
                display.config = config.clamped();
                true
            }
            None => false,
        }
    }

    /// Overwrite a display's angle, bypassing the freeze flag.
    pub fn set_display_angle(&self, index: usize, angle_deg: f32, now_ms: u64) -> bool {
        match self.lock().displays.get_mut(index) {
            Some(display) => {
                display.record(None, Some(angle_deg), now_ms);
                true
            }
            None => false,
        }
    }

    pub fn apply_sentence(&self, kind: SentenceKind, sample: &Sample, raw_line: &str, now_ms: u64) -> usize {
        self.lock().apply_sentence(kind, sample, raw_line, now_ms)
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.lock().diagnostics.drops.increment(reason);
    }

    pub fn set_connected(&self, protocol: Protocol, connected: bool) {
        self.lock().transport.set_connected(protocol, connected);
    }

    pub fn transport_status(&self) -> TransportStatus {
        self.lock().transport
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.lock().diagnostics.clone()
    }

    pub fn stale_after_ms(&self) -> u64 {
        self.lock().aggregator.stale_after_ms
    }

    pub fn set_stale_after_ms(&self, stale_after_ms: u64) {
        self.lock().aggregator.stale_after_ms = stale_after_ms;
    }

    /// Active endpoint and its generation, read together.
    pub fn active_endpoint(&self) -> (Endpoint, u64) {
        let state = self.lock();
        (state.active_endpoint().clone(), state.endpoint_generation)
    }

    pub fn network_config(&self) -> NetworkConfig {
        self.lock().network.clone()
    }

    pub fn replace_network(&self, network: NetworkConfig) -> bool {
        self.lock().replace_network(network)
    }
}
