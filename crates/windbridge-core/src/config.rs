//! Configuration storage abstraction.
//!
//! Persistent settings live behind [`ConfigStorage`], implemented per
//! platform:
//! - Linux: JSON file storage
//! - Embedded targets: flash key-value storage
//! - Tests: [`MemoryConfigStorage`]
//!
//! Keys are namespaced (`display:1`, `network`, `bridge:staleAfterMs`).
//! Values are JSON so every backend shares the same serde representation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::display::{DisplayConfig, DISPLAY_COUNT};
use crate::model::DataType;
use crate::wind::DEFAULT_STALE_AFTER_MS;

/// Capacity of a profile name.
pub const NAME_CAPACITY: usize = 32;
/// Capacity of a host name.
pub const HOST_CAPACITY: usize = 64;
/// Capacity of a poll URL.
pub const URL_CAPACITY: usize = 128;
/// Number of persisted connection profiles.
pub const PROFILE_COUNT: usize = 2;
/// Number of remembered endpoints.
pub const HISTORY_LEN: usize = 5;

pub type NameString = heapless::String<NAME_CAPACITY>;
pub type HostString = heapless::String<HOST_CAPACITY>;
pub type UrlString = heapless::String<URL_CAPACITY>;

const NETWORK_KEY: &str = "network";
const STALE_AFTER_KEY: &str = "bridge:staleAfterMs";

/// Storage key of the display at `index` (0-based).
pub fn display_key(index: usize) -> String {
    format!("display:{}", index + 1)
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Copy `value` into a bounded string, rejecting it when it does not fit.
pub fn bounded<const N: usize>(value: &str) -> Result<heapless::String<N>, ConfigError> {
    let mut out = heapless::String::new();
    out.push_str(value).map_err(|_| {
        ConfigError::InvalidData(format!("'{}' exceeds {} bytes", value, N))
    })?;
    Ok(out)
}

/// Abstract configuration storage.
///
/// All methods are synchronous so the same trait serves embedded flash
/// storage.
pub trait ConfigStorage: Send + Sync {
    /// Load a value by key.
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError>;

    /// Save a value by key.
    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError>;

    /// Check if a key exists.
    fn has_key(&self, key: &str) -> bool;

    /// Delete a key.
    fn delete_key(&self, key: &str) -> Result<(), ConfigError>;

    /// Load the display at `index`, mapping legacy fields and clamping.
    fn load_display_config(&self, index: usize) -> Result<DisplayConfig, ConfigError> {
        let raw: serde_json::Value = self.load_value(&display_key(index))?;
        display_from_json(index, raw)
    }

    fn save_display_config(&self, index: usize, config: &DisplayConfig) -> Result<(), ConfigError> {
        if index >= DISPLAY_COUNT {
            return Err(ConfigError::InvalidData(format!("display index {}", index)));
        }
        self.save_value(&display_key(index), config)
    }

    fn load_network_config(&self) -> Result<NetworkConfig, ConfigError> {
        let mut network: NetworkConfig = self.load_value(NETWORK_KEY)?;
        network.active = network.active.min(PROFILE_COUNT - 1);
        Ok(network)
    }

    fn save_network_config(&self, network: &NetworkConfig) -> Result<(), ConfigError> {
        self.save_value(NETWORK_KEY, network)
    }
}

/// Decode a stored display, honouring the legacy `sentence` selector.
fn display_from_json(index: usize, raw: serde_json::Value) -> Result<DisplayConfig, ConfigError> {
    let has_data_type = raw.get("dataType").is_some();
    let mut merged = serde_json::to_value(DisplayConfig::for_display(index))
        .map_err(|e| ConfigError::InvalidData(e.to_string()))?;
    if let (Some(target), serde_json::Value::Object(stored)) = (merged.as_object_mut(), raw) {
        target.extend(stored);
    }
    let mut config: DisplayConfig =
        serde_json::from_value(merged).map_err(|e| ConfigError::InvalidData(e.to_string()))?;

    if !has_data_type {
        if let Some(data_type) = config
            .sentence
            .as_deref()
            .and_then(DataType::from_legacy_sentence)
        {
            config.data_type = data_type;
        }
    }
    Ok(config.clamped())
}

/// Network transport selection, one tagged value per profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "camelCase")]
pub enum Endpoint {
    /// Listen for datagrams on `port`.
    Udp { port: u16 },
    /// Keep a client connection to `host:port`.
    Tcp { host: HostString, port: u16 },
    /// Poll `url` with HTTP GET.
    Http { url: UrlString },
}

impl Endpoint {
    pub fn udp(port: u16) -> Self {
        Endpoint::Udp { port }
    }

    pub fn tcp(host: &str, port: u16) -> Result<Self, ConfigError> {
        if host.is_empty() {
            return Err(ConfigError::InvalidData("empty host".into()));
        }
        Ok(Endpoint::Tcp {
            host: bounded(host)?,
            port,
        })
    }

    pub fn http(url: &str) -> Result<Self, ConfigError> {
        if !url.starts_with("http://") {
            return Err(ConfigError::InvalidData(format!("unsupported url '{}'", url)));
        }
        Ok(Endpoint::Http { url: bounded(url)? })
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Endpoint::Udp { .. } => Protocol::Udp,
            Endpoint::Tcp { .. } => Protocol::Tcp,
            Endpoint::Http { .. } => Protocol::Http,
        }
    }
}

/// Transport protocol of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    Udp,
    Tcp,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Udp { port } => write!(f, "udp://0.0.0.0:{}", port),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Http { url } => f.write_str(url),
        }
    }
}

/// A named, persisted connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub name: NameString,
    pub endpoint: Endpoint,
}

impl ConnectionProfile {
    pub fn new(name: &str, endpoint: Endpoint) -> Result<Self, ConfigError> {
        Ok(Self {
            name: bounded(name)?,
            endpoint,
        })
    }
}

/// Both connection profiles, the active slot and recent endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    pub profiles: [ConnectionProfile; PROFILE_COUNT],
    /// Index of the active profile.
    pub active: usize,
    /// Recently saved endpoints, most recent first.
    pub history: heapless::Vec<Endpoint, HISTORY_LEN>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let yachta = ConnectionProfile {
            name: NameString::try_from("Yachta").unwrap_or_default(),
            endpoint: Endpoint::Tcp {
                host: HostString::try_from("192.168.68.145").unwrap_or_default(),
                port: 6666,
            },
        };
        let openplotter = ConnectionProfile {
            name: NameString::try_from("OpenPlotter").unwrap_or_default(),
            endpoint: Endpoint::Udp { port: 10110 },
        };
        Self {
            profiles: [yachta, openplotter],
            active: 0,
            history: heapless::Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn active_profile(&self) -> &ConnectionProfile {
        &self.profiles[self.active.min(PROFILE_COUNT - 1)]
    }

    /// Make `slot` the active profile.
    pub fn set_active(&mut self, slot: usize) -> Result<(), ConfigError> {
        if slot >= PROFILE_COUNT {
            return Err(ConfigError::InvalidData(format!("profile slot {}", slot)));
        }
        self.active = slot;
        Ok(())
    }

    /// Replace the profile in `slot`, remembering its endpoint.
    pub fn set_profile(&mut self, slot: usize, profile: ConnectionProfile) -> Result<(), ConfigError> {
        if slot >= PROFILE_COUNT {
            return Err(ConfigError::InvalidData(format!("profile slot {}", slot)));
        }
        self.record_history(profile.endpoint.clone());
        self.profiles[slot] = profile;
        Ok(())
    }

    /// Push `endpoint` to the front of the history.
    ///
    /// An existing equal entry moves to the front; the oldest entry falls
    /// off when the list is full.
    pub fn record_history(&mut self, endpoint: Endpoint) {
        if self.history.first() == Some(&endpoint) {
            return;
        }
        let mut updated: heapless::Vec<Endpoint, HISTORY_LEN> = heapless::Vec::new();
        let older = self.history.iter().filter(|e| **e != endpoint).cloned();
        for entry in std::iter::once(endpoint.clone()).chain(older) {
            if updated.push(entry).is_err() {
                break;
            }
        }
        self.history = updated;
    }
}

/// Complete persisted configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub displays: [DisplayConfig; DISPLAY_COUNT],
    pub network: NetworkConfig,
    /// Age after which inputs of derived quantities count as stale.
    pub stale_after_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            displays: std::array::from_fn(DisplayConfig::for_display),
            network: NetworkConfig::default(),
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

/// Map a missing or unreadable value onto its default.
///
/// Storage failures propagate; absent and malformed values do not.
fn or_default<T>(result: Result<T, ConfigError>, default: impl FnOnce() -> T) -> Result<T, ConfigError> {
    match result {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) | Err(ConfigError::InvalidData(_)) => Ok(default()),
        Err(e) => Err(e),
    }
}

/// Load the complete configuration, falling back to defaults per key.
pub fn load_config<S: ConfigStorage + ?Sized>(storage: &S) -> Result<BridgeConfig, ConfigError> {
    let defaults = BridgeConfig::default();
    let mut displays = defaults.displays.clone();
    for (index, display) in displays.iter_mut().enumerate() {
        *display = or_default(storage.load_display_config(index), || {
            DisplayConfig::for_display(index)
        })?;
    }
    let network = or_default(storage.load_network_config(), NetworkConfig::default)?;
    let stale_after_ms = or_default(storage.load_value(STALE_AFTER_KEY), || {
        defaults.stale_after_ms
    })?;

    Ok(BridgeConfig {
        displays,
        network,
        stale_after_ms,
    })
}

/// In-memory storage, used by tests and as a volatile fallback.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw JSON under `key`.
    pub fn insert_raw(&self, key: &str, json: &str) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), json.to_string());
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let json = data
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string(value).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        self.insert_raw(key, &json);
        Ok(())
    }

    fn has_key(&self, key: &str) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn delete_key(&self, key: &str) -> Result<(), ConfigError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
