//! JSON file configuration storage.
//!
//! All keys live in one JSON object. Every save rewrites the file through
//! a temporary sibling and a rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use windbridge_core::{ConfigError, ConfigStorage};

pub struct FileConfigStorage {
    path: PathBuf,
    data: RwLock<Map<String, Value>>,
}

impl FileConfigStorage {
    /// Open `path`; a missing file starts out empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ConfigError::InvalidData(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(ConfigError::ReadError(format!("{}: {}", path.display(), e))),
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<(), ConfigError> {
        let write_error = |e: std::io::Error| ConfigError::WriteError(format!("{}: {}", self.path.display(), e));
        let text = serde_json::to_string_pretty(data)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(write_error)?;
        std::fs::rename(&tmp, &self.path).map_err(write_error)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidData(format!("{}: {}", key, e)))
    }

    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value);
        self.persist(&data)
    }

    fn has_key(&self, key: &str) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn delete_key(&self, key: &str) -> Result<(), ConfigError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windbridge_core::config::NetworkConfig;
    use windbridge_core::{load_config, DataType, DisplayConfig, Endpoint};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("windbridge-{}-{}", std::process::id(), name))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let storage = FileConfigStorage::open(temp_path("missing")).unwrap();
        assert!(!storage.has_key("network"));
        assert!(matches!(
            storage.load_value::<u64>("bridge:staleAfterMs"),
            Err(ConfigError::NotFound(_))
        ));
        assert_eq!(load_config(&storage).unwrap().network, NetworkConfig::default());
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = temp_path("reopen");
        let storage = FileConfigStorage::open(&path).unwrap();
        let display = DisplayConfig {
            enabled: true,
            data_type: DataType::Vmg,
            ..DisplayConfig::for_display(2)
        };
        storage.save_display_config(2, &display).unwrap();
        let mut network = NetworkConfig::default();
        network.set_active(1).unwrap();
        storage.save_network_config(&network).unwrap();

        let reopened = FileConfigStorage::open(&path).unwrap();
        assert_eq!(reopened.load_display_config(2).unwrap(), display);
        assert_eq!(reopened.load_network_config().unwrap().active_profile().endpoint, Endpoint::udp(10110));

        reopened.delete_key("network").unwrap();
        assert!(!FileConfigStorage::open(&path).unwrap().has_key("network"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileConfigStorage::open(&path),
            Err(ConfigError::InvalidData(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
