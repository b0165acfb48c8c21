//! Configuration handling for the provisioner.
//!
//! Settings come from the `services.mesh` section of the shared YAML config
//! file and are then overridden by `MESH_*` environment variables.

use anyhow::{bail, Context, Result};
use mesh_crypto::{ApplicationKey, NetworkKey};
use mesh_session::ManagerConfig;
use mesh_storage::StorageMode;
use mesh_wire::MAX_TTL;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const APP_KEY_PREFIX: &str = "services.mesh.app_keys.";

/// Provisioner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Our unicast address
    pub unicast_address: u16,
    /// Current IV index
    pub iv_index: u32,
    /// TTL stamped on outbound PDUs
    pub default_ttl: u8,
    /// Index of the network key
    pub net_key_index: u16,
    /// Network key as hex; empty means generate one at startup
    pub network_key: String,
    /// Application keys by index, as hex
    pub app_keys: BTreeMap<u16, String>,
    /// How long to wait for a segment acknowledgement (e.g. "10s")
    pub ack_timeout: String,
    /// Acknowledge every inbound segment, not only complete transfers
    pub ack_partial: bool,
    /// `memory` or `file`
    pub storage_mode: String,
    /// Directory for the file store
    pub data_dir: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            unicast_address: 0x0001,
            iv_index: 0,
            default_ttl: 5,
            net_key_index: 0,
            network_key: String::new(),
            app_keys: BTreeMap::new(),
            ack_timeout: "10s".to_string(),
            ack_partial: false,
            storage_mode: "memory".to_string(),
            data_dir: "./data/mesh".to_string(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    mesh: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

/// Accepts `0x`-prefixed hex or decimal
fn parse_number<T>(value: &str) -> Option<T>
where
    T: TryFrom<u64>,
{
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => value.parse::<u64>().ok()?,
    };
    T::try_from(parsed).ok()
}

impl MeshConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Final mesh configuration: unicast={:#06x}, iv_index={:#010x}, ttl={}, app_keys={}, storage={}",
            config.unicast_address,
            config.iv_index,
            config.default_ttl,
            config.app_keys.len(),
            config.storage_mode
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(values) = root_config
            .services
            .and_then(|services| services.mesh)
            .and_then(|mesh| mesh.config)
        else {
            return;
        };

        for (key, value) in values {
            match key.as_str() {
                "services.mesh.unicast_address" => {
                    if let Some(address) = parse_number(&value) {
                        self.unicast_address = address;
                    }
                }
                "services.mesh.iv_index" => {
                    if let Some(iv_index) = parse_number(&value) {
                        self.iv_index = iv_index;
                    }
                }
                "services.mesh.default_ttl" => {
                    if let Some(ttl) = parse_number(&value) {
                        self.default_ttl = ttl;
                    }
                }
                "services.mesh.net_key_index" => {
                    if let Some(index) = parse_number(&value) {
                        self.net_key_index = index;
                    }
                }
                "services.mesh.network_key" => self.network_key = value,
                "services.mesh.ack_timeout" => self.ack_timeout = value,
                "services.mesh.ack_partial" => match value.trim().parse() {
                    Ok(enabled) => self.ack_partial = enabled,
                    Err(_) => warn!("Ignoring ack_partial value {:?}", value),
                },
                "services.mesh.storage.mode" => self.storage_mode = value,
                "services.mesh.storage.data_dir" => self.data_dir = value,
                other => {
                    if let Some(index) = other.strip_prefix(APP_KEY_PREFIX) {
                        match parse_number::<u16>(index) {
                            Some(index) => {
                                self.app_keys.insert(index, value);
                            }
                            None => warn!("Ignoring application key with bad index {:?}", index),
                        }
                    }
                }
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("MESH_UNICAST_ADDRESS").and_then(|v| parse_number(&v)) {
            self.unicast_address = address;
            info!("Unicast address overridden by environment: {:#06x}", address);
        }

        if let Some(iv_index) = lookup("MESH_IV_INDEX").and_then(|v| parse_number(&v)) {
            self.iv_index = iv_index;
            info!("IV index overridden by environment: {:#010x}", iv_index);
        }

        if let Some(ttl) = lookup("MESH_DEFAULT_TTL").and_then(|v| parse_number(&v)) {
            self.default_ttl = ttl;
            info!("Default TTL overridden by environment: {}", ttl);
        }

        if let Some(key) = lookup("MESH_NETWORK_KEY") {
            self.network_key = key;
            info!("Network key overridden by environment");
        }

        if let Some(timeout) = lookup("MESH_ACK_TIMEOUT") {
            info!("Ack timeout overridden by environment: {}", timeout);
            self.ack_timeout = timeout;
        }

        if let Some(enabled) = lookup("MESH_ACK_PARTIAL").and_then(|v| v.trim().parse().ok()) {
            self.ack_partial = enabled;
            info!("Partial acknowledgements overridden by environment: {}", enabled);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.unicast_address == 0 || self.unicast_address & 0x8000 != 0 {
            bail!(
                "unicast_address {:#06x} is not a unicast address",
                self.unicast_address
            );
        }
        if self.default_ttl > MAX_TTL {
            bail!("default_ttl {} exceeds {}", self.default_ttl, MAX_TTL);
        }
        self.ack_timeout()?;
        self.storage_mode()?;
        Ok(())
    }

    /// Parsed ack timeout
    pub fn ack_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.ack_timeout)
            .with_context(|| format!("invalid ack_timeout {:?}", self.ack_timeout))
    }

    /// Storage backend selection
    pub fn storage_mode(&self) -> Result<StorageMode> {
        match self.storage_mode.as_str() {
            "memory" => Ok(StorageMode::InMemory),
            "file" => Ok(StorageMode::File {
                data_dir: self.data_dir.clone(),
            }),
            other => bail!("Invalid storage mode: {}. Use 'memory' or 'file'", other),
        }
    }

    /// Configured network key, or a fresh one when none is set
    pub fn network_key(&self) -> Result<NetworkKey> {
        if self.network_key.is_empty() {
            warn!("No network key configured, generating one for this run");
            return Ok(NetworkKey::generate());
        }
        NetworkKey::from_hex(&self.network_key).context("invalid network_key")
    }

    /// Configured application keys
    pub fn app_keys(&self) -> Result<Vec<(u16, ApplicationKey)>> {
        self.app_keys
            .iter()
            .map(|(index, hex)| {
                ApplicationKey::from_hex(hex)
                    .map(|key| (*index, key))
                    .with_context(|| format!("invalid application key {}", index))
            })
            .collect()
    }

    /// Settings for the mesh manager
    pub fn to_manager_config(&self) -> Result<ManagerConfig> {
        let ack_timeout = self.ack_timeout()?;
        Ok(ManagerConfig {
            unicast_address: self.unicast_address,
            net_key_index: self.net_key_index,
            iv_index: self.iv_index,
            default_ttl: self.default_ttl,
            ack_timeout,
            reassembly_timeout: ack_timeout * 2,
            ack_partial: self.ack_partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(yaml: &str) -> MeshConfig {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();
        MeshConfig::load_from_file(temp_file.path()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.unicast_address, 0x0001);
        assert_eq!(config.default_ttl, 5);
        assert_eq!(config.ack_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(config.storage_mode().unwrap(), StorageMode::InMemory);
    }

    #[test]
    fn test_load_from_file() {
        let config = load(
            r#"
services:
  mesh:
    enabled: true
    executable: ./mesh-provisioner
    config:
      services.mesh.unicast_address: "0x0005"
      services.mesh.iv_index: "0x12345678"
      services.mesh.default_ttl: "7"
      services.mesh.network_key: "7dd7364cd842ad18c17c2b820c84c3d6"
      services.mesh.app_keys.0: "63964771734fbd76e3b40519d1d94a48"
      services.mesh.app_keys.2: "00112233445566778899aabbccddeeff"
      services.mesh.ack_timeout: "2s 500ms"
      services.mesh.ack_partial: "true"
      services.mesh.storage.mode: "file"
      services.mesh.storage.data_dir: "/var/lib/mesh"
"#,
        );

        assert_eq!(config.unicast_address, 0x0005);
        assert_eq!(config.iv_index, 0x1234_5678);
        assert_eq!(config.default_ttl, 7);
        assert_eq!(config.app_keys.len(), 2);
        assert_eq!(config.ack_timeout().unwrap(), Duration::from_millis(2500));
        assert!(config.ack_partial);
        assert!(config.to_manager_config().unwrap().ack_partial);
        assert_eq!(
            config.storage_mode().unwrap(),
            StorageMode::File {
                data_dir: "/var/lib/mesh".to_string()
            }
        );
        assert_eq!(config.network_key().unwrap().derive().nid(), 0x68);

        let keys = config.app_keys().unwrap();
        assert_eq!(keys[0].0, 0);
        assert_eq!(keys[1].0, 2);
        assert_eq!(keys[0].1.aid(), 0x26);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeshConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.unicast_address, MeshConfig::default().unicast_address);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let config = load("services: [not, a, map");
        assert_eq!(config.app_keys, BTreeMap::new());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MESH_UNICAST_ADDRESS", "0x0010"),
            ("MESH_IV_INDEX", "3"),
            ("MESH_DEFAULT_TTL", "not-a-number"),
            ("MESH_ACK_TIMEOUT", "1m"),
            ("MESH_ACK_PARTIAL", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = MeshConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.unicast_address, 0x0010);
        assert_eq!(config.iv_index, 3);
        assert_eq!(config.default_ttl, 5);
        assert!(!config.ack_partial);

        let manager = config.to_manager_config().unwrap();
        assert_eq!(manager.ack_timeout, Duration::from_secs(60));
        assert_eq!(manager.reassembly_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_validation() {
        let mut config = MeshConfig {
            unicast_address: 0xC000,
            ..MeshConfig::default()
        };
        assert!(config.validate().is_err());

        config.unicast_address = 0x0001;
        config.storage_mode = "redis".to_string();
        assert!(config.validate().is_err());

        config.storage_mode = "memory".to_string();
        config.ack_timeout = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_keys_are_errors() {
        let mut config = MeshConfig {
            network_key: "zz".to_string(),
            ..MeshConfig::default()
        };
        assert!(config.network_key().is_err());

        config.app_keys.insert(1, "0011".to_string());
        assert!(config.app_keys().is_err());
    }
}
