//! Configuration file support for bridgerd
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/bridger/bridger.toml

use bridger_flow::sim::TopologyConfig;
use bridger_flow::{FlowError, FlowManagerConfig, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bridger/bridger.toml";

/// Complete bridgerd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BridgerConfig {
    /// Flow manager tunables
    #[serde(default)]
    pub flow: FlowManagerConfig,

    /// Devices and learned addresses for the in-memory backends
    #[serde(default)]
    pub topology: TopologyConfig,
}

impl BridgerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FlowError::Configuration(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "bridgerd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(FlowError::Io(e)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.flow.validate()?;

        let mut seen = HashSet::new();
        for dev in &self.topology.device {
            if !seen.insert(dev.ifindex) {
                return Err(FlowError::Configuration(format!(
                    "duplicate device ifindex {}",
                    dev.ifindex
                )));
            }
        }

        let is_bridge = |ifindex: u32| {
            self.topology
                .device
                .iter()
                .any(|d| d.ifindex == ifindex && d.bridge)
        };

        for dev in &self.topology.device {
            if let Some(master) = dev.master {
                if !seen.contains(&master) {
                    return Err(FlowError::Configuration(format!(
                        "device {} has unknown master {}",
                        dev.name, master
                    )));
                }
            }
        }

        for entry in &self.topology.fdb {
            if !is_bridge(entry.bridge) {
                return Err(FlowError::Configuration(format!(
                    "fdb entry {} refers to {} which is not a bridge",
                    entry.addr, entry.bridge
                )));
            }
            if !seen.contains(&entry.device) {
                return Err(FlowError::Configuration(format!(
                    "fdb entry {} refers to unknown device {}",
                    entry.addr, entry.device
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[flow]
update_interval_ms = 500

[[topology.device]]
ifindex = 1
name = "br-lan"
addr = "02:00:00:00:00:01"
bridge = true

[[topology.device]]
ifindex = 2
name = "lan1"
addr = "02:00:00:00:00:02"
master = 1

[[topology.fdb]]
bridge = 1
addr = "aa:bb:cc:dd:ee:ff"
vlan = 10
device = 2
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(SAMPLE);
        let config = BridgerConfig::load_or_default(file.path()).unwrap();

        assert_eq!(config.flow.update_interval_ms, 500);
        assert_eq!(config.flow.max_flows, 65536);
        assert_eq!(config.topology.device.len(), 2);
        assert_eq!(config.topology.fdb[0].vlan, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgerConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BridgerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error_is_configuration_error() {
        let file = write_config("[flow]\nmax_flows = -1\n");
        let err = BridgerConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_dangling_references() {
        let mut config = BridgerConfig::load_or_default(write_config(SAMPLE).path()).unwrap();
        config.topology.device[1].master = Some(9);
        assert!(config.validate().is_err());

        let mut config = BridgerConfig::load_or_default(write_config(SAMPLE).path()).unwrap();
        config.topology.fdb[0].bridge = 2;
        assert!(config.validate().is_err());

        let mut config = BridgerConfig::load_or_default(write_config(SAMPLE).path()).unwrap();
        config.topology.device[1].ifindex = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let file = write_config("[flow]\nupdate_interval_ms = 0\n");
        let config = BridgerConfig::load_or_default(file.path()).unwrap();
        assert!(config.validate().is_err());
    }
}
