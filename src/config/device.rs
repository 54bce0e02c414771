//! Device and tag-list configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{ControllerKind, DeviceDescriptor};

use super::validation::ConfigError;

/// Default scan rate in seconds.
pub const DEFAULT_SCAN_RATE: f64 = 1.0;

fn default_scan_rate() -> f64 {
    DEFAULT_SCAN_RATE
}

/// One entry of a device's tag list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSpec {
    /// Tag name as exposed by the controller.
    pub tag: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Declared data type, informational only (values are read as-is).
    #[serde(default)]
    pub data_type: Option<String>,
    /// Polling interval in seconds (default: 1.0).
    #[serde(default = "default_scan_rate")]
    pub scan_rate: f64,
}

/// One managed device: connection descriptor plus its tag list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name.
    pub name: String,
    /// Controller kind, decides the driver family.
    pub controller: ControllerKind,
    /// Network address (IP or hostname).
    pub address: String,
    /// Backplane slot override (Logix-class kinds default to 0).
    #[serde(default)]
    pub slot: Option<u8>,
    /// Tags to poll. A device without tags is skipped at start.
    #[serde(default)]
    pub tags: Vec<TagSpec>,
}

impl DeviceConfig {
    /// Connection identity for the device layer.
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            name: self.name.clone(),
            kind: self.controller,
            address: self.address.clone(),
            slot: self.slot,
        }
    }

    /// Names of all configured tags, in list order.
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.tag.clone()).collect()
    }

    /// Device scan interval: the first tag's scan rate, as the tag-list
    /// format carries one rate per device.
    pub fn scan_interval(&self) -> Duration {
        let rate = self
            .tags
            .first()
            .map(|t| t.scan_rate)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_SCAN_RATE);
        Duration::from_secs_f64(rate)
    }

    /// Validate the device entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "device name cannot be empty".to_string(),
            ));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "device '{}': address cannot be empty",
                self.name
            )));
        }
        for tag in &self.tags {
            if tag.tag.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "device '{}': tag name cannot be empty",
                    self.name
                )));
            }
            if !tag.scan_rate.is_finite() || tag.scan_rate <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "device '{}', tag '{}': scan_rate must be positive",
                    self.name, tag.tag
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_yaml_defaults() {
        let yaml = r#"
name: Line1
controller: CompactLogix
address: 192.168.1.10
tags:
  - tag: Speed
  - tag: Status
    description: Run status
    data_type: BOOL
    scan_rate: 0.5
"#;
        let config: DeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "Line1");
        assert_eq!(config.slot, None);
        assert_eq!(config.tags.len(), 2);
        assert_eq!(config.tags[0].scan_rate, DEFAULT_SCAN_RATE);
        assert_eq!(config.tags[1].scan_rate, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_interval_uses_first_tag() {
        let yaml = r#"
name: Line1
controller: Simulator
address: sim-1
tags:
  - tag: Speed
    scan_rate: 2.5
  - tag: Status
    scan_rate: 9.0
"#;
        let config: DeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn test_scan_interval_default_without_tags() {
        let yaml = r#"
name: Line1
controller: Simulator
address: sim-1
"#;
        let config: DeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert!(config.tag_names().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let base = DeviceConfig {
            name: "Line1".to_string(),
            controller: ControllerKind::Simulator,
            address: "sim-1".to_string(),
            slot: None,
            tags: vec![],
        };

        let empty_name = DeviceConfig {
            name: "  ".to_string(),
            ..base.clone()
        };
        assert!(empty_name.validate().is_err());

        let bad_rate = DeviceConfig {
            tags: vec![TagSpec {
                tag: "Speed".to_string(),
                description: None,
                data_type: None,
                scan_rate: 0.0,
            }],
            ..base.clone()
        };
        assert!(bad_rate.validate().is_err());

        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_unknown_controller_kind_fails_parse() {
        let yaml = r#"
name: Line1
controller: PLC5
address: 192.168.1.10
"#;
        assert!(serde_yaml::from_str::<DeviceConfig>(yaml).is_err());
    }
}
