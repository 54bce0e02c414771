//! Tag driver boundary.
//!
//! The controller wire protocol lives outside this crate. [`TagDriver`] is
//! the seam a protocol library plugs into, and [`DriverRegistry`] maps each
//! driver family to a constructor. The crate ships one built-in family: the
//! in-process simulator ([`crate::device::sim`]), used by tests and demos.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::value::TagValue;

/// Errors crossing the driver boundary.
///
/// All of these are non-fatal to the process: the owning session counts
/// them and retries on the next poll cycle.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Connection establishment or handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A read request failed at the protocol level.
    #[error("read failed: {0}")]
    Read(String),

    /// A write request failed at the protocol level.
    #[error("write failed: {0}")]
    Write(String),

    /// No driver constructor registered for the requested family.
    #[error("no driver registered for family '{0}'")]
    Unsupported(DriverFamily),

    /// Underlying transport error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Driver families a controller kind can map to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DriverFamily {
    /// Logix-class controllers (tag-based addressing).
    Logix,
    /// SLC/MicroLogix-class controllers (file-based addressing).
    Slc,
    /// In-process simulated controller.
    Simulator,
}

/// Supported controller kinds.
///
/// Each kind maps to the driver family that speaks its protocol and the
/// backplane slot convention of that family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
pub enum ControllerKind {
    CompactLogix,
    ControlLogix,
    MicroLogix1100,
    MicroLogix1400,
    Micro850,
    Simulator,
}

impl ControllerKind {
    /// Driver family that speaks this controller's protocol.
    pub fn family(&self) -> DriverFamily {
        match self {
            Self::CompactLogix | Self::ControlLogix | Self::Micro850 => DriverFamily::Logix,
            Self::MicroLogix1100 | Self::MicroLogix1400 => DriverFamily::Slc,
            Self::Simulator => DriverFamily::Simulator,
        }
    }

    /// Default backplane slot, for kinds that have one.
    pub fn default_slot(&self) -> Option<u8> {
        match self.family() {
            DriverFamily::Logix => Some(0),
            DriverFamily::Slc | DriverFamily::Simulator => None,
        }
    }
}

/// Connection identity of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Unique device name.
    pub name: String,
    /// Controller kind, decides the driver family.
    pub kind: ControllerKind,
    /// Network address (IP or hostname) of the controller.
    pub address: String,
    /// Backplane slot override.
    pub slot: Option<u8>,
}

impl DeviceDescriptor {
    /// Configured slot, falling back to the kind's default.
    pub fn effective_slot(&self) -> Option<u8> {
        self.slot.or_else(|| self.kind.default_slot())
    }
}

/// Protocol driver for one controller connection.
///
/// Implementations hold the live connection handle. `read` returns the
/// subset of requested tags the controller answered for; a missing tag is
/// a partial result, not an error.
#[async_trait]
pub trait TagDriver: Send {
    /// Establish the connection.
    async fn open(&mut self) -> Result<(), DriverError>;

    /// Tear down the connection. Never fails.
    async fn close(&mut self);

    /// Read the named tags, returning whichever resolved.
    async fn read(&mut self, tags: &[String]) -> Result<Vec<(String, TagValue)>, DriverError>;

    /// Write a single tag value.
    async fn write(&mut self, tag: &str, value: TagValue) -> Result<(), DriverError>;
}

/// Constructor producing a driver for a device descriptor.
pub type DriverConstructor =
    Box<dyn Fn(&DeviceDescriptor) -> Result<Box<dyn TagDriver>, DriverError> + Send + Sync>;

/// Maps driver families to constructors.
///
/// Embedders register real protocol drivers here; a device whose family
/// has no constructor fails its own setup and nothing else.
#[derive(Default)]
pub struct DriverRegistry {
    constructors: HashMap<DriverFamily, DriverConstructor>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("families", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry with no drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a driver family, replacing any previous
    /// registration.
    pub fn register(&mut self, family: DriverFamily, constructor: DriverConstructor) {
        self.constructors.insert(family, constructor);
    }

    /// Builder-style [`Self::register`].
    #[must_use]
    pub fn with(mut self, family: DriverFamily, constructor: DriverConstructor) -> Self {
        self.register(family, constructor);
        self
    }

    /// Construct a driver for the descriptor's controller kind.
    pub fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn TagDriver>, DriverError> {
        let family = descriptor.kind.family();
        let constructor = self
            .constructors
            .get(&family)
            .ok_or(DriverError::Unsupported(family))?;
        constructor(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_kind_families() {
        assert_eq!(ControllerKind::CompactLogix.family(), DriverFamily::Logix);
        assert_eq!(ControllerKind::Micro850.family(), DriverFamily::Logix);
        assert_eq!(ControllerKind::MicroLogix1400.family(), DriverFamily::Slc);
        assert_eq!(ControllerKind::Simulator.family(), DriverFamily::Simulator);
    }

    #[test]
    fn test_default_slots() {
        assert_eq!(ControllerKind::CompactLogix.default_slot(), Some(0));
        assert_eq!(ControllerKind::MicroLogix1100.default_slot(), None);
    }

    #[test]
    fn test_effective_slot_override() {
        let descriptor = DeviceDescriptor {
            name: "Line1".to_string(),
            kind: ControllerKind::ControlLogix,
            address: "192.168.1.10".to_string(),
            slot: Some(3),
        };
        assert_eq!(descriptor.effective_slot(), Some(3));

        let descriptor = DeviceDescriptor {
            slot: None,
            ..descriptor
        };
        assert_eq!(descriptor.effective_slot(), Some(0));
    }

    #[test]
    fn test_registry_unsupported_family() {
        let registry = DriverRegistry::new();
        let descriptor = DeviceDescriptor {
            name: "Line1".to_string(),
            kind: ControllerKind::CompactLogix,
            address: "192.168.1.10".to_string(),
            slot: None,
        };

        let result = registry.create(&descriptor);
        assert!(matches!(result, Err(DriverError::Unsupported(_))));
    }

    #[test]
    fn test_controller_kind_parses_config_names() {
        use std::str::FromStr;
        assert_eq!(
            ControllerKind::from_str("CompactLogix").unwrap(),
            ControllerKind::CompactLogix
        );
        assert!(ControllerKind::from_str("PLC5").is_err());
    }
}
