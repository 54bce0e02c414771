//! In-process simulated controller.
//!
//! Backs the built-in `Simulator` driver family. A [`SimBank`] holds one
//! [`SimDevice`] per address; tests and demos script tag values and inject
//! connect/read failures through the shared handles.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::device::driver::{
    DeviceDescriptor, DriverError, DriverFamily, DriverRegistry, TagDriver,
};
use crate::value::TagValue;

#[derive(Debug, Default)]
struct SimState {
    tags: BTreeMap<String, TagValue>,
    offline: bool,
    fail_connects: u32,
    fail_reads: u32,
}

/// Shared handle to one simulated controller.
#[derive(Debug, Clone, Default)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set (or add) a tag value on the device.
    pub fn set_tag(&self, name: impl Into<String>, value: impl Into<TagValue>) {
        self.lock().tags.insert(name.into(), value.into());
    }

    /// Remove a tag so subsequent reads omit it.
    pub fn remove_tag(&self, name: &str) {
        self.lock().tags.remove(name);
    }

    /// Current value of a tag, if present.
    pub fn tag(&self, name: &str) -> Option<TagValue> {
        self.lock().tags.get(name).cloned()
    }

    /// Take the device offline (connects fail) or back online.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Fail the next `n` read calls.
    pub fn fail_next_reads(&self, n: u32) {
        self.lock().fail_reads = n;
    }
}

/// Registry of simulated controllers, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct SimBank {
    devices: Arc<Mutex<HashMap<String, SimDevice>>>,
}

impl SimBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the device at `address`, created empty on first use.
    pub fn device(&self, address: &str) -> SimDevice {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

/// Driver for one simulated controller connection.
pub struct SimDriver {
    device: SimDevice,
    open: bool,
}

impl SimDriver {
    pub fn new(device: SimDevice) -> Self {
        Self {
            device,
            open: false,
        }
    }
}

#[async_trait]
impl TagDriver for SimDriver {
    async fn open(&mut self) -> Result<(), DriverError> {
        let mut state = self.device.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(DriverError::Connect("simulated connect failure".into()));
        }
        if state.offline {
            return Err(DriverError::Connect("device offline".into()));
        }
        drop(state);

        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn read(&mut self, tags: &[String]) -> Result<Vec<(String, TagValue)>, DriverError> {
        if !self.open {
            return Err(DriverError::Read("connection not open".into()));
        }

        let mut state = self.device.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(DriverError::Read("simulated read failure".into()));
        }

        // Unknown tags are omitted: a partial result, not an error.
        Ok(tags
            .iter()
            .filter_map(|name| state.tags.get(name).map(|v| (name.clone(), v.clone())))
            .collect())
    }

    async fn write(&mut self, tag: &str, value: TagValue) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::Write("connection not open".into()));
        }

        self.device.lock().tags.insert(tag.to_string(), value);
        Ok(())
    }
}

/// Register the simulator family on a registry, backed by `bank`.
pub fn register_simulator(registry: &mut DriverRegistry, bank: SimBank) {
    registry.register(
        DriverFamily::Simulator,
        Box::new(move |descriptor: &DeviceDescriptor| {
            Ok(Box::new(SimDriver::new(bank.device(&descriptor.address))) as Box<dyn TagDriver>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::driver::ControllerKind;

    fn descriptor(address: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "SimLine".to_string(),
            kind: ControllerKind::Simulator,
            address: address.to_string(),
            slot: None,
        }
    }

    #[tokio::test]
    async fn test_read_returns_known_subset() {
        let bank = SimBank::new();
        let device = bank.device("10.0.0.1");
        device.set_tag("Speed", 42.5);
        device.set_tag("Status", true);

        let mut driver = SimDriver::new(bank.device("10.0.0.1"));
        driver.open().await.unwrap();

        let tags = vec![
            "Speed".to_string(),
            "Status".to_string(),
            "Missing".to_string(),
        ];
        let result = driver.read(&tags).await.unwrap();
        assert_eq!(result.len(), 2);

        driver.close().await;
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let bank = SimBank::new();
        let device = bank.device("10.0.0.2");
        device.set_tag("Speed", 1_i64);
        device.fail_next_reads(1);

        let mut driver = SimDriver::new(device);
        driver.open().await.unwrap();

        let tags = vec!["Speed".to_string()];
        assert!(driver.read(&tags).await.is_err());
        assert_eq!(driver.read(&tags).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_device_refuses_connect() {
        let bank = SimBank::new();
        bank.device("10.0.0.3").set_offline(true);

        let mut driver = SimDriver::new(bank.device("10.0.0.3"));
        assert!(matches!(
            driver.open().await,
            Err(DriverError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_write_updates_bank() {
        let bank = SimBank::new();
        let mut driver = SimDriver::new(bank.device("10.0.0.4"));
        driver.open().await.unwrap();
        driver.write("Setpoint", TagValue::Integer(55)).await.unwrap();

        assert_eq!(bank.device("10.0.0.4").tag("Setpoint"), Some(TagValue::Integer(55)));
    }

    #[tokio::test]
    async fn test_registry_wiring() {
        let bank = SimBank::new();
        bank.device("10.0.0.5").set_tag("Speed", 2.0);

        let mut registry = DriverRegistry::new();
        register_simulator(&mut registry, bank);

        let mut driver = registry.create(&descriptor("10.0.0.5")).unwrap();
        driver.open().await.unwrap();
        let result = driver.read(&["Speed".to_string()]).await.unwrap();
        assert_eq!(result, vec![("Speed".to_string(), TagValue::Float(2.0))]);
    }
}
