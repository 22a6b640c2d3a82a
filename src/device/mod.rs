//! Devices, the device registry, the adb bridge and device log capture.

mod bridge;
mod logcat;
mod registry;

pub use bridge::{AdbBridge, DeviceListing, DeviceState, PortForwarding};
pub use logcat::LogTail;
pub use registry::{DeviceMetadata, DeviceRegistry};

use std::collections::BTreeMap;
use std::fmt;

/// A live device or emulator, keyed by its serial number.
///
/// A device does not own the emulator process; the emulator controller does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    /// AVD backing this device, `None` for physical devices.
    pub avd_name: Option<String>,
    pub online: bool,
    pub properties: BTreeMap<String, String>,
    pub console_port: Option<u16>,
    pub adb_port: Option<u16>,
}

impl Device {
    /// A physical or already-attached device known only by serial.
    pub fn physical(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            avd_name: None,
            online: true,
            properties: BTreeMap::new(),
            console_port: None,
            adb_port: None,
        }
    }

    /// An emulator reachable on `console_port` / `adb_port`.
    pub fn emulator(avd_name: impl Into<String>, console_port: u16, adb_port: u16) -> Self {
        Self {
            serial: emulator_serial(console_port),
            avd_name: Some(avd_name.into()),
            online: true,
            properties: BTreeMap::new(),
            console_port: Some(console_port),
            adb_port: Some(adb_port),
        }
    }

    pub fn is_emulator(&self) -> bool {
        self.avd_name.is_some() || self.serial.starts_with("emulator-")
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.avd_name {
            Some(avd) => write!(f, "{} ({})", self.serial, avd),
            None => f.write_str(&self.serial),
        }
    }
}

/// Serial adb assigns to an emulator listening on `console_port`.
///
/// adb names emulators `emulator-<console port>`; the adb port is the one
/// after it and never appears in the serial.
pub fn emulator_serial(console_port: u16) -> String {
    format!("emulator-{console_port}")
}
