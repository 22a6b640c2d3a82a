use super::Device;
use crate::core::error::{Error, Result};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Metadata bound to a registered device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    /// Qualifier of the container that owns the device.
    pub qualifier: String,
    /// Deployment names bound to the device, in binding order, without
    /// duplicates.
    pub deployments: Vec<String>,
}

impl DeviceMetadata {
    pub fn new(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            deployments: Vec::new(),
        }
    }

    pub fn with_deployment(mut self, name: impl Into<String>) -> Self {
        self.add_deployment(name);
        self
    }

    /// Bind a deployment name. Binding the same name twice is a no-op.
    pub fn add_deployment(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.deployments.contains(&name) {
            self.deployments.push(name);
        }
    }

    pub fn has_deployment(&self, name: &str) -> bool {
        self.deployments.iter().any(|d| d == name)
    }
}

/// In-memory directory of live devices and their metadata.
///
/// Scoped to one session; create it at session start and drop it at session
/// end. Every accessor returns clones, never references into the registry.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: RwLock<Vec<(Device, DeviceMetadata)>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(Device, DeviceMetadata)>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(Device, DeviceMetadata)>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `device`, or merge into an existing registration.
    ///
    /// For a device that is already present the device record is refreshed
    /// and the deployment names in `metadata` are appended to the existing
    /// metadata; the original qualifier is kept.
    pub fn put(&self, device: Device, metadata: DeviceMetadata) {
        let mut entries = self.write();
        match entries.iter_mut().find(|(d, _)| d.serial == device.serial) {
            Some((existing, existing_meta)) => {
                *existing = device;
                for name in metadata.deployments {
                    existing_meta.add_deployment(name);
                }
            }
            None => {
                tracing::debug!(serial = %device.serial, qualifier = %metadata.qualifier, "device registered");
                entries.push((device, metadata));
            }
        }
    }

    /// Bind `deployment` to the device with `serial`.
    pub fn bind_deployment(&self, serial: &str, deployment: &str) -> Result<()> {
        let mut entries = self.write();
        let (_, meta) = entries
            .iter_mut()
            .find(|(d, _)| d.serial == serial)
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))?;
        meta.add_deployment(deployment);
        Ok(())
    }

    /// Unbind `deployment` from whichever device holds it.
    pub fn unbind_deployment(&self, deployment: &str) -> bool {
        let mut entries = self.write();
        for (_, meta) in entries.iter_mut() {
            if let Some(pos) = meta.deployments.iter().position(|d| d == deployment) {
                meta.deployments.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn metadata(&self, device: &Device) -> Option<DeviceMetadata> {
        self.read()
            .iter()
            .find(|(d, _)| d.serial == device.serial)
            .map(|(_, m)| m.clone())
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.read().iter().any(|(d, _)| d.serial == device.serial)
    }

    /// Look up a device by serial.
    pub fn get(&self, serial: &str) -> Option<Device> {
        self.read()
            .iter()
            .find(|(d, _)| d.serial == serial)
            .map(|(d, _)| d.clone())
    }

    /// Remove a device. Returns the removed registration, if any.
    pub fn remove(&self, device: &Device) -> Option<(Device, DeviceMetadata)> {
        let mut entries = self.write();
        let pos = entries.iter().position(|(d, _)| d.serial == device.serial)?;
        Some(entries.remove(pos))
    }

    /// Remove every device owned by `qualifier`.
    pub fn remove_by_qualifier(&self, qualifier: &str) -> Vec<Device> {
        let mut entries = self.write();
        let (removed, kept): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|(_, m)| m.qualifier == qualifier);
        *entries = kept;
        removed.into_iter().map(|(d, _)| d).collect()
    }

    /// Devices owned by `qualifier`.
    pub fn by_qualifier(&self, qualifier: &str) -> Vec<Device> {
        self.read()
            .iter()
            .filter(|(_, m)| m.qualifier == qualifier)
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// The device a deployment is bound to.
    pub fn by_deployment_name(&self, deployment: &str) -> Option<Device> {
        self.read()
            .iter()
            .find(|(_, m)| m.has_deployment(deployment))
            .map(|(d, _)| d.clone())
    }

    /// The only registered device. Fails unless exactly one is registered.
    pub fn single(&self) -> Result<Device> {
        let entries = self.read();
        match entries.as_slice() {
            [(device, _)] => Ok(device.clone()),
            [] => Err(Error::DeviceNotFound("no device registered".to_string())),
            many => Err(Error::lifecycle(format!(
                "expected exactly one registered device, found {}",
                many.len()
            ))),
        }
    }

    pub fn size(&self) -> usize {
        self.read().len()
    }

    /// Snapshot of all registered devices.
    pub fn devices(&self) -> Vec<Device> {
        self.read().iter().map(|(d, _)| d.clone()).collect()
    }
}
