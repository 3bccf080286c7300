//! Device/property registry
//!
//! Devices in the order the server first mentioned them. Lookups are by exact
//! name. Only the listener mutates it once a session is up.

use crate::device::Device;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    devices: Vec<Device>,
    connected: bool,
    /// Messages that name no device
    server_messages: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn get_device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.name == name)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }

    pub fn find_or_create(&mut self, name: &str) -> &mut Device {
        match self.devices.iter().position(|d| d.name == name) {
            Some(idx) => &mut self.devices[idx],
            None => {
                tracing::debug!("New INDI device: {}", name);
                self.devices.push(Device::new(name));
                let last = self.devices.len() - 1;
                &mut self.devices[last]
            }
        }
    }

    /// Returns the removed device, if it existed
    pub fn take(&mut self, name: &str) -> Option<Device> {
        let idx = self.devices.iter().position(|d| d.name == name)?;
        Some(self.devices.remove(idx))
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.take(name).is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn add_server_message(&mut self, line: String) {
        self.server_messages.push(line);
    }

    pub fn server_messages(&self) -> &[String] {
        &self.server_messages
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.server_messages.clear();
        self.connected = false;
    }
}
