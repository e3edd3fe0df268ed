use serialport::{SerialPortInfo, SerialPortType};

use crate::serial_terminal::{SolTerminal, SolTerminalError};

/// USB vendor ids of boards the rig is known to ship on: genuine Arduino,
/// arduino.org, CH340 clones and FTDI-bridged boards.
const KNOWN_VENDOR_IDS: [u16; 4] = [0x2341, 0x2a03, 0x1a86, 0x0403];

#[derive(Debug, Clone)]
pub struct SolDevice {
    pub name: String,
    pub port: String,
}

impl SolDevice {
    pub fn new(name: String, port: String) -> Self {
        Self { name, port }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolConnectorError {
    #[error("Serial terminal error: {0}")]
    SerialTerminal(#[from] SolTerminalError),

    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Port {port} does not look like a solar cell rig")]
    InvalidPort { port: String },

    #[error("No solar cell rig found{}. Connect one or specify the port manually", query_suffix(.search))]
    DeviceNotFound { search: Option<String> },
}

fn query_suffix(search: &Option<String>) -> String {
    match search {
        Some(q) => format!(" matching '{}'", q),
        None => String::new(),
    }
}

pub struct SolConnector;

impl SolConnector {
    /// Connect to a rig, either on an explicit port or the first one found.
    pub fn connect(port: Option<&str>) -> Result<SolTerminal, SolConnectorError> {
        let port = if let Some(port) = port {
            log::debug!("Connecting to rig on port {}", port);
            Self::validate_port(port)?;
            port.to_string()
        } else {
            Self::get_available_devices(None)?
                .into_iter()
                .next()
                .map(|device| device.port)
                .ok_or(SolConnectorError::DeviceNotFound { search: None })?
        };

        Ok(SolTerminal::new(&port)?)
    }

    /// Validate that a given port belongs to a known board.
    fn validate_port(port: &str) -> Result<(), SolConnectorError> {
        let devices = Self::get_available_devices(None)?;

        if !devices.iter().any(|d| d.port == port) {
            return Err(SolConnectorError::InvalidPort {
                port: port.to_string(),
            });
        }

        Ok(())
    }

    fn validate_device(info: &SerialPortInfo) -> Option<SolDevice> {
        let SerialPortType::UsbPort(usb) = &info.port_type else {
            return None;
        };

        if !KNOWN_VENDOR_IDS.contains(&usb.vid) {
            return None;
        }

        let name = usb
            .product
            .clone()
            .unwrap_or_else(|| format!("usb {:04x}:{:04x}", usb.vid, usb.pid));
        Some(SolDevice::new(name, info.port_name.clone()))
    }

    /// List connected rigs, optionally filtered by a substring of the port
    /// name or product string.
    pub fn get_available_devices(
        search: Option<&str>,
    ) -> Result<Vec<SolDevice>, SolConnectorError> {
        let mut devices: Vec<SolDevice> = serialport::available_ports()?
            .iter()
            .filter_map(Self::validate_device)
            .collect();

        if let Some(query) = search {
            devices.retain(|d| d.port.contains(query) || d.name.contains(query));
        }

        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_available_devices() {
        // Depends on what is actually plugged in; only check that whatever
        // comes back is well formed.
        let result = SolConnector::get_available_devices(None);

        match result {
            Ok(devices) => {
                for device in devices {
                    assert!(!device.name.is_empty());
                    assert!(!device.port.is_empty());
                }
            }
            Err(SolConnectorError::SerialPort(_)) => {
                // Expected on hosts without serial enumeration support
            }
            Err(e) => {
                panic!("Unexpected error: {:?}", e);
            }
        }
    }

    #[test]
    fn test_search_filter_excludes_everything_on_no_match() {
        let result =
            SolConnector::get_available_devices(Some("definitely-not-a-real-port-name"));
        if let Ok(devices) = result {
            assert!(devices.is_empty());
        }
    }
}
