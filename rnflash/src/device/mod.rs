//! Serial port discovery and USB bridge classification.
//!
//! RN2483/RN2903 evaluation boards (RN2483 PICtail, LoRa Mote, RN2903 click)
//! expose the module UART through a Microchip USB bridge; custom boards
//! commonly use FTDI, CP210x or CH340 adapters.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge kinds that sit in front of RN2xx3 modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// Microchip MCP2200 USB-to-UART bridge (RN2483 PICtail, LoRa Mote).
    Mcp2200,
    /// Microchip MCP2221/MCP2221A USB-to-UART/I2C bridge.
    Mcp2221,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Unknown device.
    Unknown,
}

const MICROCHIP_VID: u16 = 0x04D8;

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (MICROCHIP_VID, &[0x00DF], DeviceKind::Mcp2200),
    (MICROCHIP_VID, &[0x00DD], DeviceKind::Mcp2221),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x1A86, &[0x7523, 0x5523], DeviceKind::Ch340),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, device)| *device)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mcp2200 => "MCP2200",
            Self::Mcp2221 => "MCP2221",
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Microchip bridges ship on the official RN2xx3 boards.
    pub fn is_microchip(&self) -> bool {
        matches!(self, Self::Mcp2200 | Self::Mcp2221)
    }
}

/// Discovered serial port with USB metadata.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified bridge kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this port is likely wired to an RN2xx3 module.
    pub fn is_likely_module(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort {
                name: port_info.port_name.clone(),
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            };

            if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                );
                detected.vid = Some(usb_info.vid);
                detected.pid = Some(usb_info.pid);
                detected.manufacturer = usb_info.manufacturer;
                detected.product = usb_info.product;
                detected.serial = usb_info.serial_number;
            }

            detected
        })
        .collect()
}

/// Without a native backend there is nothing to enumerate.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect ports that are likely wired to an RN2xx3 module.
pub fn detect_module_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_module)
        .collect()
}

/// Pick the best candidate from a list of ports.
///
/// Microchip bridges win over generic adapters, which win over unclassified
/// ports.
pub fn select_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    ports
        .iter()
        .find(|p| p.device.is_microchip())
        .or_else(|| ports.iter().find(|p| p.device.is_known()))
        .or_else(|| ports.first())
}

/// Auto-detect a single serial port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = select_port(&ports).ok_or(Error::DeviceNotFound)?;

    if port.device.is_known() {
        info!("Auto-detected {} USB-UART bridge: {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port.clone())
}

/// Auto-detection needs the native backend.
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "Port auto-detection requires the `native` feature".to_string(),
    ))
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, device: DeviceKind) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x00DF), DeviceKind::Mcp2200);
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x00DD), DeviceKind::Mcp2221);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x000A), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_select_port_prefers_microchip_bridge() {
        let ports = vec![
            port("/dev/ttyS0", DeviceKind::Unknown),
            port("/dev/ttyUSB0", DeviceKind::Ftdi),
            port("/dev/ttyACM0", DeviceKind::Mcp2200),
        ];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_port_falls_back_to_first() {
        let ports = vec![port("/dev/ttyS0", DeviceKind::Unknown), port("/dev/ttyS1", DeviceKind::Unknown)];
        assert_eq!(select_port(&ports).unwrap().name, "/dev/ttyS0");
        assert!(select_port(&[]).is_none());
    }

    #[test]
    fn test_format_port_list() {
        let mut mote = port("/dev/ttyACM0", DeviceKind::Mcp2200);
        mote.product = Some("LoRa Mote".to_string());
        let mut bare = port("/dev/ttyUSB1", DeviceKind::Unknown);
        bare.vid = Some(0x1234);
        bare.pid = Some(0xABCD);

        let formatted = format_port_list(&[mote, bare]);
        assert_eq!(formatted[0], "/dev/ttyACM0 [MCP2200] - LoRa Mote");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1234 PID:ABCD]");
    }
}
