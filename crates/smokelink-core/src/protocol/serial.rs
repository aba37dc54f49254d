//! Serial port handling
//!
//! Opens the remote's USB serial port as an async stream and enumerates the
//! ports a console can pick from.

use std::io;

use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt,
    SerialPortInfo, SerialPortType, SerialStream, StopBits,
};
use tracing::{debug, warn};

use super::DEFAULT_BAUD_RATE;

/// A serial port the console could connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor/product id (if USB device)
    pub usb_id: Option<(u16, u16)>,

    /// Product string (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (usb_id, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some((usb.vid, usb.pid)), usb.product),
            _ => (None, None),
        };
        Self {
            name: info.port_name,
            usb_id,
            product,
        }
    }
}

/// Sort key placing USB adapters first, each family in numeric order
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1, "ttyACM"), (2, "COM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match tokio_serial::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            warn!("failed to enumerate serial ports: {e}");
            Vec::new()
        }
    };
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open `name` as 8N1 without flow control and drop anything already queued
///
/// Must be called from within a tokio runtime.
pub fn open_port(name: &str, baud_rate: u32) -> io::Result<SerialStream> {
    let baud = if baud_rate == 0 {
        warn!("baud rate 0 requested, using {DEFAULT_BAUD_RATE}");
        DEFAULT_BAUD_RATE
    } else {
        baud_rate
    };

    let mut port = tokio_serial::new(name, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(io::Error::from)?;

    // ESP32 dev boards reset on a DTR edge; keep it asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!(port = name, "failed to set DTR: {e} (continuing)");
    }
    if let Err(e) = port.clear(ClearBuffer::All) {
        debug!(port = name, "failed to clear buffers: {e} (continuing)");
    }

    debug!(port = name, baud, "serial port opened");
    Ok(port)
}
