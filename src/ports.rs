//! Discovery of CP2102N USB-UART bridges.

use log::debug;
use serialport::SerialPortType;

use crate::Error;

/// Silicon Labs CP2102N default USB VID/PID.
pub const CP2102N_VID: u16 = 0x10C4;
pub const CP2102N_PID: u16 = 0xEA60;

/// Scans the serial ports visible to the OS and returns the device names of
/// all CP2102N bridges, in enumeration order.
pub fn find_cp2102n_ports() -> Result<Vec<String>, Error> {
    let mut matches = Vec::new();

    for port in serialport::available_ports()? {
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            debug!(
                "enumerated {} ({:04x}:{:04x})",
                port.port_name, usb.vid, usb.pid
            );

            if usb.vid == CP2102N_VID && usb.pid == CP2102N_PID {
                matches.push(port.port_name);
            }
        }
    }

    Ok(matches)
}
