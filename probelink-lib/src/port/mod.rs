#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod other;

#[cfg(target_os = "linux")]
use linux::is_port_open;
#[cfg(not(target_os = "linux"))]
use other::is_port_open;

pub use serialport::SerialPort;
pub use tokio_serial::SerialStream;

use anyhow::Result;
use core::time::Duration;
use log::debug;
use serialport::{self, SerialPortType};
use thiserror::Error;
use tokio_serial::SerialPortBuilderExt;

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no probe compatible ports found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x2341, 0x0043), // Arduino Uno
    UsbId(0x2341, 0x8036), // Arduino Leonardo
    UsbId(0x1b4f, 0x9208), // SparkFun LilyPad USB
    UsbId(0x1a86, 0x7523), // QinHeng Electronics HL-340 USB-Serial adapter
    UsbId(0x0403, 0x6001), // FTDI FT232R USB UART
];

fn resolve_name(port_name: &str, force: bool) -> Result<String> {
    let true_name: String = if port_name == "auto" {
        guess_port()?
    } else {
        port_name.to_string()
    };

    if !force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    Ok(true_name)
}

pub fn open_port(port_name: &str, baudrate: u32, force: bool) -> Result<Box<dyn SerialPort>> {
    let true_name = resolve_name(port_name, force)?;

    let mut port = serialport::new(&true_name, baudrate).open()?;
    port.set_timeout(Duration::from_millis(10))?;

    debug!("open_port OK: {} @ {} baud", &true_name, baudrate);
    Ok(port)
}

pub fn open_port_async(port_name: &str, baudrate: u32, force: bool) -> Result<SerialStream> {
    let true_name = resolve_name(port_name, force)?;

    let port = tokio_serial::new(&true_name, baudrate).open_native_async()?;

    debug!("open_port_async OK: {} @ {} baud", &true_name, baudrate);
    Ok(port)
}

fn guess_port() -> Result<String> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
                    && !is_port_open(&info.port_name)
            }
            SerialPortType::Unknown | SerialPortType::PciPort | SerialPortType::BluetoothPort => {
                false
            }
        })
        .map(|info| info.port_name)
        .next()
        .ok_or_else(|| OpenPortError::NoCompatiblePort.into())
}
