use super::error::Error;
use serial2::SerialPort;
use std::{io::ErrorKind, time::Duration};

pub struct DeviceInfo {
    pub port: String,
    pub serial_number: String,
}

/// Enumerate USB serial ports that look like an update target. The updater
/// runs on Raspberry Pi silicon, so only ports with the Raspberry Pi vendor
/// id are reported.
pub fn list_devices() -> Result<Vec<DeviceInfo>, Error> {
    const RASPBERRY_PI_VID: u16 = 0x2E8A;

    let mut devices: Vec<DeviceInfo> = Vec::new();

    for device in serialport::available_ports()?.into_iter() {
        if let serialport::SerialPortType::UsbPort(info) = device.port_type {
            if info.vid == RASPBERRY_PI_VID {
                devices.push(DeviceInfo {
                    port: device.port_name,
                    serial_number: info.serial_number.unwrap_or("".to_string()),
                });
            }
        }
    }

    Ok(devices)
}

/// Byte pipe to the device. The same CDC port carries the firmware stream
/// towards the device and its console text back.
pub struct SerialLink {
    serial: SerialPort,
}

impl SerialLink {
    const BAUD_RATE: u32 = 115_200;
    const READ_TIMEOUT: Duration = Duration::from_millis(16);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
    const CONSOLE_BUFFER_LENGTH: usize = 4 * 1024;

    pub fn open(port: &str) -> Result<Self, Error> {
        let mut link = SerialLink {
            serial: SerialPort::open(port, Self::BAUD_RATE)?,
        };
        link.serial.set_read_timeout(Self::READ_TIMEOUT)?;
        link.serial.set_write_timeout(Self::WRITE_TIMEOUT)?;
        Ok(link)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.serial.write_all(data)?;
        self.serial.flush()?;
        Ok(())
    }

    /// Collect whatever console text the device printed since the last call,
    /// returning once the port goes quiet.
    pub fn drain_console(&mut self) -> Result<Vec<u8>, Error> {
        let mut collected = vec![];
        let mut buffer = vec![0u8; Self::CONSOLE_BUFFER_LENGTH];
        loop {
            match self.serial.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => collected.extend(buffer[0..read].iter()),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => break,
                    _ => return Err(error.into()),
                },
            }
        }
        Ok(collected)
    }
}
