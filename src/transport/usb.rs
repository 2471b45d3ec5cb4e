use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, TransferType};

use crate::error::{AdbError, Result};

use super::Transport;

/// `(class, subclass, protocol)` triple an interface must expose. ADB
/// devices advertise `(0xFF, 0x42, 0x01)`; fastboot devices advertise
/// `(0xFF, 0x42, 0x03)`.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceMatcher {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceMatcher {
    pub const ADB: InterfaceMatcher = InterfaceMatcher { class: 0xFF, subclass: 0x42, protocol: 0x01 };
    pub const FASTBOOT: InterfaceMatcher = InterfaceMatcher { class: 0xFF, subclass: 0x42, protocol: 0x03 };
}

/// Optional narrowing applied during device discovery, in addition to the
/// interface matcher. `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub port_path: Option<Vec<u8>>,
    pub serial: Option<String>,
    pub device_index: Option<usize>,
}

pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    read_endpoint: u8,
    write_endpoint: u8,
    interface: u8,
    timeout: Duration,
}

impl UsbTransport {
    pub fn open(matcher: InterfaceMatcher, filter: &DeviceFilter) -> Result<Self> {
        let ctx = Context::new().map_err(usb_err)?;
        let devices = ctx.devices().map_err(usb_err)?;

        let mut candidates = Vec::new();
        for device in devices.iter() {
            if device.device_descriptor().is_err() {
                continue;
            }
            if let Some(found) = find_matching_interface(&device, matcher) {
                candidates.push((device, found));
            }
        }

        if let Some(idx) = filter.device_index {
            if idx >= candidates.len() {
                return Err(AdbError::DeviceNotFound);
            }
            let (device, interface) = candidates.into_iter().nth(idx).unwrap();
            return Self::open_device(device, interface);
        }

        for (device, interface) in candidates {
            if let Some(ref wanted_path) = filter.port_path {
                if &port_path(&device) != wanted_path {
                    continue;
                }
            }
            if let Some(ref wanted_serial) = filter.serial {
                let handle = match device.open() {
                    Ok(h) => h,
                    Err(_) => continue,
                };
                let descriptor = device.device_descriptor().map_err(usb_err)?;
                let languages = handle.read_languages(Duration::from_millis(100)).unwrap_or_default();
                let serial = languages.first().and_then(|lang| {
                    handle
                        .read_serial_number_string(*lang, &descriptor, Duration::from_millis(100))
                        .ok()
                });
                if serial.as_deref() != Some(wanted_serial.as_str()) {
                    continue;
                }
            }
            return Self::open_device(device, interface);
        }

        Err(AdbError::DeviceNotFound)
    }

    fn open_device(device: Device<Context>, interface: FoundInterface) -> Result<Self> {
        let mut handle = device.open().map_err(usb_err)?;

        #[cfg(not(target_os = "windows"))]
        {
            match handle.kernel_driver_active(interface.number) {
                Ok(true) => {
                    if let Err(e) = handle.detach_kernel_driver(interface.number) {
                        log::debug!("could not detach kernel driver: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => log::debug!("kernel_driver_active query failed: {e}"),
            }
        }

        handle.claim_interface(interface.number).map_err(usb_err)?;

        let mut transport = UsbTransport {
            handle,
            read_endpoint: interface.read_endpoint,
            write_endpoint: interface.write_endpoint,
            interface: interface.number,
            timeout: Duration::from_millis(10_000),
        };
        transport.flush();
        Ok(transport)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

impl Transport for UsbTransport {
    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        self.handle
            .write_bulk(self.write_endpoint, data, self.timeout)
            .map(|_| ())
            .map_err(usb_err)
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.handle
            .read_bulk(self.read_endpoint, buf, self.timeout)
            .map_err(usb_err)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn close(&mut self) -> Result<()> {
        self.handle.release_interface(self.interface).map_err(usb_err)
    }
}

struct FoundInterface {
    number: u8,
    read_endpoint: u8,
    write_endpoint: u8,
}

fn find_matching_interface(device: &Device<Context>, matcher: InterfaceMatcher) -> Option<FoundInterface> {
    let config = device.active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            if setting.class_code() != matcher.class
                || setting.sub_class_code() != matcher.subclass
                || setting.protocol_code() != matcher.protocol
            {
                continue;
            }
            let mut read_endpoint = None;
            let mut write_endpoint = None;
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => read_endpoint = Some(endpoint.address()),
                    Direction::Out => write_endpoint = Some(endpoint.address()),
                }
            }
            if let (Some(read_endpoint), Some(write_endpoint)) = (read_endpoint, write_endpoint) {
                return Some(FoundInterface { number: setting.interface_number(), read_endpoint, write_endpoint });
            }
        }
    }
    None
}

fn port_path(device: &Device<Context>) -> Vec<u8> {
    let mut path = vec![device.bus_number()];
    path.extend(device.port_numbers().unwrap_or_default());
    path
}

fn usb_err(err: rusb::Error) -> AdbError {
    match err {
        rusb::Error::Timeout => AdbError::ReadTimeout(Duration::from_millis(0)),
        rusb::Error::NoDevice => AdbError::TransportClosed,
        other => AdbError::TransportIo(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}
