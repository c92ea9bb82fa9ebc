//! rusb-backed trainer port for the Fortius head unit.
//!
//! The head unit is a plain bulk device: commands go out on endpoint 0x02,
//! telemetry comes back on 0x82. Transfers use the protocol's fixed 500 ms
//! timeout.

use bridge_core::{PortError, TrainerPort};
use fortius_protocol::{PRODUCT_ID_FORTIUS, PRODUCT_ID_SOLID_BLUE, USB_TIMEOUT_MS, VENDOR_ID};
use rusb::{Context, DeviceHandle, UsbContext};
use std::time::Duration;

const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x82;
const INTERFACE: u8 = 0;

fn usb_error(err: rusb::Error) -> PortError {
    match err {
        rusb::Error::Timeout => PortError::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => PortError::NotFound,
        other => PortError::Io(other.to_string()),
    }
}

/// Exclusive bulk access to a Fortius head unit.
pub struct FortiusUsbPort {
    context: Context,
    handle: Option<DeviceHandle<Context>>,
    timeout: Duration,
}

impl FortiusUsbPort {
    pub fn new() -> Result<Self, PortError> {
        let context = Context::new().map_err(usb_error)?;
        Ok(Self {
            context,
            handle: None,
            timeout: Duration::from_millis(USB_TIMEOUT_MS),
        })
    }
}

impl TrainerPort for FortiusUsbPort {
    fn open(&mut self) -> Result<(), PortError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut handle = [PRODUCT_ID_FORTIUS, PRODUCT_ID_SOLID_BLUE]
            .iter()
            .find_map(|&pid| self.context.open_device_with_vid_pid(VENDOR_ID, pid))
            .ok_or(PortError::NotFound)?;

        // Not supported everywhere; claiming will fail loudly if a kernel
        // driver really is in the way.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(INTERFACE).map_err(usb_error)?;

        tracing::info!("Fortius head unit opened");
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.release_interface(INTERFACE);
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, PortError> {
        let handle = self.handle.as_ref().ok_or(PortError::Closed)?;
        handle
            .write_bulk(ENDPOINT_OUT, frame, self.timeout)
            .map_err(usb_error)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let handle = self.handle.as_ref().ok_or(PortError::Closed)?;
        handle
            .read_bulk(ENDPOINT_IN, buf, self.timeout)
            .map_err(usb_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(usb_error(rusb::Error::Timeout), PortError::Timeout);
        assert_eq!(usb_error(rusb::Error::NoDevice), PortError::NotFound);
        assert!(matches!(usb_error(rusb::Error::Pipe), PortError::Io(_)));
    }
}
