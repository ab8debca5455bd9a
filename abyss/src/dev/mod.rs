//! Devices.

pub mod gic;
pub mod iomap;
pub mod mmio;
pub mod pl011;

/// Error raised while locating or talking to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError(pub &'static str);

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.0)
    }
}
