//! PL011 serial device driver.
use super::mmio::Mmio;
use alloc::boxed::Box;

const UARTDR: usize = 0x00;
const UARTFR: usize = 0x18;
const UARTFR_TXFF: u32 = 1 << 5;

/// Compatibility string of the device.
pub const COMPATIBLE: &str = "arm,pl011";

pub struct Pl011 {
    regs: Box<dyn Mmio>,
}

impl Pl011 {
    /// Create a new serial device interface.
    pub fn new(regs: Box<dyn Mmio>) -> Self {
        Self { regs }
    }

    fn write_byte(&self, b: u8) {
        for _ in 0..12800 {
            if self.regs.read32(UARTFR) & UARTFR_TXFF == 0 {
                break;
            }
            core::hint::spin_loop();
        }
        self.regs.write32(UARTDR, b as u32);
    }
}

impl core::fmt::Write for Pl011 {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use std::sync::{Arc, Mutex};

    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Mmio for Wire {
        fn read32(&self, _offset: usize) -> u32 {
            0
        }
        fn write32(&self, offset: usize, value: u32) {
            assert_eq!(offset, UARTDR);
            self.0.lock().unwrap().push(value as u8);
        }
    }

    #[test]
    fn translates_newlines() {
        let wire = Arc::new(Mutex::new(Vec::new()));
        let mut uart = Pl011::new(Box::new(Wire(wire.clone())));
        write!(uart, "hvc\t42\n").unwrap();
        assert_eq!(&*wire.lock().unwrap(), b"hvc\t42\r\n");
    }
}
