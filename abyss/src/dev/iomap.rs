//! Table of the devices the machine exposes to the guest.
//!
//! The table is produced at boot from the platform description and is
//! immutable afterwards.

/// One device (or class of devices) and where it lives.
#[derive(Debug)]
pub struct IoMap {
    /// Device type, e.g. `"gic"` or `"virtio"`.
    pub ty: &'static str,
    /// Compatibility strings, most specific first. At most five.
    pub compats: &'static [&'static str],
    /// Base addresses of the register blocks.
    pub addrs: &'static [usize],
}

/// Devices of the QEMU `virt` machine, booted with two cores.
static QEMU_VIRT: [IoMap; 4] = [
    IoMap {
        ty: "uart",
        compats: &["arm,pl011", "arm,primecell"],
        addrs: &[0x0900_0000],
    },
    IoMap {
        ty: "gic",
        compats: &["arm,cortex-a15-gic"],
        addrs: &[0x0800_0000, 0x0801_0000],
    },
    IoMap {
        ty: "virtio",
        compats: &["virtio,mmio"],
        addrs: &[0x0a00_0000, 0x0a00_0200, 0x0a00_0400, 0x0a00_0600],
    },
    IoMap {
        ty: "cpu",
        compats: &["arm,cortex-a15"],
        addrs: &[0, 1],
    },
];

/// The io-map table.
#[derive(Debug, Clone, Copy)]
pub struct IoMaps(&'static [IoMap]);

impl IoMaps {
    /// Maximum number of compatibility strings per entry.
    pub const MAX_COMPATS: usize = 5;

    /// Wrap a table.
    pub const fn new(maps: &'static [IoMap]) -> Self {
        Self(maps)
    }

    /// Table of the QEMU `virt` machine.
    pub const fn qemu_virt() -> Self {
        Self(&QEMU_VIRT)
    }

    /// First entry whose type is `ty`.
    pub fn find_type(&self, ty: &str) -> Option<&'static IoMap> {
        self.0.iter().find(|m| m.ty == ty)
    }

    /// First entry listing `compat` among its compatibility strings.
    pub fn find_compatible(&self, compat: &str) -> Option<&'static IoMap> {
        self.0.iter().find(|m| {
            m.compats
                .iter()
                .take(Self::MAX_COMPATS)
                .any(|c| *c == compat)
        })
    }
}
