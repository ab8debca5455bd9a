//! Generic Interrupt Controller (GICv2) driver.
//!
//! Only what a software-generated interrupt round trip needs: the
//! distributor (shared by all cores) and the CPU interface (banked per
//! core, so every core sees its own copy at the same address).
use super::{iomap::IoMaps, mmio::Mmio, mmio::MmioMapper, DeviceError};
use alloc::boxed::Box;
use bitflags::bitflags;

/// Compatibility strings of the supported controllers.
pub const COMPATIBLE: [&str; 2] = ["arm,cortex-a15-gic", "arm,gic-400"];

const GICD_SIZE: usize = 0x1000;
const GICC_SIZE: usize = 0x1000;

// Distributor registers.
const GICD_CTLR: usize = 0x000;
const GICD_IIDR: usize = 0x008;
const GICD_ISENABLER: usize = 0x100;
const GICD_SGIR: usize = 0xf00;

// CPU interface registers.
const GICC_CTLR: usize = 0x00;
const GICC_PMR: usize = 0x04;
const GICC_IAR: usize = 0x0c;
const GICC_EOIR: usize = 0x10;

const GICC_INT_ID_MASK: u32 = 0x3ff;
const GICC_CPU_ID_SHIFT: u32 = 10;
const GICC_CPU_ID_MASK: u32 = 0x7;
const GICD_SGI_TARGET_SHIFT: u32 = 16;
const GICD_SGI_ID_MASK: u32 = 0xf;

/// Interrupt id returned by the acknowledge register when nothing is pending.
pub const SPURIOUS_IRQ: u32 = 1023;

bitflags! {
    /// GICD_CTLR.
    pub struct DistributorControl: u32 {
        /// Forward pending interrupts to the CPU interfaces.
        const ENABLE = 1 << 0;
    }
}

bitflags! {
    /// GICC_CTLR.
    pub struct CpuInterfaceControl: u32 {
        /// Signal interrupts to the processor.
        const ENABLE = 1 << 0;
    }
}

/// An interrupt taken from the CPU interface and not yet completed.
///
/// It has to be handed back to [`Gic::end_of_interrupt`]; dropping it leaves
/// the interrupt active in the controller.
#[must_use = "an acknowledged interrupt must be completed with end_of_interrupt"]
#[derive(Debug, PartialEq, Eq)]
pub struct Acknowledged {
    cpu: usize,
    irq: u32,
}

impl Acknowledged {
    /// Decode an interrupt acknowledge register value.
    pub fn decode(iar: u32) -> Self {
        Self {
            cpu: ((iar >> GICC_CPU_ID_SHIFT) & GICC_CPU_ID_MASK) as usize,
            irq: iar & GICC_INT_ID_MASK,
        }
    }

    /// Encode for the end of interrupt register.
    pub fn encode(&self) -> u32 {
        ((self.cpu as u32 & GICC_CPU_ID_MASK) << GICC_CPU_ID_SHIFT) | (self.irq & GICC_INT_ID_MASK)
    }

    /// Core that raised the interrupt (software-generated interrupts only).
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Interrupt id.
    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// Whether the controller had nothing pending for this core.
    pub fn is_spurious(&self) -> bool {
        self.irq == SPURIOUS_IRQ
    }
}

/// A GICv2: distributor plus CPU interface.
pub struct Gic {
    dist: Box<dyn Mmio>,
    cpu: Box<dyn Mmio>,
}

impl Gic {
    /// Build from already mapped register blocks.
    pub fn new(dist: Box<dyn Mmio>, cpu: Box<dyn Mmio>) -> Self {
        Self { dist, cpu }
    }

    /// Locate the controller in the io-map and map both register blocks.
    pub fn probe(maps: &IoMaps, mapper: &dyn MmioMapper) -> Result<Self, DeviceError> {
        let map = COMPATIBLE
            .iter()
            .find_map(|c| maps.find_compatible(c))
            .ok_or(DeviceError("no interrupt controller in io-map"))?;
        match map.addrs {
            [dist, cpu, ..] => Ok(Self::new(
                mapper.map(*dist, GICD_SIZE)?,
                mapper.map(*cpu, GICC_SIZE)?,
            )),
            _ => Err(DeviceError("interrupt controller io-map entry is incomplete")),
        }
    }

    /// Turn on interrupt forwarding in the distributor.
    pub fn enable_distributor(&self) {
        self.dist
            .write32(GICD_CTLR, DistributorControl::ENABLE.bits());
    }

    /// Turn on interrupt signalling in the executing core's CPU interface.
    pub fn enable_cpu_interface(&self) {
        self.cpu
            .write32(GICC_CTLR, CpuInterfaceControl::ENABLE.bits());
    }

    /// Only interrupts with a priority value lower than `mask` are signalled.
    pub fn set_priority_mask(&self, mask: u8) {
        self.cpu.write32(GICC_PMR, mask as u32);
    }

    /// Set the enable bit of interrupt `id` in the distributor.
    pub fn enable_irq(&self, id: u32) {
        let offset = GICD_ISENABLER + (id / 32) as usize * 4;
        self.dist.write32(offset, 1 << (id % 32));
    }

    /// Send software-generated interrupt `irq` to core `target`.
    pub fn signal(&self, target: usize, irq: u32) {
        assert!(target < 8, "GICv2 addresses at most 8 cores");
        self.dist.write32(
            GICD_SGIR,
            (1 << (GICD_SGI_TARGET_SHIFT + target as u32)) | (irq & GICD_SGI_ID_MASK),
        );
    }

    /// Take the highest priority pending interrupt of the executing core.
    pub fn acknowledge(&self) -> Acknowledged {
        Acknowledged::decode(self.cpu.read32(GICC_IAR))
    }

    /// Complete an interrupt returned by [`Gic::acknowledge`].
    pub fn end_of_interrupt(&self, ack: Acknowledged) {
        self.cpu.write32(GICC_EOIR, ack.encode());
    }

    /// Write the spurious id to the end of interrupt register.
    ///
    /// The controller ignores it, which makes it a pure exit.
    pub fn end_of_spurious(&self) {
        self.cpu.write32(GICC_EOIR, SPURIOUS_IRQ);
    }

    /// Read the distributor implementer identification register.
    pub fn implementer(&self) -> u32 {
        self.dist.read32(GICD_IIDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<(usize, u32)>>>, u32);

    impl Mmio for Log {
        fn read32(&self, _offset: usize) -> u32 {
            self.1
        }
        fn write32(&self, offset: usize, value: u32) {
            self.0.lock().unwrap().push((offset, value));
        }
    }

    fn gic(iar: u32) -> (Gic, Log, Log) {
        let dist = Log::default();
        let cpu = Log(Default::default(), iar);
        (
            Gic::new(Box::new(dist.clone()), Box::new(cpu.clone())),
            dist,
            cpu,
        )
    }

    #[test]
    fn acknowledge_decodes_cpu_and_irq() {
        let ack = Acknowledged::decode((5 << 10) | 0x3ff | (1 << 13));
        assert_eq!(ack.cpu(), 5);
        assert!(ack.is_spurious());
        let ack = Acknowledged::decode((1 << 10) | 1);
        assert_eq!((ack.cpu(), ack.irq()), (1, 1));
        assert_eq!(ack.encode(), 0x401);
    }

    #[test]
    fn registers() {
        let (gic, dist, cpu) = gic((1 << 10) | 1);
        gic.enable_distributor();
        gic.enable_irq(1);
        gic.enable_irq(33);
        gic.signal(1, 1);
        gic.enable_cpu_interface();
        gic.set_priority_mask(0xff);
        let ack = gic.acknowledge();
        gic.end_of_interrupt(ack);
        assert_eq!(
            *dist.0.lock().unwrap(),
            [(0x000, 1), (0x100, 1 << 1), (0x104, 1 << 1), (0xf00, 0x0002_0001)]
        );
        assert_eq!(
            *cpu.0.lock().unwrap(),
            [(0x00, 1), (0x04, 0xff), (0x10, 0x401)]
        );
    }
}
