//! Exits that only involve the executing core.
use crate::{ipi::Ipi, Context, Error, ExitTest};
use abyss::{
    cpu::elapsed,
    dev::{gic::Gic, mmio::Mmio, DeviceError},
};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};

/// Every test, in reporting order.
pub fn all() -> Vec<Box<dyn ExitTest>> {
    vec![
        Box::new(Hvc),
        Box::new(NoopGuest),
        Box::new(MmioReadUser::default()),
        Box::new(MmioReadVgic::default()),
        Box::new(Eoi::default()),
        Box::new(Ipi::default()),
    ]
}

/// Time `op` with two counter reads.
#[inline]
fn timed(ctx: &Context, op: impl FnOnce()) -> u64 {
    let t1 = ctx.read_cycles();
    op();
    let t2 = ctx.read_cycles();
    elapsed(t1, t2)
}

/// An empty hypercall.
pub struct Hvc;

impl ExitTest for Hvc {
    fn name(&self) -> &'static str {
        "hvc"
    }

    fn run(&self, ctx: &Context) -> u64 {
        timed(ctx, || ctx.cpu().hypercall())
    }
}

/// Nothing at all: the cost of the measurement itself.
pub struct NoopGuest;

impl ExitTest for NoopGuest {
    fn name(&self) -> &'static str {
        "noop_guest"
    }

    fn run(&self, ctx: &Context) -> u64 {
        timed(ctx, || ())
    }
}

pub const VIRTIO_MMIO_COMPATIBLE: &str = "virtio,mmio";
pub const VIRTIO_MMIO_MAGIC: u32 = 0x7472_6976;
const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000;
const VIRTIO_MMIO_SIZE: usize = 0x200;

/// Read of a device emulated in host user space: the magic register of the
/// first virtio-mmio transport.
#[derive(Default)]
pub struct MmioReadUser {
    regs: Option<Box<dyn Mmio>>,
}

impl ExitTest for MmioReadUser {
    fn name(&self) -> &'static str {
        "mmio_read_user"
    }

    fn init(&mut self, ctx: &Context) -> Result<(), Error> {
        let regs = ctx.map_compatible(VIRTIO_MMIO_COMPATIBLE, VIRTIO_MMIO_SIZE)?;
        if regs.read32(VIRTIO_MMIO_MAGIC_VALUE) != VIRTIO_MMIO_MAGIC {
            return Err(DeviceError("bad virtio-mmio magic").into());
        }
        self.regs = Some(regs);
        Ok(())
    }

    fn run(&self, ctx: &Context) -> u64 {
        match &self.regs {
            Some(regs) => timed(ctx, || {
                regs.read32(VIRTIO_MMIO_MAGIC_VALUE);
            }),
            None => 0,
        }
    }
}

/// Read of a register the hypervisor kernel emulates: the implementer id
/// of the virtual distributor.
#[derive(Default)]
pub struct MmioReadVgic {
    gic: Option<Arc<Gic>>,
}

impl ExitTest for MmioReadVgic {
    fn name(&self) -> &'static str {
        "mmio_read_vgic"
    }

    fn init(&mut self, ctx: &Context) -> Result<(), Error> {
        self.gic = Some(ctx.gic()?);
        Ok(())
    }

    fn run(&self, ctx: &Context) -> u64 {
        match &self.gic {
            Some(gic) => timed(ctx, || {
                gic.implementer();
            }),
            None => 0,
        }
    }
}

/// End of interrupt write of the spurious id.
#[derive(Default)]
pub struct Eoi {
    gic: Option<Arc<Gic>>,
}

impl ExitTest for Eoi {
    fn name(&self) -> &'static str {
        "eoi"
    }

    fn init(&mut self, ctx: &Context) -> Result<(), Error> {
        self.gic = Some(ctx.gic()?);
        Ok(())
    }

    fn run(&self, ctx: &Context) -> u64 {
        match &self.gic {
            Some(gic) => timed(ctx, || gic.end_of_spurious()),
            None => 0,
        }
    }
}
