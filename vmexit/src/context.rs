//! State shared by every test of a run.
use crate::{handshake::Handshake, Config};
use abyss::{
    cpu::{Cpu, CycleCounter},
    dev::{
        gic::Gic,
        iomap::IoMaps,
        mmio::{Mmio, MmioMapper},
        DeviceError,
    },
    interrupt::{ExceptionTable, ExceptionVectors},
    psci::PowerControl,
};
use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, Ordering};
use spin_lock::SpinLock;

/// The machine as seen by the harness.
pub struct Platform {
    pub cpu: Arc<dyn Cpu>,
    pub counter: Arc<dyn CycleCounter>,
    pub power: Arc<dyn PowerControl>,
    pub mapper: Arc<dyn MmioMapper>,
    pub iomaps: IoMaps,
    pub vectors: &'static ExceptionVectors,
    /// Address secondary cores start executing at.
    pub secondary_entry: usize,
}

/// Context of a run.
pub struct Context {
    platform: Platform,
    config: Config,
    counting: AtomicBool,
    handshake: Arc<Handshake>,
    gic: SpinLock<Option<Arc<Gic>>>,
}

impl Context {
    pub fn new(platform: Platform, config: Config) -> Self {
        Self {
            platform,
            config,
            counting: AtomicBool::new(true),
            handshake: Arc::new(Handshake::new()),
            gic: SpinLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn cpu(&self) -> &dyn Cpu {
        &*self.platform.cpu
    }

    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    /// Exception table of the executing core.
    pub fn vectors(&self) -> &ExceptionTable {
        self.platform.vectors.cpu(self.cpu().id())
    }

    /// Whether the cycle counter is trusted.
    pub fn counting(&self) -> bool {
        self.counting.load(Ordering::Relaxed)
    }

    pub(crate) fn disable_counting(&self) {
        self.counting.store(false, Ordering::Relaxed);
    }

    /// Read the cycle counter, or 0 when counting is disabled.
    #[inline]
    pub fn read_cycles(&self) -> u64 {
        if self.counting() {
            self.platform.counter.read()
        } else {
            0
        }
    }

    /// The interrupt controller, mapped on first use.
    pub fn gic(&self) -> Result<Arc<Gic>, DeviceError> {
        let mut gic = self.gic.lock();
        match gic.as_ref() {
            Some(gic) => Ok(gic.clone()),
            None => {
                let mapped = Arc::new(Gic::probe(&self.platform.iomaps, &*self.platform.mapper)?);
                *gic = Some(mapped.clone());
                Ok(mapped)
            }
        }
    }

    /// The interrupt controller, if some test already mapped it.
    pub fn mapped_gic(&self) -> Option<Arc<Gic>> {
        self.gic.lock().clone()
    }

    /// Map the first register block of the device compatible with `compat`.
    pub fn map_compatible(&self, compat: &str, size: usize) -> Result<Box<dyn Mmio>, DeviceError> {
        let map = self
            .platform
            .iomaps
            .find_compatible(compat)
            .ok_or(DeviceError("device not found in io-map"))?;
        let base = map
            .addrs
            .first()
            .ok_or(DeviceError("io-map entry without address"))?;
        self.platform.mapper.map(*base, size)
    }
}
