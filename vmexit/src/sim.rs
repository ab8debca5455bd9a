//! A simulated machine for the host tests.
//!
//! Cores are threads, the cycle counter is a shared clock that every
//! exit advances by a fixed cost, and the interrupt controller keeps a
//! queue of pending interrupts per core.
use crate::{Config, Context, Platform};
use abyss::{
    cpu::{Cpu, CycleCounter},
    dev::{
        iomap::{IoMap, IoMaps},
        mmio::{Mmio, MmioMapper},
        DeviceError,
    },
    interrupt::{
        ControlRegisters, ExceptionVector, ExceptionVectors, FaultInfo, FaultRegisters, PtRegs,
    },
    psci::{PowerControl, PsciError},
    MAX_CPU,
};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

pub const HVC_COST: u64 = 1000;
pub const USER_MMIO_COST: u64 = 5000;
pub const KERNEL_MMIO_COST: u64 = 2000;

pub const GICD_BASE: usize = 0x0800_0000;
pub const GICC_BASE: usize = 0x0801_0000;
pub const VIRTIO_BASE: usize = 0x0a00_0000;
const SECONDARY_ENTRY: usize = 0x4008_0000;

const GIC_IIDR: u32 = 0x0200_043b;
const SPURIOUS: u32 = 1023;

static DEVICES: [IoMap; 2] = [
    IoMap {
        ty: "gic",
        compats: &["arm,cortex-a15-gic"],
        addrs: &[GICD_BASE, GICC_BASE],
    },
    IoMap {
        ty: "virtio",
        compats: &["virtio,mmio"],
        addrs: &[VIRTIO_BASE],
    },
];

static NO_DEVICES: [IoMap; 0] = [];

thread_local! {
    static CORE: Cell<usize> = Cell::new(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// Advances by one on every read.
    Ticking,
    /// Always reads the same value.
    Frozen(u64),
    /// Raises an undefined-instruction exception and reads 0.
    Trapping,
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub cores: usize,
    pub counter: CounterMode,
    pub devices: bool,
    pub virtio_magic: u32,
    /// PSCI return value of `CPU_ON`.
    pub psci_ret: i32,
    pub config: Config,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cores: 2,
            counter: CounterMode::Ticking,
            devices: true,
            virtio_magic: crate::exits::VIRTIO_MMIO_MAGIC,
            psci_ret: 0,
            config: Config {
                goal: 1 << 12,
                strict_counter: true,
                handshake_timeout: 1 << 22,
            },
        }
    }
}

pub struct Machine {
    options: Options,
    clock: AtomicU64,
    vectors: ExceptionVectors,
    dist_enabled: AtomicBool,
    irq_enabled: AtomicU32,
    cpu_if_enabled: [AtomicBool; MAX_CPU],
    unmasked: [AtomicBool; MAX_CPU],
    held: [AtomicBool; MAX_CPU],
    pending: [Mutex<VecDeque<u32>>; MAX_CPU],
    doorbell: Condvar,
    powered: [AtomicBool; MAX_CPU],
    power_requests: AtomicUsize,
    exit: Mutex<Option<i32>>,
    context: Mutex<Weak<Context>>,
}

impl Machine {
    fn new(options: Options) -> Self {
        Self {
            options,
            clock: AtomicU64::new(0),
            vectors: ExceptionVectors::new(),
            dist_enabled: AtomicBool::new(false),
            irq_enabled: AtomicU32::new(0),
            cpu_if_enabled: std::array::from_fn(|_| AtomicBool::new(false)),
            unmasked: std::array::from_fn(|_| AtomicBool::new(false)),
            held: std::array::from_fn(|_| AtomicBool::new(false)),
            pending: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            doorbell: Condvar::new(),
            powered: std::array::from_fn(|i| AtomicBool::new(i == 0)),
            power_requests: AtomicUsize::new(0),
            exit: Mutex::new(None),
            context: Mutex::new(Weak::new()),
        }
    }

    /// Build a machine and a context driving it from the calling thread,
    /// which becomes core 0.
    pub fn boot(options: Options) -> (Arc<Context>, &'static Machine) {
        let machine: &'static Machine = Box::leak(Box::new(Machine::new(options)));
        let sim = Arc::new(Sim(machine));
        let platform = Platform {
            cpu: sim.clone(),
            counter: sim.clone(),
            power: sim.clone(),
            mapper: sim,
            iomaps: if options.devices {
                IoMaps::new(&DEVICES)
            } else {
                IoMaps::new(&NO_DEVICES)
            },
            vectors: &machine.vectors,
            secondary_entry: SECONDARY_ENTRY,
        };
        let ctx = Arc::new(Context::new(platform, options.config));
        *machine.context.lock().unwrap() = Arc::downgrade(&ctx);
        CORE.with(|c| c.set(0));
        (ctx, machine)
    }

    /// Run `f` on the calling thread as if it executed on `core`.
    pub fn run_as<R>(core: usize, f: impl FnOnce() -> R) -> R {
        let prev = CORE.with(|c| c.replace(core));
        let r = f();
        CORE.with(|c| c.set(prev));
        r
    }

    fn current() -> usize {
        CORE.with(|c| c.get())
    }

    fn tick(&self, cycles: u64) -> u64 {
        self.clock.fetch_add(cycles, Ordering::SeqCst) + cycles
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.lock().unwrap()
    }

    pub fn powered(&self, core: usize) -> bool {
        self.powered[core].load(Ordering::SeqCst)
    }

    pub fn power_requests(&self) -> usize {
        self.power_requests.load(Ordering::SeqCst)
    }

    /// Stop `core` from taking interrupts while it idles.
    pub fn hold_irqs(&self, core: usize) {
        self.held[core].store(true, Ordering::SeqCst);
    }

    /// Take the next pending interrupt of the executing core, whatever
    /// its masking. Returns false when nothing is pending.
    pub fn take_irq(&self) -> bool {
        let core = Self::current();
        if self.pending[core].lock().unwrap().is_empty() {
            return false;
        }
        let mut regs = PtRegs::default();
        self.vectors
            .handle(&Sim(self), ExceptionVector::Irq.into(), &mut regs, &Sim(self));
        true
    }

    /// Take exception `vector` on the executing core from SVC mode.
    pub fn raise(&self, vector: u8) -> PtRegs {
        let mut regs = PtRegs::default();
        regs.uregs[16] = 0x13;
        self.vectors.handle(&Sim(self), vector, &mut regs, &Sim(self));
        regs
    }

    fn idle(&self) {
        let core = Self::current();
        let deliverable = !self.held[core].load(Ordering::SeqCst)
            && self.unmasked[core].load(Ordering::SeqCst)
            && self.cpu_if_enabled[core].load(Ordering::SeqCst);
        if deliverable && self.take_irq() {
            return;
        }
        let pending = self.pending[core].lock().unwrap();
        if pending.is_empty() || !deliverable {
            let _ = self
                .doorbell
                .wait_timeout(pending, Duration::from_millis(1))
                .unwrap();
        }
    }

    fn send_sgi(&self, value: u32) {
        let irq = value & 0xf;
        let targets = (value >> 16) & 0xff;
        if !self.dist_enabled.load(Ordering::SeqCst)
            || self.irq_enabled.load(Ordering::SeqCst) & (1 << irq) == 0
        {
            return;
        }
        let source = Self::current() as u32;
        for core in (0..MAX_CPU).filter(|c| targets & (1 << c) != 0) {
            self.pending[core]
                .lock()
                .unwrap()
                .push_back((source << 10) | irq);
        }
        self.doorbell.notify_all();
    }
}

#[derive(Clone, Copy)]
struct Sim<'a>(&'a Machine);

impl Cpu for Sim<'_> {
    fn id(&self) -> usize {
        Machine::current()
    }

    fn count(&self) -> usize {
        self.0.options.cores
    }

    fn hypercall(&self) {
        self.0.tick(HVC_COST);
    }

    fn enable_irq(&self) {
        self.0.unmasked[Machine::current()].store(true, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        self.0.idle();
    }

    fn halt(&self, code: i32) -> ! {
        *self.0.exit.lock().unwrap() = Some(code);
        panic!("guest halted with status {}", code);
    }
}

impl CycleCounter for Sim<'_> {
    fn read(&self) -> u64 {
        match self.0.options.counter {
            CounterMode::Ticking => self.0.tick(1),
            CounterMode::Frozen(value) => value,
            CounterMode::Trapping => {
                let mut regs = PtRegs::default();
                self.0
                    .vectors
                    .handle(self, ExceptionVector::Undefined.into(), &mut regs, self);
                0
            }
        }
    }
}

impl FaultRegisters for Sim<'_> {
    fn data_abort(&self) -> FaultInfo {
        FaultInfo {
            address: 0,
            status: 0,
        }
    }

    fn prefetch_abort(&self) -> FaultInfo {
        FaultInfo {
            address: 0,
            status: 0,
        }
    }

    fn control(&self) -> ControlRegisters {
        ControlRegisters {
            control: 0,
            table: 0,
            dac: 0,
        }
    }
}

impl PowerControl for Sim<'static> {
    fn cpu_on(&self, cpu: usize, _entry: usize) -> Result<(), PsciError> {
        let machine = self.0;
        machine.power_requests.fetch_add(1, Ordering::SeqCst);
        PsciError::from_ret(machine.options.psci_ret)?;
        if cpu >= machine.options.cores {
            return Err(PsciError::NotPresent);
        }
        if machine.powered[cpu].swap(true, Ordering::SeqCst) {
            return Err(PsciError::AlreadyOn);
        }
        let ctx = machine
            .context
            .lock()
            .unwrap()
            .upgrade()
            .ok_or(PsciError::InternalFailure)?;
        std::thread::spawn(move || {
            CORE.with(|c| c.set(cpu));
            crate::secondary_main(&ctx)
        });
        Ok(())
    }
}

impl MmioMapper for Sim<'static> {
    fn map(&self, base: usize, _size: usize) -> Result<Box<dyn Mmio>, DeviceError> {
        match base {
            GICD_BASE => Ok(Box::new(Distributor(self.0))),
            GICC_BASE => Ok(Box::new(CpuInterface(self.0))),
            VIRTIO_BASE => Ok(Box::new(Virtio(self.0))),
            _ => Err(DeviceError("nothing to map")),
        }
    }
}

struct Distributor(&'static Machine);

impl Mmio for Distributor {
    fn read32(&self, offset: usize) -> u32 {
        self.0.tick(KERNEL_MMIO_COST);
        match offset {
            0x000 => self.0.dist_enabled.load(Ordering::SeqCst) as u32,
            0x008 => GIC_IIDR,
            0x100 => self.0.irq_enabled.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        self.0.tick(KERNEL_MMIO_COST);
        match offset {
            0x000 => self.0.dist_enabled.store(value & 1 != 0, Ordering::SeqCst),
            0x100 => {
                self.0.irq_enabled.fetch_or(value, Ordering::SeqCst);
            }
            0xf00 => self.0.send_sgi(value),
            _ => (),
        }
    }
}

struct CpuInterface(&'static Machine);

impl Mmio for CpuInterface {
    fn read32(&self, offset: usize) -> u32 {
        self.0.tick(KERNEL_MMIO_COST);
        match offset {
            0x00c => self.0.pending[Machine::current()]
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SPURIOUS),
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        self.0.tick(KERNEL_MMIO_COST);
        if offset == 0x000 {
            self.0.cpu_if_enabled[Machine::current()].store(value & 1 != 0, Ordering::SeqCst);
        }
    }
}

struct Virtio(&'static Machine);

impl Mmio for Virtio {
    fn read32(&self, offset: usize) -> u32 {
        self.0.tick(USER_MMIO_COST);
        match offset {
            0x000 => self.0.options.virtio_magic,
            _ => 0,
        }
    }

    fn write32(&self, _offset: usize, _value: u32) {
        self.0.tick(USER_MMIO_COST);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyss::interrupt::EXIT_EINTR;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn unhandled_exception_halts() {
        for vector in [u8::from(ExceptionVector::DataAbort), 9] {
            let (_ctx, machine) = Machine::boot(Options::default());
            let raised = catch_unwind(AssertUnwindSafe(|| machine.raise(vector)));
            assert!(raised.is_err());
            assert_eq!(machine.exit_code(), Some(EXIT_EINTR));
        }
    }

    #[test]
    fn handled_exception_returns() {
        let (ctx, machine) = Machine::boot(Options::default());
        ctx.vectors().install(
            ExceptionVector::SupervisorCall,
            Some(Arc::new(|regs: &mut PtRegs| regs.set_pc(0x40))),
        );
        assert_eq!(machine.raise(ExceptionVector::SupervisorCall.into()).pc(), 0x40);
        // Tables are per core.
        let raised = catch_unwind(AssertUnwindSafe(|| {
            Machine::run_as(1, || machine.raise(ExceptionVector::SupervisorCall.into()))
        }));
        assert!(raised.is_err());
        assert_eq!(machine.exit_code(), Some(EXIT_EINTR));
    }
}
