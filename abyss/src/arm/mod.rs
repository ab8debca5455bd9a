//! Bare-metal arm implementation of the processor capabilities.
//!
//! Everything that executes a privileged or trapping instruction lives
//! here. The vector stubs in `entry.s` save a [`PtRegs`](crate::interrupt::PtRegs)
//! frame and dispatch it through [`VECTORS`].
use crate::{
    cpu::{Cpu, CycleCounter},
    interrupt::{ControlRegisters, ExceptionVectors, FaultInfo, FaultRegisters},
    psci::{Conduit, FunctionIds, Psci, SecondaryBoot},
};
use core::arch::asm;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Exception tables of every core.
pub static VECTORS: ExceptionVectors = ExceptionVectors::new();

/// Stack and entry handed to the next core that comes up. Read by
/// `secondary_trampoline`.
#[no_mangle]
pub static SECONDARY_BOOT: SecondaryBoot = SecondaryBoot::new();

static NR_CPUS: AtomicUsize = AtomicUsize::new(1);

mod entry;

pub use entry::install_vectors;

/// Record the number of cores found at boot.
pub fn set_cpu_count(count: usize) {
    NR_CPUS.store(count.max(1), Ordering::Relaxed);
}

/// Read the multiprocessor affinity register.
#[inline]
pub fn mpidr() -> u32 {
    let r: u32;
    unsafe { asm!("mrc p15, 0, {}, c0, c0, 5", out(reg) r, options(nomem, nostack)) };
    r
}

/// The executing arm core.
#[derive(Clone, Copy, Default)]
pub struct ArmCpu;

impl Cpu for ArmCpu {
    fn id(&self) -> usize {
        (mpidr() & 0xff) as usize
    }

    fn count(&self) -> usize {
        NR_CPUS.load(Ordering::Relaxed)
    }

    fn hypercall(&self) {
        unsafe {
            asm!(".arch_extension virt", "hvc #0", out("r0") _, options(nostack));
        }
    }

    fn enable_irq(&self) {
        unsafe { asm!("cpsie i", options(nomem, nostack)) };
    }

    fn wait_for_interrupt(&self) {
        unsafe { asm!("dsb", "wfi", options(nostack)) };
    }

    fn barrier(&self) {
        unsafe { asm!("dsb sy", "isb", options(nostack)) };
    }

    fn halt(&self, code: i32) -> ! {
        crate::println!("EXIT: STATUS={}", code);
        let psci = Psci::new(HvcConduit, FunctionIds::V0_2, &SECONDARY_BOOT, 0);
        let e = psci.system_off();
        crate::warning!("system off failed: {}", e);
        loop {
            unsafe { asm!("wfi", options(nomem, nostack)) };
        }
    }
}

/// The performance monitor cycle count register (PMCCNTR).
#[derive(Clone, Copy, Default)]
pub struct Pmccntr;

impl CycleCounter for Pmccntr {
    #[inline]
    fn read(&self) -> u64 {
        let cc: u32;
        unsafe { asm!("isb", "mrc p15, 0, {}, c9, c13, 0", out(reg) cc, options(nostack)) };
        cc as u64
    }
}

/// PSCI calls through `hvc`.
#[derive(Clone, Copy, Default)]
pub struct HvcConduit;

impl Conduit for HvcConduit {
    fn call(&self, function: u32, arg0: u32, arg1: u32, arg2: u32) -> i32 {
        let mut r0 = function;
        unsafe {
            asm!(
                ".arch_extension virt",
                "hvc #0",
                inout("r0") r0,
                in("r1") arg0,
                in("r2") arg1,
                in("r3") arg2,
                options(nostack),
            );
        }
        r0 as i32
    }
}

/// PSCI client that starts secondaries through [`SECONDARY_BOOT`].
pub fn psci(ids: FunctionIds) -> Psci<HvcConduit> {
    Psci::new(
        HvcConduit,
        ids,
        &SECONDARY_BOOT,
        entry::secondary_trampoline as usize,
    )
}

/// Fault and system control registers of the executing core.
#[derive(Clone, Copy, Default)]
pub struct CpuFaults;

impl FaultRegisters for CpuFaults {
    fn data_abort(&self) -> FaultInfo {
        let (address, status): (u32, u32);
        unsafe {
            asm!(
                "mrc p15, 0, {}, c6, c0, 0",
                "mrc p15, 0, {}, c5, c0, 0",
                out(reg) address,
                out(reg) status,
                options(nomem, nostack),
            );
        }
        FaultInfo { address, status }
    }

    fn prefetch_abort(&self) -> FaultInfo {
        let (address, status): (u32, u32);
        unsafe {
            asm!(
                "mrc p15, 0, {}, c6, c0, 2",
                "mrc p15, 0, {}, c5, c0, 1",
                out(reg) address,
                out(reg) status,
                options(nomem, nostack),
            );
        }
        FaultInfo { address, status }
    }

    fn control(&self) -> ControlRegisters {
        let (control, table, dac): (u32, u32, u32);
        unsafe {
            asm!(
                "mrc p15, 0, {}, c1, c0, 0",
                "mrc p15, 0, {}, c2, c0, 0",
                "mrc p15, 0, {}, c3, c0, 0",
                out(reg) control,
                out(reg) table,
                out(reg) dac,
                options(nomem, nostack),
            );
        }
        ControlRegisters {
            control,
            table,
            dac,
        }
    }
}
