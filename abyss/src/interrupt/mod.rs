//! Exception vectors.
//!
//! Each core owns a table mapping the eight exception vectors to an
//! optional handler. The trap entry of the core calls
//! [`ExceptionVectors::handle`] with the register frame it saved; a vector
//! without a handler is fatal.
use crate::{cpu::Cpu, MAX_CPU};
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin_lock::SpinLock;

/// Exit code of a guest killed by an unhandled exception.
pub const EXIT_EINTR: i32 = 4;

/// Exception vector enumeration of the arm processor.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ExceptionVector {
    /// Reset.
    Reset = 0,
    /// Undefined instruction.
    Undefined = 1,
    /// Supervisor call (`svc`).
    SupervisorCall = 2,
    /// Prefetch abort.
    PrefetchAbort = 3,
    /// Data abort.
    DataAbort = 4,
    /// Address exception.
    AddressException = 5,
    /// Interrupt request.
    Irq = 6,
    /// Fast interrupt request.
    Fiq = 7,
}

impl ExceptionVector {
    /// Number of vectors.
    pub const COUNT: usize = 8;

    /// Short name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "rst",
            Self::Undefined => "und",
            Self::SupervisorCall => "svc",
            Self::PrefetchAbort => "pabt",
            Self::DataAbort => "dabt",
            Self::AddressException => "addrexcptn",
            Self::Irq => "irq",
            Self::Fiq => "fiq",
        }
    }
}

bitflags! {
    /// Program status register.
    pub struct Psr: u32 {
        const N = 1 << 31;
        const Z = 1 << 30;
        const C = 1 << 29;
        const V = 1 << 28;
        /// IRQs masked.
        const I = 1 << 7;
        /// FIQs masked.
        const F = 1 << 6;
        /// Thumb state.
        const T = 1 << 5;
    }
}

const MODE_MASK: u32 = 0x1f;

static PROCESSOR_MODES: [&str; 32] = [
    "USER_26", "FIQ_26", "IRQ_26", "SVC_26", "UK4_26", "UK5_26", "UK6_26", "UK7_26", "UK8_26",
    "UK9_26", "UK10_26", "UK11_26", "UK12_26", "UK13_26", "UK14_26", "UK15_26", "USER_32",
    "FIQ_32", "IRQ_32", "SVC_32", "UK4_32", "UK5_32", "UK6_32", "ABT_32", "UK8_32", "UK9_32",
    "UK10_32", "UND_32", "UK12_32", "UK13_32", "UK14_32", "SYS_32",
];

/// Register frame saved by the trap entry.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PtRegs {
    /// `r0`-`r12`, `sp`, `lr`, `pc`, `cpsr`, `orig_r0`.
    pub uregs: [u32; 18],
}

impl PtRegs {
    #[inline]
    pub fn r(&self, n: usize) -> u32 {
        self.uregs[n]
    }
    #[inline]
    pub fn fp(&self) -> u32 {
        self.uregs[11]
    }
    #[inline]
    pub fn ip(&self) -> u32 {
        self.uregs[12]
    }
    #[inline]
    pub fn sp(&self) -> u32 {
        self.uregs[13]
    }
    #[inline]
    pub fn lr(&self) -> u32 {
        self.uregs[14]
    }
    #[inline]
    pub fn pc(&self) -> u32 {
        self.uregs[15]
    }
    #[inline]
    pub fn set_pc(&mut self, pc: u32) {
        self.uregs[15] = pc;
    }
    #[inline]
    pub fn cpsr(&self) -> Psr {
        Psr::from_bits_truncate(self.uregs[16])
    }

    /// Name of the processor mode the exception was taken from.
    pub fn mode(&self) -> &'static str {
        PROCESSOR_MODES[(self.uregs[16] & MODE_MASK) as usize]
    }

    /// Whether the exception was taken from user mode.
    pub fn user_mode(&self) -> bool {
        self.uregs[16] & 0xf == 0
    }
}

impl fmt::Debug for PtRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let psr = self.cpsr();
        let flag = |bit, on, off| if psr.contains(bit) { on } else { off };
        writeln!(
            f,
            "pc : [<{:08x}>]    lr : [<{:08x}>]    psr: {:08x}\n\
             sp : {:08x}  ip : {:08x}  fp : {:08x}\n\
             r10: {:08x}  r9 : {:08x}  r8 : {:08x}\n\
             r7 : {:08x}  r6 : {:08x}  r5 : {:08x}  r4 : {:08x}\n\
             r3 : {:08x}  r2 : {:08x}  r1 : {:08x}  r0 : {:08x}",
            self.pc(),
            self.lr(),
            self.uregs[16],
            self.sp(),
            self.ip(),
            self.fp(),
            self.r(10),
            self.r(9),
            self.r(8),
            self.r(7),
            self.r(6),
            self.r(5),
            self.r(4),
            self.r(3),
            self.r(2),
            self.r(1),
            self.r(0),
        )?;
        write!(
            f,
            "Flags: {}{}{}{}  IRQs o{}  FIQs o{}  Mode {}",
            flag(Psr::N, 'N', 'n'),
            flag(Psr::Z, 'Z', 'z'),
            flag(Psr::C, 'C', 'c'),
            flag(Psr::V, 'V', 'v'),
            if psr.contains(Psr::I) { "ff" } else { "n" },
            if psr.contains(Psr::F) { "ff" } else { "n" },
            self.mode(),
        )
    }
}

/// Faulting address and status of an abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultInfo {
    pub address: u32,
    pub status: u32,
}

/// System control, translation table base and domain access control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRegisters {
    pub control: u32,
    pub table: u32,
    pub dac: u32,
}

/// Access to the registers an exception report prints.
pub trait FaultRegisters {
    /// DFAR and DFSR.
    fn data_abort(&self) -> FaultInfo;
    /// IFAR and IFSR.
    fn prefetch_abort(&self) -> FaultInfo;
    /// SCTLR, TTBR0 and DACR.
    fn control(&self) -> ControlRegisters;
}

/// An exception nobody was prepared to take.
#[derive(Clone, Copy)]
pub struct UnhandledException {
    pub vector: u8,
    pub regs: PtRegs,
    pub fault: Option<FaultInfo>,
    /// Only read for exceptions taken from a privileged mode.
    pub control: Option<ControlRegisters>,
}

impl fmt::Display for UnhandledException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match ExceptionVector::try_from(self.vector) {
            Ok(v) => writeln!(f, "Unhandled exception {} ({})", self.vector, v.name())?,
            Err(_) => writeln!(f, "do_handle_exception called with vector={}", self.vector)?,
        }
        writeln!(f, "Exception frame registers:")?;
        writeln!(f, "{:?}", self.regs)?;
        if let Some(c) = self.control {
            writeln!(
                f,
                "Control: {:08x}  Table: {:08x}  DAC: {:08x}",
                c.control, c.table, c.dac
            )?;
        }
        match (ExceptionVector::try_from(self.vector), self.fault) {
            (Ok(ExceptionVector::DataAbort), Some(fault)) => writeln!(
                f,
                "DFAR: {:08x}    DFSR: {:08x}",
                fault.address, fault.status
            ),
            (Ok(ExceptionVector::PrefetchAbort), Some(fault)) => writeln!(
                f,
                "IFAR: {:08x}    IFSR: {:08x}",
                fault.address, fault.status
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for UnhandledException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Exception handler.
pub type Handler = Arc<dyn Fn(&mut PtRegs) + Send + Sync>;

const NO_HANDLER: SpinLock<Option<Handler>> = SpinLock::new(None);

/// Handlers of a single core.
pub struct ExceptionTable {
    handlers: [SpinLock<Option<Handler>>; ExceptionVector::COUNT],
}

impl ExceptionTable {
    /// Table without any handler.
    pub const fn new() -> Self {
        Self {
            handlers: [NO_HANDLER; ExceptionVector::COUNT],
        }
    }

    /// Replace the handler of `vector`. `None` removes it.
    pub fn install(&self, vector: ExceptionVector, handler: Option<Handler>) {
        *self.handlers[u8::from(vector) as usize].lock() = handler;
    }

    /// Replace the handler of a raw vector index.
    ///
    /// Indices outside of [`ExceptionVector`] are ignored.
    pub fn install_raw(&self, vector: u8, handler: Option<Handler>) {
        if let Ok(vector) = ExceptionVector::try_from(vector) {
            self.install(vector, handler);
        }
    }

    /// Remove the handler of `vector`.
    pub fn uninstall(&self, vector: ExceptionVector) {
        self.install(vector, None)
    }

    /// Currently installed handler of `vector`.
    pub fn handler(&self, vector: ExceptionVector) -> Option<Handler> {
        self.handlers[u8::from(vector) as usize].lock().clone()
    }
}

impl Default for ExceptionTable {
    fn default() -> Self {
        Self::new()
    }
}

const EMPTY_TABLE: ExceptionTable = ExceptionTable::new();

/// Exception tables of every core.
pub struct ExceptionVectors {
    cores: [ExceptionTable; MAX_CPU],
}

impl ExceptionVectors {
    pub const fn new() -> Self {
        Self {
            cores: [EMPTY_TABLE; MAX_CPU],
        }
    }

    /// Table of core `cpu`.
    ///
    /// # Panics
    /// Panics if `cpu` is not below [`MAX_CPU`].
    pub fn cpu(&self, cpu: usize) -> &ExceptionTable {
        &self.cores[cpu]
    }

    /// Run the handler core `cpu` installed for `vector`.
    ///
    /// The handler runs without the table lock held, so it may install or
    /// remove handlers itself.
    pub fn dispatch(
        &self,
        cpu: usize,
        vector: u8,
        regs: &mut PtRegs,
        faults: &dyn FaultRegisters,
    ) -> Result<(), UnhandledException> {
        let handler = ExceptionVector::try_from(vector)
            .ok()
            .and_then(|v| self.cores.get(cpu).and_then(|t| t.handler(v)));
        if let Some(handler) = handler {
            handler(regs);
            return Ok(());
        }
        let fault = match ExceptionVector::try_from(vector) {
            Ok(ExceptionVector::DataAbort) => Some(faults.data_abort()),
            Ok(ExceptionVector::PrefetchAbort) => Some(faults.prefetch_abort()),
            _ => None,
        };
        Err(UnhandledException {
            vector,
            regs: *regs,
            fault,
            control: (!regs.user_mode()).then(|| faults.control()),
        })
    }

    /// Entry point of the trap path: dispatch, or report and halt the guest.
    pub fn handle(
        &self,
        cpu: &dyn Cpu,
        vector: u8,
        regs: &mut PtRegs,
        faults: &dyn FaultRegisters,
    ) {
        if let Err(e) = self.dispatch(cpu.id(), vector, regs, faults) {
            crate::print!("{}", e);
            cpu.halt(EXIT_EINTR);
        }
    }
}

impl Default for ExceptionVectors {
    fn default() -> Self {
        Self::new()
    }
}
