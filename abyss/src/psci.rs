//! Power State Coordination Interface.
//!
//! The guest asks the hypervisor to power cores on and off through PSCI
//! calls issued over a [`Conduit`] (`hvc` on arm).
use crate::PAGE_SIZE;
use core::alloc::Layout;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Errors reported by the PSCI implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciError {
    NotSupported,
    InvalidParameters,
    Denied,
    AlreadyOn,
    OnPending,
    InternalFailure,
    NotPresent,
    Disabled,
    InvalidAddress,
    /// The stack page of the secondary core could not be allocated.
    NoMemory,
    Unknown(i32),
}

impl PsciError {
    /// Decode a PSCI return value.
    pub fn from_ret(ret: i32) -> Result<(), PsciError> {
        match ret {
            0 => Ok(()),
            -1 => Err(Self::NotSupported),
            -2 => Err(Self::InvalidParameters),
            -3 => Err(Self::Denied),
            -4 => Err(Self::AlreadyOn),
            -5 => Err(Self::OnPending),
            -6 => Err(Self::InternalFailure),
            -7 => Err(Self::NotPresent),
            -8 => Err(Self::Disabled),
            -9 => Err(Self::InvalidAddress),
            code => Err(Self::Unknown(code)),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::NotSupported => "not supported",
            Self::InvalidParameters => "invalid parameters",
            Self::Denied => "denied",
            Self::AlreadyOn => "core already on",
            Self::OnPending => "core power-on pending",
            Self::InternalFailure => "internal failure",
            Self::NotPresent => "core not present",
            Self::Disabled => "core disabled",
            Self::InvalidAddress => "invalid entry address",
            Self::NoMemory => "cannot allocate smp stack page",
            Self::Unknown(_) => "unknown error",
        }
    }
}

impl core::fmt::Display for PsciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "psci: {} ({})", self.as_str(), code),
            _ => write!(f, "psci: {}", self.as_str()),
        }
    }
}

/// Function identifiers of a PSCI implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionIds {
    pub cpu_suspend: u32,
    pub cpu_off: u32,
    pub cpu_on: u32,
    pub migrate: u32,
    pub system_off: Option<u32>,
}

const KVM_PSCI_FN_BASE: u32 = 0x95c1_ba5e;

impl FunctionIds {
    /// The KVM range used before PSCI 0.2.
    pub const KVM: Self = Self {
        cpu_suspend: KVM_PSCI_FN_BASE,
        cpu_off: KVM_PSCI_FN_BASE + 1,
        cpu_on: KVM_PSCI_FN_BASE + 2,
        migrate: KVM_PSCI_FN_BASE + 3,
        system_off: None,
    };

    /// PSCI 0.2, 32-bit calling convention.
    pub const V0_2: Self = Self {
        cpu_suspend: 0x8400_0001,
        cpu_off: 0x8400_0002,
        cpu_on: 0x8400_0003,
        migrate: 0x8400_0005,
        system_off: Some(0x8400_0008),
    };
}

/// Argument of `CPU_OFF` and `CPU_SUSPEND`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerState {
    pub id: u16,
    pub ty: u8,
    pub affinity_level: u8,
}

impl PowerState {
    pub fn pack(&self) -> u32 {
        (self.id as u32 & 0xffff)
            | ((self.ty as u32 & 0x1) << 16)
            | ((self.affinity_level as u32 & 0x3) << 24)
    }
}

/// Mechanism used to reach the PSCI implementation.
pub trait Conduit: Send + Sync {
    /// Issue `function` with three arguments and return the raw result.
    fn call(&self, function: u32, arg0: u32, arg1: u32, arg2: u32) -> i32;
}

/// Bringing secondary cores up.
pub trait PowerControl: Send + Sync {
    /// Start core `cpu` at `entry` on a stack of its own.
    fn cpu_on(&self, cpu: usize, entry: usize) -> Result<(), PsciError>;
}

/// Where a starting core finds its stack and its rust entry point.
///
/// Only one core can be brought up at a time. The boot stub reads the
/// stack at offset 0 and the entry one word later.
#[repr(C)]
pub struct SecondaryBoot {
    pub stack: AtomicUsize,
    pub entry: AtomicUsize,
}

impl SecondaryBoot {
    pub const fn new() -> Self {
        Self {
            stack: AtomicUsize::new(0),
            entry: AtomicUsize::new(0),
        }
    }
}

impl Default for SecondaryBoot {
    fn default() -> Self {
        Self::new()
    }
}

/// A PSCI client.
pub struct Psci<C: Conduit> {
    conduit: C,
    ids: FunctionIds,
    boot: &'static SecondaryBoot,
    trampoline: usize,
}

impl<C: Conduit> Psci<C> {
    /// `trampoline` is the assembly stub that loads the stack recorded in
    /// `boot` and jumps to the recorded entry.
    pub fn new(
        conduit: C,
        ids: FunctionIds,
        boot: &'static SecondaryBoot,
        trampoline: usize,
    ) -> Self {
        Self {
            conduit,
            ids,
            boot,
            trampoline,
        }
    }

    pub fn cpu_off(&self, state: PowerState) -> Result<(), PsciError> {
        PsciError::from_ret(self.conduit.call(self.ids.cpu_off, state.pack(), 0, 0))
    }

    /// Power the whole machine off. Only returns on failure.
    pub fn system_off(&self) -> PsciError {
        match self.ids.system_off {
            Some(function) => match PsciError::from_ret(self.conduit.call(function, 0, 0, 0)) {
                Err(e) => e,
                Ok(()) => PsciError::InternalFailure,
            },
            None => PsciError::NotSupported,
        }
    }
}

impl<C: Conduit> PowerControl for Psci<C> {
    fn cpu_on(&self, cpu: usize, entry: usize) -> Result<(), PsciError> {
        let layout =
            Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).map_err(|_| PsciError::NoMemory)?;
        let page = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if page.is_null() {
            return Err(PsciError::NoMemory);
        }
        self.boot
            .stack
            .store(page as usize + PAGE_SIZE - core::mem::size_of::<usize>(), Ordering::Release);
        self.boot.entry.store(entry, Ordering::Release);
        PsciError::from_ret(self.conduit.call(
            self.ids.cpu_on,
            cpu as u32,
            self.trampoline as u32,
            0,
        ))
    }
}
