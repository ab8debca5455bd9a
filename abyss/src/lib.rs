//! The abyss of the guest that operates hardwares.
//!
//! This crate contains the collection of hardware communications a vmexit
//! test needs: the register capability, the cycle counter, the exception
//! vectors, the GICv2 interrupt controller, the PSCI power-control calls,
//! the io-map of devices and the console.
//!
//! Instruction-level code only exists for the bare-metal arm target (see
//! [`arm`]); everything else is written against the capability traits in
//! [`cpu`] and [`dev::mmio`] so it can be driven by a simulated machine.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod kprint;
pub mod cpu;
pub mod dev;
pub mod interrupt;
pub mod psci;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod arm;

/// Maximum number of CPU this guest can support.
#[cfg(feature = "smp")]
pub const MAX_CPU: usize = 8;
/// Maximum number of CPU this guest can support.
#[cfg(not(feature = "smp"))]
pub const MAX_CPU: usize = 2;

/// Size of a page, and of each per-core stack.
pub const PAGE_SIZE: usize = 0x1000;
