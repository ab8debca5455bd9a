//! Spinlock shared by the guest runtime and the vmexit harness.
#![cfg_attr(not(test), no_std)]

pub mod smplock;
pub use smplock::*;
