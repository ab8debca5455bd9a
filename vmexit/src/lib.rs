//! vmexit: what a guest pays for leaving to the hypervisor.
//!
//! Every test measures one kind of exit (a hypercall, an mmio access
//! handled in user space or in the kernel, an end-of-interrupt write, an
//! inter-processor interrupt round trip) and the harness prints its mean
//! cost in cycles:
//!
//! ```text
//! hvc	1001
//! noop_guest	1
//! ```
//!
//! A run goes through the following steps:
//! 1. The cycle counter is probed ([`counter`]); a counter that traps or
//!    does not move fails the run.
//! 2. The command line selects tests from the [`registry`]; `--oneshot`
//!    asks for a single raw sample per test.
//! 3. Each selected test that is valid on this machine is initialized
//!    once and measured by the adaptive [`sampler`].
//!
//! Tests involving the second core use the [`handshake`] to bring it up
//! and talk to it, and the GIC to interrupt it ([`ipi`]).
//!
//! Nothing here issues instructions directly: the machine is reached
//! through the capability traits of [`abyss`], collected in a
//! [`Platform`] and owned by the [`Context`] every test receives.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod context;
pub mod counter;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod entry;
pub mod exits;
pub mod handshake;
pub mod ipi;
pub mod registry;
pub mod runner;
pub mod sampler;

#[cfg(test)]
mod sim;

use abyss::{dev::DeviceError, psci::PsciError};
use alloc::string::String;
use core::fmt;

pub use context::{Context, Platform};
pub use handshake::HandshakeError;
pub use ipi::secondary_main;
pub use registry::{ExitTest, Registry};
pub use runner::run;

/// Number of cycles a measurement has to accumulate.
#[cfg(not(feature = "long-goal"))]
pub const GOAL: u64 = 1 << 28;
/// Number of cycles a measurement has to accumulate.
#[cfg(feature = "long-goal")]
pub const GOAL: u64 = 1 << 30;

/// Harness configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Cycles the adaptive sampler accumulates before reporting.
    pub goal: u64,
    /// Fail the run when the cycle counter is unusable. When unset, the
    /// run goes on with counting disabled and the reported values carry
    /// no timing information.
    pub strict_counter: bool,
    /// Polls of a cross-core flag before giving up on the other core.
    pub handshake_timeout: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            goal: GOAL,
            strict_counter: true,
            handshake_timeout: 1 << 24,
        }
    }
}

/// Exit status of the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Pass = 0,
    Fail = 1,
}

/// Errors of the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A requested test does not exist.
    UnknownTest(String),
    /// The cycle counter trapped or did not move between two reads.
    CounterUnusable { first: u64, second: u64 },
    /// A device the test needs is missing or unusable.
    Device(DeviceError),
    /// The secondary core could not be powered on.
    Power(PsciError),
    /// The other core did not answer.
    Handshake(HandshakeError),
    /// A whole sampling round produced only invalid samples.
    NoValidSamples,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTest(name) => write!(f, "unknown test: {}", name),
            Self::CounterUnusable { first, second } => write!(
                f,
                "Cannot read functional cycle counter ({}, {})",
                first, second
            ),
            Self::Device(e) => write!(f, "device: {}", e),
            Self::Power(e) => write!(f, "starting second CPU failed: {}", e),
            Self::Handshake(e) => write!(f, "{}", e),
            Self::NoValidSamples => write!(f, "no valid cycle sample"),
        }
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<PsciError> for Error {
    fn from(e: PsciError) -> Self {
        Self::Power(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}
