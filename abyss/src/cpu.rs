//! Processor capabilities.
//!
//! Tests never issue instructions directly; they go through these traits,
//! which the [`arm`](crate::arm) module implements with inline assembly and
//! the host tests implement with a simulated machine.

/// Operations on the processor that is currently executing.
pub trait Cpu: Send + Sync {
    /// Index of the executing core.
    fn id(&self) -> usize;

    /// Number of cores present in the machine.
    fn count(&self) -> usize;

    /// Trap into the hypervisor with an empty hypercall (`hvc #0`).
    fn hypercall(&self);

    /// Unmask IRQs on the executing core.
    fn enable_irq(&self);

    /// Idle until the next interrupt has been taken.
    fn wait_for_interrupt(&self);

    /// Full-system data synchronization barrier.
    fn barrier(&self) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Terminate the guest with `code`.
    fn halt(&self, code: i32) -> !;
}

/// A monotonic hardware cycle register.
pub trait CycleCounter: Send + Sync {
    /// Read the current cycle count.
    ///
    /// On hardware without an accessible counter this traps into the
    /// undefined-instruction vector.
    fn read(&self) -> u64;
}

/// Cycles elapsed between two counter reads.
///
/// Returns 0, the invalid sample, unless `end` is strictly after `start`;
/// a wrapped or frozen counter therefore never yields a bogus magnitude.
#[inline]
pub fn elapsed(start: u64, end: u64) -> u64 {
    if end > start {
        end - start
    } else {
        0
    }
}
