//! Flags the two cores use to talk to each other.
//!
//! Each flag is written by one side with release ordering and consumed by
//! the other with acquire ordering, so whatever the writer did before
//! raising a flag is visible to the core that observed it. Waits poll a
//! bounded number of times and report a [`HandshakeError`] instead of
//! hanging the run.
use abyss::psci::PowerControl;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crossbeam_utils::{Backoff, CachePadded};

/// The other core did not answer in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// The secondary never reported itself up.
    SecondaryTimeout,
    /// The primary never acknowledged the secondary.
    AckTimeout,
    /// The receiver never became ready for the next interrupt.
    ReadyTimeout,
    /// The receiver never reported the interrupt.
    ReceiveTimeout,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SecondaryTimeout => "second CPU did not come up",
            Self::AckTimeout => "primary CPU did not acknowledge",
            Self::ReadyTimeout => "receiver not ready",
            Self::ReceiveTimeout => "interrupt not received",
        })
    }
}

/// Cross-core state of the interrupt tests.
pub struct Handshake {
    secondary_up: CachePadded<AtomicBool>,
    primary_ack: CachePadded<AtomicBool>,
    irq_received: CachePadded<AtomicBool>,
    irq_ready: CachePadded<AtomicBool>,
    last_eoi: CachePadded<AtomicU64>,
}

fn wait_for(flag: &AtomicBool, timeout: usize) -> bool {
    let backoff = Backoff::new();
    for _ in 0..timeout {
        if flag.load(Ordering::Acquire) {
            return true;
        }
        backoff.spin();
    }
    flag.load(Ordering::Acquire)
}

impl Handshake {
    pub const fn new() -> Self {
        Self {
            secondary_up: CachePadded::new(AtomicBool::new(false)),
            primary_ack: CachePadded::new(AtomicBool::new(false)),
            irq_received: CachePadded::new(AtomicBool::new(false)),
            irq_ready: CachePadded::new(AtomicBool::new(false)),
            last_eoi: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn is_secondary_up(&self) -> bool {
        self.secondary_up.load(Ordering::Acquire)
    }

    /// Whether a bring-up completed: the secondary came up and the primary
    /// acknowledged it in time.
    pub fn is_acknowledged(&self) -> bool {
        self.primary_ack.load(Ordering::Acquire)
    }

    /// Power core `cpu` on at `entry`, wait for it to come up and
    /// acknowledge it.
    pub fn start_secondary(
        &self,
        power: &dyn PowerControl,
        cpu: usize,
        entry: usize,
        timeout: usize,
    ) -> Result<(), crate::Error> {
        self.primary_ack.store(false, Ordering::Relaxed);
        power.cpu_on(cpu, entry)?;
        if !wait_for(&self.secondary_up, timeout) {
            return Err(HandshakeError::SecondaryTimeout.into());
        }
        self.primary_ack.store(true, Ordering::Release);
        Ok(())
    }

    /// Secondary side of [`Handshake::start_secondary`].
    ///
    /// `init` runs before the primary can observe the secondary as up.
    pub fn secondary_ready(
        &self,
        init: impl FnOnce(),
        timeout: usize,
    ) -> Result<(), HandshakeError> {
        init();
        self.secondary_up.store(true, Ordering::Release);
        if wait_for(&self.primary_ack, timeout) {
            Ok(())
        } else {
            Err(HandshakeError::AckTimeout)
        }
    }

    /// Receiver: done with the interrupt, `eoi` cycles spent completing it.
    pub fn mark_received(&self, eoi: u64) {
        self.last_eoi.store(eoi, Ordering::Relaxed);
        self.irq_received.store(true, Ordering::Release);
    }

    /// Receiver: the next interrupt may be sent.
    pub fn mark_ready(&self) {
        self.irq_ready.store(true, Ordering::Release);
    }

    /// Sender: wait until the receiver is ready and take the ready flag.
    ///
    /// A stale received flag from an interrupt that arrived after its
    /// sender gave up is dropped as well.
    pub fn claim_ready(&self, timeout: usize) -> Result<(), HandshakeError> {
        if !wait_for(&self.irq_ready, timeout) {
            return Err(HandshakeError::ReadyTimeout);
        }
        self.irq_ready.store(false, Ordering::Relaxed);
        self.irq_received.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Sender: wait for the receiver to take the interrupt and consume the
    /// received flag. Returns the cycles the receiver spent completing it.
    pub fn wait_received(&self, timeout: usize) -> Result<u64, HandshakeError> {
        if !wait_for(&self.irq_received, timeout) {
            return Err(HandshakeError::ReceiveTimeout);
        }
        self.irq_received.store(false, Ordering::Relaxed);
        Ok(self.last_eoi.load(Ordering::Relaxed))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
