//! Inter-processor interrupt round trip.
//!
//! The primary sends a software generated interrupt to the secondary and
//! waits until the secondary's handler reports it. The handler also times
//! its own end-of-interrupt write, reported as the `eoi` line after the
//! `ipi` result.
use crate::{
    handshake::{Handshake, HandshakeError},
    Context, Error, ExitTest, Status,
};
use abyss::{
    cpu::{elapsed, Cpu, CycleCounter},
    dev::gic::Gic,
    interrupt::{ExceptionVector, PtRegs},
    println, warning,
};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Software generated interrupt used for the round trip.
pub const IPI_IRQ: u32 = 1;

/// Core receiving the interrupt.
pub const RECEIVER: usize = 1;

/// Priority mask letting every interrupt through.
const PRIORITY_ALL: u8 = 0xff;

/// The round trip test, run from the primary.
#[derive(Default)]
pub struct Ipi {
    eoi_cycles: AtomicU64,
    eoi_samples: AtomicU64,
}

impl ExitTest for Ipi {
    fn name(&self) -> &'static str {
        "ipi"
    }

    fn parallel(&self) -> bool {
        false
    }

    fn is_valid(&self, ctx: &Context) -> bool {
        ctx.cpu().count() > 1
    }

    fn init(&mut self, ctx: &Context) -> Result<(), Error> {
        let gic = ctx.gic()?;
        gic.enable_distributor();
        gic.enable_irq(IPI_IRQ);
        let handshake = ctx.handshake();
        if handshake.is_acknowledged() {
            return Ok(());
        }
        // Up but never acknowledged: the secondary came up after an earlier
        // bring-up gave up on it, and has parked.
        if handshake.is_secondary_up() {
            return Err(HandshakeError::AckTimeout.into());
        }
        let platform = ctx.platform();
        handshake.start_secondary(
            &*platform.power,
            RECEIVER,
            platform.secondary_entry,
            ctx.config().handshake_timeout,
        )
    }

    fn begin_round(&self) {
        self.eoi_cycles.store(0, Ordering::Relaxed);
        self.eoi_samples.store(0, Ordering::Relaxed);
    }

    fn run(&self, ctx: &Context) -> u64 {
        let gic = match ctx.mapped_gic() {
            Some(gic) => gic,
            None => return 0,
        };
        let handshake = ctx.handshake();
        let timeout = ctx.config().handshake_timeout;
        if let Err(e) = handshake.claim_ready(timeout) {
            warning!("ipi: {}", e);
            return 0;
        }
        let t1 = ctx.read_cycles();
        gic.signal(RECEIVER, IPI_IRQ);
        let eoi = match handshake.wait_received(timeout) {
            Ok(eoi) => eoi,
            Err(e) => {
                warning!("ipi: {}", e);
                return 0;
            }
        };
        let t2 = ctx.read_cycles();
        let sample = elapsed(t1, t2);
        if sample != 0 {
            self.eoi_cycles.fetch_add(eoi, Ordering::Relaxed);
            self.eoi_samples.fetch_add(1, Ordering::Relaxed);
        }
        sample
    }

    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let samples = self.eoi_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return Ok(());
        }
        writeln!(out, "eoi {}", self.eoi_cycles.load(Ordering::Relaxed) / samples)
    }
}

/// IRQ handler of the receiving core.
struct Receiver {
    gic: Arc<Gic>,
    handshake: Arc<Handshake>,
    counter: Arc<dyn CycleCounter>,
    cpu: Arc<dyn Cpu>,
    counting: bool,
}

impl Receiver {
    fn cycles(&self) -> u64 {
        if self.counting {
            self.counter.read()
        } else {
            0
        }
    }

    fn on_irq(&self, _regs: &mut PtRegs) {
        let ack = self.gic.acknowledge();
        if ack.is_spurious() || ack.irq() != IPI_IRQ {
            println!(
                "cpu{}: unexpected interrupt {} from cpu{}",
                self.cpu.id(),
                ack.irq(),
                ack.cpu()
            );
            self.cpu.halt(Status::Fail as i32);
        }
        let t1 = self.cycles();
        self.gic.end_of_interrupt(ack);
        let t2 = self.cycles();
        self.handshake.mark_received(elapsed(t1, t2));
        self.handshake.mark_ready();
    }
}

/// Entry of the receiving core once it runs rust code.
///
/// Installs the interrupt handler, reports itself up and then idles,
/// taking the interrupts the primary sends.
pub fn secondary_main(ctx: &Context) -> ! {
    let cpu = ctx.platform().cpu.clone();
    let handshake = ctx.handshake().clone();
    let gic = ctx.mapped_gic();

    let up = handshake.secondary_ready(
        || {
            if let Some(gic) = gic.as_ref() {
                let receiver = Receiver {
                    gic: gic.clone(),
                    handshake: handshake.clone(),
                    counter: ctx.platform().counter.clone(),
                    cpu: cpu.clone(),
                    counting: ctx.counting(),
                };
                ctx.vectors().install(
                    ExceptionVector::Irq,
                    Some(Arc::new(move |regs: &mut PtRegs| receiver.on_irq(regs))),
                );
                gic.enable_cpu_interface();
                gic.set_priority_mask(PRIORITY_ALL);
            }
        },
        ctx.config().handshake_timeout,
    );

    match (up, gic) {
        (Ok(()), Some(_)) => {
            handshake.mark_ready();
            cpu.enable_irq();
        }
        (Ok(()), None) => warning!("cpu{}: no interrupt controller", cpu.id()),
        (Err(e), _) => warning!("cpu{}: {}", cpu.id(), e),
    }
    loop {
        cpu.wait_for_interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Mode, Registry};
    use crate::sampler;
    use crate::sim::{Machine, Options};
    use alloc::{boxed::Box, string::String, vec};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn registry() -> Registry {
        Registry::new(vec![Box::new(Ipi::default())])
    }

    #[test]
    fn round_trip() {
        let (ctx, machine) = Machine::boot(Options::default());
        let mut registry = registry();
        registry.select(&["ipi"]).unwrap();
        let mut out = String::new();
        registry.run_selected(&ctx, Mode::Sampled, &mut out).unwrap();

        let mut lines = out.lines();
        let ipi = lines.next().unwrap();
        let cycles: u64 = ipi.strip_prefix("ipi\t").unwrap().parse().unwrap();
        assert!(cycles > 0);
        let eoi: u64 = lines
            .next()
            .and_then(|l| l.strip_prefix("eoi "))
            .unwrap()
            .parse()
            .unwrap();
        assert!(eoi > 0 && eoi < cycles);
        assert_eq!(lines.next(), None);
        assert_eq!(machine.exit_code(), None);
        assert!(machine.powered(RECEIVER));
    }

    #[test]
    fn skipped_on_single_core() {
        let (ctx, machine) = Machine::boot(Options {
            cores: 1,
            ..Options::default()
        });
        let mut registry = registry();
        registry.select(&[]).unwrap();
        let mut out = String::new();
        registry.run_selected(&ctx, Mode::Sampled, &mut out).unwrap();
        assert_eq!(out, "");
        assert!(!machine.powered(RECEIVER));
    }

    #[test]
    fn secondary_refused() {
        let (ctx, _machine) = Machine::boot(Options {
            psci_ret: -3,
            ..Options::default()
        });
        let mut registry = registry();
        registry.select(&[]).unwrap();
        let mut out = String::new();
        registry.run_selected(&ctx, Mode::OneShot, &mut out).unwrap();
        assert_eq!(out, "test init failed: ipi (starting second CPU failed: psci: denied)\n");
    }

    #[test]
    fn secondary_started_once() {
        let (ctx, machine) = Machine::boot(Options::default());
        let mut first = Ipi::default();
        first.init(&ctx).unwrap();
        let mut second = Ipi::default();
        second.init(&ctx).unwrap();
        assert_eq!(machine.power_requests(), 1);
        assert!(first.run(&ctx) > 0);
        assert!(second.run(&ctx) > 0);
    }

    #[test]
    fn eoi_covers_the_last_round_only() {
        let (ctx, _machine) = Machine::boot(Options::default());
        let mut ipi = Ipi::default();
        ipi.init(&ctx).unwrap();
        let mut rounds = 0;
        let m = sampler::measure_rounds(
            1 << 20,
            true,
            || {
                rounds += 1;
                ipi.begin_round();
            },
            || ipi.run(&ctx),
        )
        .unwrap();
        assert!(rounds > 1);
        assert_eq!(ipi.eoi_samples.load(Ordering::Relaxed), m.iterations);

        // A later one-shot reports its own sample alone.
        ipi.begin_round();
        assert!(ipi.run(&ctx) > 0);
        assert_eq!(ipi.eoi_samples.load(Ordering::Relaxed), 1);
        let mut out = String::new();
        ipi.report(&mut out).unwrap();
        assert_eq!(
            out,
            format!("eoi {}\n", ipi.eoi_cycles.load(Ordering::Relaxed))
        );
    }

    #[test]
    fn parked_secondary_fails_init() {
        let (ctx, machine) = Machine::boot(Options::default());
        // A secondary that came up after the primary stopped waiting.
        assert_eq!(
            ctx.handshake().secondary_ready(|| (), 16),
            Err(HandshakeError::AckTimeout)
        );
        let mut registry = registry();
        registry.select(&[]).unwrap();
        let mut out = String::new();
        registry.run_selected(&ctx, Mode::Sampled, &mut out).unwrap();
        assert_eq!(out, "test init failed: ipi (primary CPU did not acknowledge)\n");
        assert_eq!(machine.power_requests(), 0);
    }

    #[test]
    fn unexpected_interrupt_halts() {
        let (ctx, machine) = Machine::boot(Options::default());
        Ipi::default().init(&ctx).unwrap();
        let gic = ctx.mapped_gic().unwrap();
        gic.enable_irq(5);
        machine.hold_irqs(RECEIVER);
        gic.signal(RECEIVER, 5);
        let taken = catch_unwind(AssertUnwindSafe(|| {
            Machine::run_as(RECEIVER, || machine.take_irq())
        }));
        assert!(taken.is_err());
        assert_eq!(machine.exit_code(), Some(Status::Fail as i32));
    }
}
