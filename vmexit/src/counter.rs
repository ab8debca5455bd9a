//! Cycle counter validation.
use crate::{Context, Error};
use abyss::interrupt::{ExceptionVector, PtRegs};
use abyss::warning;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Check that the cycle counter can be read and moves.
///
/// Reading an inaccessible counter raises an undefined-instruction
/// exception; a handler is installed around the two probing reads so the
/// trap is recorded instead of killing the guest.
pub fn probe(ctx: &Context) -> Result<(), Error> {
    let trapped = Arc::new(AtomicBool::new(false));
    let flag = trapped.clone();
    let table = ctx.vectors();
    table.install(
        ExceptionVector::Undefined,
        Some(Arc::new(move |_regs: &mut PtRegs| {
            warning!("cycle counter causes undefined exception");
            flag.store(true, Ordering::Relaxed);
        })),
    );
    let counter = &ctx.platform().counter;
    let first = counter.read();
    let second = counter.read();
    table.uninstall(ExceptionVector::Undefined);

    if trapped.load(Ordering::Relaxed) || first == second {
        Err(Error::CounterUnusable { first, second })
    } else {
        Ok(())
    }
}
