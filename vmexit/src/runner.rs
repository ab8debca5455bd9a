//! Entry of a run: counter check, command line, tests.
use crate::{
    counter,
    registry::{Mode, Registry},
    Context, Status,
};
use abyss::{debug, warning};
use alloc::vec::Vec;
use core::fmt;

const ONESHOT: &str = "--oneshot";

/// Split the command line into test names and the measuring mode.
///
/// Every `--oneshot` is removed by swapping the last argument into its
/// place.
pub fn parse_args<'a>(args: &[&'a str]) -> (Vec<&'a str>, Mode) {
    let mut names = args.to_vec();
    let mut mode = Mode::Sampled;
    while let Some(pos) = names.iter().position(|arg| *arg == ONESHOT) {
        names.swap_remove(pos);
        mode = Mode::OneShot;
    }
    (names, mode)
}

/// Run every test named in `args` (all of them when none is named) and
/// print the results to `out`.
pub fn run(ctx: &Context, args: &[&str], out: &mut dyn fmt::Write) -> Status {
    run_with(ctx, Registry::standard(), args, out)
}

/// [`run`] over the tests of `registry`.
pub fn run_with(
    ctx: &Context,
    mut registry: Registry,
    args: &[&str],
    out: &mut dyn fmt::Write,
) -> Status {
    debug!("vmexit tests up on cpu{}", ctx.cpu().id());
    if let Err(e) = counter::probe(ctx) {
        if ctx.config().strict_counter {
            let _ = writeln!(out, "{}", e);
            return Status::Fail;
        }
        warning!("{}, results carry no timing", e);
        ctx.disable_counting();
    }

    let (names, mode) = parse_args(args);
    if let Err(e) = registry.select(&names) {
        let _ = writeln!(out, "{}", e);
        return Status::Fail;
    }
    match registry.run_selected(ctx, mode, out) {
        Ok(()) => Status::Pass,
        Err(_) => Status::Fail,
    }
}
