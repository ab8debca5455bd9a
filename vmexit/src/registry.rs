//! The table of exit tests and the selection made on the command line.
use crate::{sampler, Context, Error};
use abyss::debug;
use alloc::{boxed::Box, string::ToString, vec::Vec};
use core::fmt;

/// A measurable kind of exit.
pub trait ExitTest: Send {
    /// Name used on the command line and in the results.
    fn name(&self) -> &'static str;

    /// Whether the test could run on several cores at once.
    ///
    /// Recorded only; every test runs on the primary core.
    fn parallel(&self) -> bool {
        true
    }

    /// Whether the machine can run the test at all.
    fn is_valid(&self, _ctx: &Context) -> bool {
        true
    }

    /// Prepare devices or cores. Called at most once per run.
    fn init(&mut self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }

    /// Called before a one-shot sample and before every round of a
    /// sampled measurement. State kept for [`ExitTest::report`] restarts
    /// here.
    fn begin_round(&self) {}

    /// Perform one exit and return the cycles it took, 0 if the sample
    /// is invalid.
    fn run(&self, ctx: &Context) -> u64;

    /// Print test specific results after the main line.
    fn report(&self, _out: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }
}

/// How selected tests are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Adaptive sampling up to the goal.
    Sampled,
    /// A single raw sample.
    OneShot,
}

struct Entry {
    test: Box<dyn ExitTest>,
    selected: bool,
    initialized: bool,
}

/// Ordered collection of tests.
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new(tests: Vec<Box<dyn ExitTest>>) -> Self {
        Self {
            entries: tests
                .into_iter()
                .map(|test| Entry {
                    test,
                    selected: false,
                    initialized: false,
                })
                .collect(),
        }
    }

    /// Registry of every test this harness knows.
    pub fn standard() -> Self {
        Self::new(crate::exits::all())
    }

    pub fn find(&self, name: &str) -> Option<&dyn ExitTest> {
        self.entries
            .iter()
            .find(|e| e.test.name() == name)
            .map(|e| &*e.test)
    }

    /// Select tests by name; no name selects all of them.
    ///
    /// An unknown name selects nothing and fails.
    pub fn select(&mut self, names: &[&str]) -> Result<(), Error> {
        if names.is_empty() {
            self.entries.iter_mut().for_each(|e| e.selected = true);
            return Ok(());
        }
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            match self.entries.iter().position(|e| e.test.name() == *name) {
                Some(index) => indices.push(index),
                None => return Err(Error::UnknownTest(name.to_string())),
            }
        }
        for index in indices {
            self.entries[index].selected = true;
        }
        Ok(())
    }

    /// Names of the selected tests in registration order.
    pub fn selected(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.test.name())
    }

    /// Run the selected tests in registration order, printing one line
    /// per measured test to `out`.
    pub fn run_selected(
        &mut self,
        ctx: &Context,
        mode: Mode,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        for entry in self.entries.iter_mut().filter(|e| e.selected) {
            let name = entry.test.name();
            if !entry.test.is_valid(ctx) {
                debug!("{} (skipped)", name);
                continue;
            }
            if !entry.initialized {
                if let Err(e) = entry.test.init(ctx) {
                    writeln!(out, "test init failed: {} ({})", name, e)?;
                    continue;
                }
                entry.initialized = true;
            }
            debug!(
                "running test {}{}...",
                name,
                if entry.test.parallel() { " (parallel)" } else { "" }
            );
            match mode {
                Mode::OneShot => {
                    entry.test.begin_round();
                    writeln!(out, "{}\t{}", name, entry.test.run(ctx))?
                }
                Mode::Sampled => {
                    let test = &entry.test;
                    let measured = sampler::measure_rounds(
                        ctx.config().goal,
                        ctx.counting(),
                        || test.begin_round(),
                        || test.run(ctx),
                    );
                    match measured {
                        Ok(m) => {
                            debug!(
                                "{} exit {} cycles over {} iterations = {}",
                                name,
                                m.cycles,
                                m.iterations,
                                m.per_iteration()
                            );
                            writeln!(out, "{}\t{}", name, m.per_iteration())?;
                        }
                        Err(e) => {
                            writeln!(out, "test failed: {} ({})", name, e)?;
                            continue;
                        }
                    }
                }
            }
            entry.test.report(out)?;
        }
        Ok(())
    }
}
