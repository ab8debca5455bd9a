//! Adaptive sampling.
//!
//! A test body is run in rounds of doubling length until a round
//! accumulates at least the goal number of cycles. A body returning 0 had
//! its counter wrap or its wait time out; the sample is dropped and the
//! round shrinks by one, so the reported mean only covers valid samples.
use crate::Error;

/// Iterations of the round before the first one.
pub const START_ITERATIONS: u64 = 32;

/// Iterations of the single round run when the counter is not trusted.
pub const UNCOUNTED_ITERATIONS: u64 = START_ITERATIONS * 2;

/// Result of the last round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub cycles: u64,
    pub iterations: u64,
}

impl Measurement {
    /// Mean cost of a single exit.
    pub fn per_iteration(&self) -> u64 {
        self.cycles / self.iterations.max(1)
    }
}

/// Measure `body` until the cycles of a round reach `goal`.
///
/// Without `counting`, every sample is accepted and only one round runs.
pub fn measure(goal: u64, counting: bool, body: impl FnMut() -> u64) -> Result<Measurement, Error> {
    measure_rounds(goal, counting, || (), body)
}

/// [`measure`], calling `round` before the first sample of every round.
pub fn measure_rounds(
    goal: u64,
    counting: bool,
    mut round: impl FnMut(),
    mut body: impl FnMut() -> u64,
) -> Result<Measurement, Error> {
    if !counting {
        round();
        let cycles = (0..UNCOUNTED_ITERATIONS).fold(0u64, |acc, _| acc.wrapping_add(body()));
        return Ok(Measurement {
            cycles,
            iterations: UNCOUNTED_ITERATIONS,
        });
    }

    let mut iterations = START_ITERATIONS;
    loop {
        iterations = iterations.saturating_mul(2);
        round();
        let mut cycles = 0u64;
        let mut done = 0;
        while done < iterations {
            match body() {
                0 => iterations -= 1,
                sample => {
                    cycles = cycles.saturating_add(sample);
                    done += 1;
                }
            }
        }
        if iterations == 0 {
            return Err(Error::NoValidSamples);
        }
        if cycles >= goal {
            return Ok(Measurement { cycles, iterations });
        }
    }
}
