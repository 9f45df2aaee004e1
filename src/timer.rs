//! Time how long an operation takes, averaged over a number of repetitions.
use core::convert::Infallible;
use core::fmt;
use std::time::Instant;

/// Elapsed wall clock time of each measured run, in milliseconds.
///
/// Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Timing {
    samples: Vec<f64>,
}

/// Run `operation` `repetitions` times and print the average, min and max.
///
/// With more than one repetition the operation is run once more beforehand, untimed, so that
/// cold caches do not end up in the statistics. Nothing happens for zero repetitions.
pub fn measure<F>(repetitions: usize, mut operation: F) -> Option<Timing> where
    F: FnMut(),
{
    let timing = sample(repetitions, &mut operation)?;
    println!("{}", timing);
    Some(timing)
}

/// Like [`measure`] for an operation that may fail.
///
/// The first failure is returned as is, without printing anything.
pub fn try_measure<F, E>(repetitions: usize, operation: F) -> Result<Option<Timing>, E> where
    F: FnMut() -> Result<(), E>,
{
    let timing = try_sample(repetitions, operation)?;
    if let Some(timing) = &timing {
        println!("{}", timing);
    }
    Ok(timing)
}

/// Like [`measure`] but without printing.
pub fn sample<F>(repetitions: usize, mut operation: F) -> Option<Timing> where
    F: FnMut(),
{
    let infallible = || {
        operation();
        Ok::<_, Infallible>(())
    };

    match try_sample(repetitions, infallible) {
        Ok(timing) => timing,
        Err(never) => match never {},
    }
}

/// Like [`try_measure`] but without printing.
pub fn try_sample<F, E>(repetitions: usize, mut operation: F) -> Result<Option<Timing>, E> where
    F: FnMut() -> Result<(), E>,
{
    if repetitions == 0 {
        return Ok(None);
    }

    // Warmup
    if repetitions > 1 {
        operation()?;
    }

    let mut samples = Vec::with_capacity(repetitions);
    for _ in 0..repetitions {
        let start = Instant::now();
        operation()?;
        let elapsed = start.elapsed();
        samples.push(elapsed.as_secs_f64() * 1e3);
    }

    Ok(Some(Timing { samples }))
}

impl Timing {
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn average(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "average: {:.3} ms,   min: {:.3} ms,   max: {:.3} ms",
            self.average(),
            self.min(),
            self.max(),
        )
    }
}
