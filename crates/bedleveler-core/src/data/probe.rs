//! Probe sample averaging

use crate::error::UsageError;

/// Arithmetic mean of probe samples.
///
/// Samples are summed in ascending order, so any permutation of the same
/// samples yields a bit-identical mean.
pub fn average_samples(samples: &[f64]) -> Result<f64, UsageError> {
    if samples.is_empty() {
        return Err(UsageError::NoSamples);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let sum: f64 = sorted.iter().sum();

    Ok(sum / sorted.len() as f64)
}
