//! Synthetic signals with known properties for tests and dry runs
//!
//! These produce core-bounce catalog entries and noise realisations so the
//! pipeline can be exercised without catalog files or archive access.

use crate::catalog::{CatalogEntry, EntryMetadata, KPC_TO_M};
use crate::model::{core_bounce_signal, WaveformParameters};
use crate::timeseries::TimeSeries;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;

/// Generate a pure sine wave at the given frequency
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `duration_secs` - Duration in seconds
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude` - Peak amplitude
///
/// # Example
/// ```
/// use core_bounce_pe::test_fixtures::generate_sine_wave;
/// let tone = generate_sine_wave(100.0, 1.0, 4096, 0.5);
/// assert_eq!(tone.len(), 4096);
/// ```
pub fn generate_sine_wave(frequency: f64, duration_secs: f64, sample_rate: u32, amplitude: f64) -> TimeSeries {
    let num_samples = (duration_secs * sample_rate as f64) as usize;
    let samples = (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect();
    TimeSeries::new(samples, 1.0 / sample_rate as f64, 0.0)
}

/// Seeded white Gaussian noise with a flat one-sided PSD of `psd_level`.
///
/// The per-sample standard deviation is `sqrt(psd_level · fs / 2)`.
pub fn generate_white_noise(duration_secs: f64, sample_rate: u32, psd_level: f64, seed: u64) -> TimeSeries {
    let num_samples = (duration_secs * sample_rate as f64).round() as usize;
    let sigma = (psd_level * sample_rate as f64 / 2.0).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..num_samples)
        .map(|_| {
            let z: f64 = StandardNormal.sample(&mut rng);
            sigma * z
        })
        .collect();
    TimeSeries::new(samples, 1.0 / sample_rate as f64, 0.0)
}

/// Catalog entry holding the analytic model itself, evaluated on
/// `[start, end)` at `sample_rate` for a source at `distance_kpc`.
pub fn synthetic_entry(
    index: usize,
    params: WaveformParameters,
    distance_kpc: f64,
    sample_rate: u32,
    start: f64,
    end: f64,
) -> CatalogEntry {
    let dt = 1.0 / sample_rate as f64;
    let n = ((end - start) / dt).round() as usize;
    let time: Vec<f64> = (0..n).map(|i| start + i as f64 * dt).collect();
    let strain = core_bounce_signal(
        &time,
        params.beta,
        params.alpha,
        params.tau,
        params.s,
        distance_kpc * KPC_TO_M,
    );
    CatalogEntry {
        index,
        name: format!("synthetic_{index}"),
        time,
        strain,
        sample_rate,
        metadata: EntryMetadata {
            eos: Some("synthetic".to_string()),
            t_over_w: Some(params.beta),
            f_peak: None,
        },
    }
}
