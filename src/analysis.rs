//! Spectral primitives built on `realfft`: Welch PSD estimation, PSD
//! interpolation, frequency-domain whitening and sub-sample delays.

use crate::error::{Result, SignalError};
use crate::timeseries::TimeSeries;
use num_complex::Complex;
use realfft::RealFftPlanner;
use std::f64::consts::PI;

/// One-sided frequency series starting at 0 Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySeries {
    pub values: Vec<f64>,
    pub delta_f: f64,
}

impl FrequencySeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.values.len())
            .map(|k| k as f64 * self.delta_f)
            .collect()
    }
}

/// Symmetric Hann window of length `n`, zero at both ends.
pub fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// Bias of the median of `n` exponentially distributed periodogram values
/// relative to their mean.
pub fn median_bias(n: usize) -> f64 {
    if n >= 1000 {
        return std::f64::consts::LN_2;
    }
    let mut ans = 1.0;
    for i in 1..=((n.saturating_sub(1)) / 2) {
        ans += 1.0 / (2 * i + 1) as f64 - 1.0 / (2 * i) as f64;
    }
    ans
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// One-sided PSD by median-averaged Welch periodograms.
///
/// Segments of `seg_len` samples advance by `seg_stride`, are Hann-windowed,
/// and their periodograms (DC and Nyquist halved) are median-combined with
/// bias correction.
pub fn welch_psd(ts: &TimeSeries, seg_len: usize, seg_stride: usize) -> Result<FrequencySeries> {
    if ts.len() < seg_len {
        return Err(SignalError::TooShort {
            needed: seg_len,
            actual: ts.len(),
        }
        .into());
    }
    let num_segments = (ts.len() - seg_len) / seg_stride + 1;
    let window = hann_window(seg_len);
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(seg_len);
    let mut input = r2c.make_input_vec();
    let mut spectrum = r2c.make_output_vec();
    let n_bins = spectrum.len();

    // Per-bin periodogram values across segments.
    let mut per_bin = vec![Vec::with_capacity(num_segments); n_bins];
    let samples = ts.samples();
    for seg in 0..num_segments {
        let start = seg * seg_stride;
        for (dst, (x, w)) in input
            .iter_mut()
            .zip(samples[start..start + seg_len].iter().zip(&window))
        {
            *dst = x * w;
        }
        r2c.process(&mut input, &mut spectrum)
            .map_err(|e| SignalError::Fft {
                reason: e.to_string(),
            })?;
        for (k, c) in spectrum.iter().enumerate() {
            let mut p = c.norm_sqr();
            if k == 0 || k == n_bins - 1 {
                p /= 2.0;
            }
            per_bin[k].push(p);
        }
    }

    let bias = median_bias(num_segments);
    let scale = 2.0 * ts.delta_t() / window_power;
    let values = per_bin
        .iter_mut()
        .map(|vals| median(vals) / bias * scale)
        .collect();

    Ok(FrequencySeries {
        values,
        delta_f: 1.0 / (ts.delta_t() * seg_len as f64),
    })
}

/// Linearly interpolate `series` onto a grid with spacing `delta_f`,
/// clamping beyond the last known frequency.
pub fn interpolate(series: &FrequencySeries, delta_f: f64) -> FrequencySeries {
    if series.is_empty() {
        return series.clone();
    }
    let new_n = ((series.len() - 1) as f64 * series.delta_f / delta_f + 1.0).round() as usize;
    let last = series.len() - 1;
    let values = (0..new_n)
        .map(|k| {
            let pos = k as f64 * delta_f / series.delta_f;
            let i = pos.floor() as usize;
            if i >= last {
                return series.values[last];
            }
            let frac = pos - i as f64;
            series.values[i] * (1.0 - frac) + series.values[i + 1] * frac
        })
        .collect();
    FrequencySeries { values, delta_f }
}

/// Divide the spectrum of `ts` by `sqrt(psd)` and transform back.
///
/// Bins whose PSD is zero or non-finite are zeroed rather than divided.
pub fn whiten_with_psd(ts: &TimeSeries, psd: &FrequencySeries) -> Result<TimeSeries> {
    let n = ts.len();
    if n == 0 {
        return Err(SignalError::Empty.into());
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let c2r = planner.plan_fft_inverse(n);

    let mut input = ts.samples().to_vec();
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut input, &mut spectrum)
        .map_err(|e| SignalError::Fft {
            reason: e.to_string(),
        })?;

    let last = psd.len().saturating_sub(1);
    for (k, bin) in spectrum.iter_mut().enumerate() {
        let p = psd.values.get(k.min(last)).copied().unwrap_or(0.0);
        *bin = if p > 0.0 && p.is_finite() {
            *bin / p.sqrt()
        } else {
            Complex::new(0.0, 0.0)
        };
    }
    zero_edge_imaginary(&mut spectrum, n);

    let mut output = c2r.make_output_vec();
    c2r.process(&mut spectrum, &mut output)
        .map_err(|e| SignalError::Fft {
            reason: e.to_string(),
        })?;
    let norm = 1.0 / n as f64;
    let samples = output.into_iter().map(|x| x * norm).collect();
    Ok(TimeSeries::new(samples, ts.delta_t(), ts.start_time()))
}

/// Delay `samples` by `frac` of a sample (0 ≤ frac < 1) with a frequency
/// domain phase ramp. The input is zero-padded to an even length of at
/// least `len + 1` so the cyclic shift wraps into padding.
pub fn fractional_delay(samples: &[f64], frac: f64) -> Result<Vec<f64>> {
    let len = samples.len();
    let n = len + (len + 1) % 2 + 1;
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let c2r = planner.plan_fft_inverse(n);

    let mut input = vec![0.0; n];
    input[..len].copy_from_slice(samples);
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut input, &mut spectrum)
        .map_err(|e| SignalError::Fft {
            reason: e.to_string(),
        })?;

    for (k, bin) in spectrum.iter_mut().enumerate() {
        let phase = -2.0 * PI * k as f64 * frac / n as f64;
        *bin *= Complex::from_polar(1.0, phase);
    }
    zero_edge_imaginary(&mut spectrum, n);

    let mut output = c2r.make_output_vec();
    c2r.process(&mut spectrum, &mut output)
        .map_err(|e| SignalError::Fft {
            reason: e.to_string(),
        })?;
    let norm = 1.0 / n as f64;
    Ok(output.into_iter().map(|x| x * norm).collect())
}

// The inverse real FFT requires purely real DC and (for even n) Nyquist bins.
fn zero_edge_imaginary(spectrum: &mut [Complex<f64>], n: usize) {
    if let Some(dc) = spectrum.first_mut() {
        dc.im = 0.0;
    }
    if n % 2 == 0 {
        if let Some(nyq) = spectrum.last_mut() {
            nyq.im = 0.0;
        }
    }
}
