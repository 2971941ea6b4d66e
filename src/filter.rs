//! IIR and FIR filters used by the catalog loader and the conditioning chain.
//!
//! The Butterworth low-pass runs as cascaded second-order sections applied
//! forward-backward; the band-limiting FIR filters are Kaiser-windowed sincs
//! whose group delay is removed and whose corrupted edges are zeroed.

use crate::error::SignalError;
use crate::timeseries::TimeSeries;
use std::f64::consts::PI;

/// Kaiser window shape used for FIR design.
pub const KAISER_BETA: f64 = 5.0;

/// One biquad: numerator `b` and denominator `a` with `a[0] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sos {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Sos {
    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }

    // Steady-state transposed direct-form II state for a unit step.
    fn step_state(&self) -> [f64; 2] {
        let g = self.dc_gain();
        let z1 = self.b[2] - self.a[2] * g;
        let z0 = self.b[1] - self.a[1] * g + z1;
        [z0, z1]
    }
}

/// Digital Butterworth low-pass of `order` at `cutoff_hz`, designed by the
/// prewarped bilinear transform and returned as second-order sections.
pub fn butter_lowpass(order: usize, cutoff_hz: f64, sample_rate: f64) -> Result<Vec<Sos>, SignalError> {
    let nyquist = sample_rate / 2.0;
    if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) || order == 0 {
        return Err(SignalError::InvalidCutoff {
            cutoff_hz,
            nyquist_hz: nyquist,
        });
    }
    let k = (PI * cutoff_hz / sample_rate).tan();
    let k2 = k * k;
    let mut sections = Vec::with_capacity(order.div_ceil(2));

    for pair in 0..order / 2 {
        // Damping of the analog pole pair: 2·sin(θ) for θ = π(2m+1)/(2N).
        let theta = PI * (2 * pair + 1) as f64 / (2 * order) as f64;
        let q = 2.0 * theta.sin();
        let d = 1.0 + q * k + k2;
        sections.push(Sos {
            b: [k2 / d, 2.0 * k2 / d, k2 / d],
            a: [1.0, 2.0 * (k2 - 1.0) / d, (1.0 - q * k + k2) / d],
        });
    }
    if order % 2 == 1 {
        let d = 1.0 + k;
        sections.push(Sos {
            b: [k / d, k / d, 0.0],
            a: [1.0, (k - 1.0) / d, 0.0],
        });
    }
    Ok(sections)
}

/// Run the cascade over `x` with per-section initial state `zi`.
fn sos_filter(sos: &[Sos], x: &[f64], zi: &[[f64; 2]]) -> Vec<f64> {
    let mut y = x.to_vec();
    for (section, z0) in sos.iter().zip(zi) {
        let mut z = *z0;
        for v in y.iter_mut() {
            let xn = *v;
            let yn = section.b[0] * xn + z[0];
            z[0] = section.b[1] * xn - section.a[1] * yn + z[1];
            z[1] = section.b[2] * xn - section.a[2] * yn;
            *v = yn;
        }
    }
    y
}

/// Initial conditions for a step response, scaled through the cascade.
fn sos_step_state(sos: &[Sos]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sos.iter()
        .map(|section| {
            let [z0, z1] = section.step_state();
            let zi = [scale * z0, scale * z1];
            scale *= section.dc_gain();
            zi
        })
        .collect()
}

/// Zero-phase forward-backward filtering through second-order sections.
///
/// The input is extended by odd reflection of `3·(2·sections + 1)` samples
/// (less trivial trailing coefficients) on each side and both passes start
/// from steady state, matching the usual `sosfiltfilt` behaviour.
pub fn sosfiltfilt(sos: &[Sos], x: &[f64]) -> Vec<f64> {
    if x.is_empty() || sos.is_empty() {
        return x.to_vec();
    }
    let trivial_b = sos.iter().filter(|s| s.b[2] == 0.0).count();
    let trivial_a = sos.iter().filter(|s| s.a[2] == 0.0).count();
    let wanted = 3 * (2 * sos.len() + 1 - trivial_b.min(trivial_a));
    let padlen = wanted.min(x.len() - 1);

    let n = x.len();
    let first = x[0];
    let last = x[n - 1];
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=padlen).map(|i| 2.0 * last - x[n - 1 - i]));

    let zi = sos_step_state(sos);
    let scaled = |v: f64| zi.iter().map(|z| [z[0] * v, z[1] * v]).collect::<Vec<_>>();

    let forward = sos_filter(sos, &ext, &scaled(ext[0]));
    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    let y0 = reversed[0];
    reversed = sos_filter(sos, &reversed, &scaled(y0));
    reversed.reverse();
    reversed[padlen..padlen + n].to_vec()
}

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..200 {
        term *= (half / k as f64).powi(2);
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

/// Symmetric Kaiser window of `n` points.
pub fn kaiser_window(n: usize, beta: f64) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    (0..n)
        .map(|i| {
            let r = 2.0 * i as f64 / (n - 1) as f64 - 1.0;
            bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
        })
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Windowed-sinc FIR design with `numtaps` coefficients.
///
/// `cutoff` is normalised to Nyquist. Low-pass taps are scaled to unit gain at
/// DC, high-pass taps to unit gain at Nyquist (so `numtaps` must be odd).
pub fn firwin(numtaps: usize, cutoff: f64, highpass: bool) -> Vec<f64> {
    let alpha = (numtaps - 1) as f64 / 2.0;
    let window = kaiser_window(numtaps, KAISER_BETA);
    let taps: Vec<f64> = (0..numtaps)
        .map(|i| {
            let m = i as f64 - alpha;
            let ideal = if highpass {
                sinc(m) - cutoff * sinc(cutoff * m)
            } else {
                cutoff * sinc(cutoff * m)
            };
            ideal * window[i]
        })
        .collect();

    let gain: f64 = taps
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let m = i as f64 - alpha;
            if highpass {
                h * (PI * m).cos()
            } else {
                *h
            }
        })
        .sum();
    taps.into_iter().map(|h| h / gain).collect()
}

/// Convolve with `coeff`, undo the filter delay and zero the corrupted edges.
///
/// With `h = coeff.len() / 2`, output sample `j` in `[h, n - h)` is the causal
/// convolution at `j + h`; the first and last `h` samples are zero.
pub fn fir_zero_filter(coeff: &[f64], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let half = coeff.len() / 2;
    let mut out = vec![0.0; n];
    if n <= 2 * half {
        return out;
    }
    for (j, slot) in out.iter_mut().enumerate().take(n - half).skip(half) {
        let k = j + half;
        *slot = coeff
            .iter()
            .enumerate()
            .map(|(i, c)| c * x[k - i])
            .sum();
    }
    out
}

fn fir_filter(ts: &TimeSeries, frequency: f64, order: usize, highpass: bool) -> Result<TimeSeries, SignalError> {
    let nyquist = (ts.sample_rate().round() as u64 / 2) as f64;
    if !(frequency > 0.0 && frequency < nyquist) {
        return Err(SignalError::InvalidCutoff {
            cutoff_hz: frequency,
            nyquist_hz: nyquist,
        });
    }
    let coeff = firwin(2 * order + 1, frequency / nyquist, highpass);
    let samples = fir_zero_filter(&coeff, ts.samples());
    Ok(TimeSeries::new(samples, ts.delta_t(), ts.start_time()))
}

/// High-pass FIR filter with `2·order + 1` taps.
pub fn highpass_fir(ts: &TimeSeries, frequency: f64, order: usize) -> Result<TimeSeries, SignalError> {
    fir_filter(ts, frequency, order, true)
}

/// Low-pass FIR filter with `2·order + 1` taps.
pub fn lowpass_fir(ts: &TimeSeries, frequency: f64, order: usize) -> Result<TimeSeries, SignalError> {
    fir_filter(ts, frequency, order, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::generate_sine_wave;

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_butter_second_order_unit_dc_gain() {
        let sos = butter_lowpass(2, 800.0, 16384.0).unwrap();
        assert_eq!(sos.len(), 1);
        assert!((sos[0].dc_gain() - 1.0).abs() < 1e-12);
        assert!(butter_lowpass(2, 9000.0, 16384.0).is_err());
    }

    #[test]
    fn test_butter_odd_order_sections() {
        let sos = butter_lowpass(3, 800.0, 16384.0).unwrap();
        assert_eq!(sos.len(), 2);
        assert_eq!(sos[1].a[2], 0.0);
    }

    #[test]
    fn test_sosfiltfilt_preserves_constant() {
        let sos = butter_lowpass(2, 800.0, 16384.0).unwrap();
        let x = vec![3.5; 200];
        let y = sosfiltfilt(&sos, &x);
        assert_eq!(y.len(), x.len());
        for v in y {
            assert!((v - 3.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sosfiltfilt_attenuates_high_tone() {
        let fs = 16384;
        let sos = butter_lowpass(2, 800.0, fs as f64).unwrap();
        let low = generate_sine_wave(100.0, 0.5, fs, 1.0);
        let high = generate_sine_wave(6000.0, 0.5, fs, 1.0);
        let low_out = sosfiltfilt(&sos, low.samples());
        let high_out = sosfiltfilt(&sos, high.samples());
        assert!((rms(&low_out[1000..7000]) / rms(&low.samples()[1000..7000]) - 1.0).abs() < 0.02);
        assert!(rms(&high_out[1000..7000]) < 0.01);
    }

    #[test]
    fn test_sosfiltfilt_zero_phase() {
        // A symmetric pulse stays centred after forward-backward filtering.
        let sos = butter_lowpass(2, 800.0, 16384.0).unwrap();
        let x: Vec<f64> = (0..401)
            .map(|i| (-((i as f64 - 200.0) / 6.0).powi(2)).exp())
            .collect();
        let y = sosfiltfilt(&sos, &x);
        let peak = y
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 200);
    }

    #[test]
    fn test_kaiser_window_symmetric_and_peaked() {
        let w = kaiser_window(17, KAISER_BETA);
        assert!((w[8] - 1.0).abs() < 1e-15);
        for i in 0..17 {
            assert!((w[i] - w[16 - i]).abs() < 1e-15);
        }
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-15);
        assert!((bessel_i0(1.0) - 1.266_065_877_752_008_4).abs() < 1e-14);
    }

    #[test]
    fn test_firwin_gains() {
        let lp = firwin(15, 300.0 / 8192.0, false);
        assert!((lp.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let hp = firwin(17, 35.0 / 8192.0, true);
        let nyq_gain: f64 = hp
            .iter()
            .enumerate()
            .map(|(i, h)| h * (PI * (i as f64 - 8.0)).cos())
            .sum();
        assert!((nyq_gain - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fir_zero_filter_edges_and_delay() {
        let coeff = [0.25, 0.5, 0.25];
        let mut x = vec![0.0; 11];
        x[5] = 1.0;
        let y = fir_zero_filter(&coeff, &x);
        assert_eq!(y[0], 0.0);
        assert_eq!(y[10], 0.0);
        assert_eq!(&y[4..7], &[0.25, 0.5, 0.25]);
    }

    #[test]
    fn test_highpass_fir_rejects_dc() {
        let ts = TimeSeries::new(vec![1.0; 512], 1.0 / 16384.0, 0.0);
        let out = highpass_fir(&ts, 35.0, 8).unwrap();
        assert_eq!(out.len(), 512);
        // Short high-pass filters leave most of a constant in place, but the
        // DC component must shrink.
        assert!(out.samples()[256].abs() < 1.0);
        assert!(lowpass_fir(&ts, 9000.0, 7).is_err());
    }
}
