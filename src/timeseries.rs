//! Uniformly sampled real time series anchored to an absolute epoch.
//!
//! Every transform returns a new, independently owned series; nothing in the
//! pipeline mutates a predecessor's output in place.

use crate::analysis::fractional_delay;
use crate::error::{Result, SignalError};

/// Relative tolerance used when comparing sample intervals.
const DELTA_RTOL: f64 = 1e-9;

/// Uniformly sampled series with sample spacing `delta_t` and start time `epoch`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    samples: Vec<f64>,
    delta_t: f64,
    epoch: f64,
}

impl TimeSeries {
    pub fn new(samples: Vec<f64>, delta_t: f64, epoch: f64) -> Self {
        Self {
            samples,
            delta_t,
            epoch,
        }
    }

    /// All-zero series covering `[start, end)` at `sample_rate`.
    ///
    /// The sample count matches a half-open arange over the window, so
    /// `[-5, 5)` at 16384 Hz holds exactly 163840 samples.
    pub fn zeros(start: f64, end: f64, sample_rate: u32) -> Result<Self> {
        if !(end > start) {
            return Err(SignalError::InvalidWindow { start, end }.into());
        }
        let delta_t = 1.0 / sample_rate as f64;
        let n = ((end - start) * sample_rate as f64 - 1e-9).ceil() as usize;
        Ok(Self::new(vec![0.0; n], delta_t, start))
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f64> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn sample_rate(&self) -> f64 {
        1.0 / self.delta_t
    }

    pub fn start_time(&self) -> f64 {
        self.epoch
    }

    /// Time one sample past the last sample.
    pub fn end_time(&self) -> f64 {
        self.epoch + self.duration()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 * self.delta_t
    }

    /// Absolute time stamp of every sample.
    pub fn sample_times(&self) -> Vec<f64> {
        (0..self.samples.len())
            .map(|i| self.epoch + i as f64 * self.delta_t)
            .collect()
    }

    /// Same samples, new start time.
    pub fn with_epoch(mut self, epoch: f64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Population standard deviation of the samples.
    pub fn std(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let var = self.samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        var.sqrt()
    }

    pub fn is_all_zero(&self) -> bool {
        self.samples.iter().all(|&x| x == 0.0)
    }

    fn ensure_same_delta(&self, other: &TimeSeries) -> Result<()> {
        let scale = self.delta_t.abs().max(other.delta_t.abs());
        if (self.delta_t - other.delta_t).abs() > DELTA_RTOL * scale {
            return Err(SignalError::DeltaMismatch {
                left: self.delta_t,
                right: other.delta_t,
            }
            .into());
        }
        Ok(())
    }

    /// Overlay `other` onto a copy of `self`, aligned by absolute time.
    ///
    /// A sub-sample offset between the two grids is removed by a
    /// frequency-domain delay of `other` before the overlap is added. If the
    /// two supports are disjoint the copy is returned unchanged.
    pub fn inject(&self, other: &TimeSeries) -> Result<TimeSeries> {
        self.ensure_same_delta(other)?;
        let mut out = self.clone();

        if other.is_empty() || other.start_time() >= self.end_time() || self.start_time() > other.end_time() {
            return Ok(out);
        }

        let offset = (other.epoch - self.epoch) / self.delta_t;
        let rounded = offset.round();
        let (first, shifted) = if (offset - rounded).abs() < 1e-6 {
            (rounded as i64, other.samples.clone())
        } else {
            let floor = offset.floor();
            (floor as i64, fractional_delay(&other.samples, offset - floor)?)
        };

        for (i, value) in shifted.iter().enumerate() {
            let j = first + i as i64;
            if j >= 0 && (j as usize) < out.samples.len() {
                out.samples[j as usize] += value;
            }
        }
        Ok(out)
    }

    /// Sample-aligned sum. The result keeps `self`'s epoch.
    pub fn add(&self, other: &TimeSeries) -> Result<TimeSeries> {
        self.ensure_same_delta(other)?;
        if self.len() != other.len() {
            return Err(SignalError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            }
            .into());
        }
        let samples = self
            .samples
            .iter()
            .zip(&other.samples)
            .map(|(a, b)| a + b)
            .collect();
        Ok(TimeSeries::new(samples, self.delta_t, self.epoch))
    }

    /// Drop `left` seconds from the start and `right` seconds from the end.
    pub fn crop(&self, left: f64, right: f64) -> Result<TimeSeries> {
        let n_left = (left / self.delta_t).round() as usize;
        let n_right = (right / self.delta_t).round() as usize;
        if n_left + n_right >= self.len() {
            return Err(SignalError::TooShort {
                needed: n_left + n_right + 1,
                actual: self.len(),
            }
            .into());
        }
        let samples = self.samples[n_left..self.len() - n_right].to_vec();
        Ok(TimeSeries::new(
            samples,
            self.delta_t,
            self.epoch + n_left as f64 * self.delta_t,
        ))
    }

    /// Multiply every sample by `factor`.
    pub fn scaled(&self, factor: f64) -> TimeSeries {
        TimeSeries::new(
            self.samples.iter().map(|x| x * factor).collect(),
            self.delta_t,
            self.epoch,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_matches_half_open_window() {
        let ts = TimeSeries::zeros(-5.0, 5.0, 16384).unwrap();
        assert_eq!(ts.len(), 163_840);
        assert_eq!(ts.start_time(), -5.0);
        assert!((ts.duration() - 10.0).abs() < 1e-12);
        assert!(ts.is_all_zero());
    }

    #[test]
    fn test_zeros_rejects_inverted_window() {
        assert!(TimeSeries::zeros(1.0, -1.0, 16384).is_err());
    }

    #[test]
    fn test_inject_aligned_reproduces_waveform() {
        let window = TimeSeries::zeros(0.0, 1.0, 64).unwrap();
        let pulse = TimeSeries::new(vec![1.0, 2.0, 3.0], 1.0 / 64.0, 10.0 / 64.0);
        let out = window.inject(&pulse).unwrap();

        assert_eq!(&out.samples()[10..13], &[1.0, 2.0, 3.0]);
        for (i, &v) in out.samples().iter().enumerate() {
            if !(10..13).contains(&i) {
                assert_eq!(v, 0.0, "sample {i} should be untouched");
            }
        }
        assert!(window.is_all_zero(), "inject must not mutate its input");
    }

    #[test]
    fn test_inject_disjoint_is_noop() {
        let window = TimeSeries::zeros(0.0, 1.0, 64).unwrap();
        let pulse = TimeSeries::new(vec![1.0; 4], 1.0 / 64.0, 5.0);
        assert!(window.inject(&pulse).unwrap().is_all_zero());
    }

    #[test]
    fn test_inject_partial_overlap_clips() {
        let window = TimeSeries::zeros(0.0, 1.0, 8).unwrap();
        let pulse = TimeSeries::new(vec![1.0, 1.0, 1.0, 1.0], 0.125, -0.25);
        let out = window.inject(&pulse).unwrap();
        assert_eq!(out.samples(), &[1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_inject_rejects_rate_mismatch() {
        let window = TimeSeries::zeros(0.0, 1.0, 64).unwrap();
        let pulse = TimeSeries::new(vec![1.0], 1.0 / 32.0, 0.0);
        assert!(window.inject(&pulse).is_err());
    }

    #[test]
    fn test_add_and_crop() {
        let a = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0], 0.5, 0.0);
        let b = TimeSeries::new(vec![1.0, 1.0, 1.0, 1.0], 0.5, 7.0);
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.samples(), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(sum.start_time(), 0.0);

        let cropped = sum.crop(0.5, 0.5).unwrap();
        assert_eq!(cropped.samples(), &[3.0, 4.0]);
        assert_eq!(cropped.start_time(), 0.5);
        assert!(sum.crop(1.0, 1.0).is_err());
    }

    #[test]
    fn test_std_is_population() {
        let ts = TimeSeries::new(vec![1.0, 3.0], 1.0, 0.0);
        assert!((ts.std() - 1.0).abs() < 1e-12);
    }
}
