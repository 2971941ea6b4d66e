//! Gaussian likelihood of the conditioned observation under the waveform model.

use crate::error::{Result, SignalError};
use crate::model::{SignalModel, WaveformParameters};
use crate::priors::{PriorChoice, PriorSet};
use crate::timeseries::TimeSeries;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything a sampler can condition on.
pub trait LogLikelihood: Send + Sync {
    fn ln_likelihood(&self, params: &WaveformParameters) -> f64;

    /// Number of evaluations so far.
    fn evaluations(&self) -> u64;
}

/// White Gaussian noise likelihood with a single known σ.
///
/// `ln L = -½ Σ (dᵢ - hᵢ)² / σ² - ½ N ln(2πσ²)`
///
/// σ is the population standard deviation of the observation itself. This
/// folds any signal power into the noise estimate.
pub struct GaussianLikelihood {
    times: Vec<f64>,
    data: Vec<f64>,
    /// `data_sq_prefix[i]` is Σ d² over the first `i` samples
    data_sq_prefix: Vec<f64>,
    sigma: f64,
    distance: f64,
    model: Box<dyn SignalModel>,
    evaluations: AtomicU64,
}

impl GaussianLikelihood {
    pub fn new(observation: &TimeSeries, model: Box<dyn SignalModel>, distance: f64) -> Result<Self> {
        if observation.is_empty() {
            return Err(SignalError::Empty.into());
        }
        let sigma = observation.std();
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(SignalError::ZeroVariance.into());
        }

        let data = observation.samples().to_vec();
        let mut data_sq_prefix = Vec::with_capacity(data.len() + 1);
        let mut acc = 0.0;
        data_sq_prefix.push(acc);
        for d in &data {
            acc += d * d;
            data_sq_prefix.push(acc);
        }

        Ok(Self {
            times: observation.sample_times(),
            data,
            data_sq_prefix,
            sigma,
            distance,
            model,
            evaluations: AtomicU64::new(0),
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample index range on which the model can be non-zero.
    fn active_range(&self, params: &WaveformParameters) -> (usize, usize) {
        match self.model.support(params) {
            Some((lo, hi)) => {
                let start = self.times.partition_point(|&t| t < lo);
                let end = self.times.partition_point(|&t| t <= hi);
                (start, end.max(start))
            }
            None => (0, self.times.len()),
        }
    }

    /// Σ (d - h)² over the whole observation.
    fn residual_sum_sq(&self, params: &WaveformParameters) -> f64 {
        let (start, end) = self.active_range(params);
        let total = self.data_sq_prefix[self.data.len()];
        let outside = total - (self.data_sq_prefix[end] - self.data_sq_prefix[start]);

        let model = self.model.strain(&self.times[start..end], params, self.distance);
        let inside: f64 = self.data[start..end]
            .iter()
            .zip(&model)
            .map(|(d, h)| (d - h) * (d - h))
            .sum();
        outside + inside
    }
}

impl LogLikelihood for GaussianLikelihood {
    fn ln_likelihood(&self, params: &WaveformParameters) -> f64 {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let var = self.sigma * self.sigma;
        let n = self.data.len() as f64;
        let value = -0.5 * (self.residual_sum_sq(params) / var + n * (2.0 * PI * var).ln());
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }

    fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }
}

/// Couple the model to `observation` and build the priors for `prior_choice`.
///
/// The likelihood and the fixed distance prior share the same distance in
/// metres.
pub fn build(
    observation: &TimeSeries,
    prior_choice: PriorChoice,
    model: Box<dyn SignalModel>,
    distance_kpc: f64,
) -> Result<(GaussianLikelihood, PriorSet)> {
    let priors = PriorSet::for_choice(prior_choice, distance_kpc);
    let likelihood = GaussianLikelihood::new(observation, model, priors.distance_m())?;
    tracing::debug!(
        prior = %prior_choice,
        sigma = likelihood.sigma(),
        samples = likelihood.len(),
        "Built likelihood"
    );
    Ok((likelihood, priors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::model::CoreBounceModel;

    /// Same likelihood without the support shortcut.
    struct FullSupport;

    impl SignalModel for FullSupport {
        fn strain(&self, t: &[f64], params: &WaveformParameters, distance: f64) -> Vec<f64> {
            CoreBounceModel.strain(t, params, distance)
        }
    }

    fn observation(truth: &WaveformParameters) -> TimeSeries {
        let ts = TimeSeries::zeros(-0.02, 0.02, 16384).unwrap();
        let h = CoreBounceModel.strain(&ts.sample_times(), truth, 1.0);
        let noise: Vec<f64> = (0..h.len()).map(|i| 0.05 * ((i * 7919) % 13) as f64 / 13.0).collect();
        let samples = h.iter().zip(&noise).map(|(a, b)| a + b).collect();
        TimeSeries::new(samples, ts.delta_t(), ts.start_time())
    }

    #[test]
    fn test_support_shortcut_matches_full_sum() {
        let truth = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let obs = observation(&truth);
        let fast = GaussianLikelihood::new(&obs, Box::new(CoreBounceModel), 1.0).unwrap();
        let full = GaussianLikelihood::new(&obs, Box::new(FullSupport), 1.0).unwrap();
        for p in [
            truth,
            WaveformParameters::new(0.1, 20.0, 0.0, 3e-4),
            WaveformParameters::new(0.005, 380.0, -6e-4, 1e-4),
        ] {
            let a = fast.ln_likelihood(&p);
            let b = full.ln_likelihood(&p);
            assert!((a - b).abs() <= 1e-9 * b.abs(), "{a} vs {b}");
        }
        assert_eq!(fast.evaluations(), 3);
    }

    #[test]
    fn test_truth_beats_wrong_parameters() {
        let truth = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let like = GaussianLikelihood::new(&observation(&truth), Box::new(CoreBounceModel), 1.0).unwrap();
        let at_truth = like.ln_likelihood(&truth);
        let shifted = like.ln_likelihood(&WaveformParameters::new(0.05, 100.0, 0.0, 2e-4));
        assert!(at_truth > shifted);
    }

    #[test]
    fn test_zero_observation_is_degenerate() {
        let ts = TimeSeries::zeros(0.0, 1.0, 256).unwrap();
        let err = build(&ts, PriorChoice::Uniform, Box::new(CoreBounceModel), 1.0).err().unwrap();
        assert!(matches!(err, PipelineError::Signal(SignalError::ZeroVariance)));
    }

    #[test]
    fn test_build_shares_distance() {
        let truth = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let (like, priors) = build(&observation(&truth), PriorChoice::Triangular, Box::new(CoreBounceModel), 2.0).unwrap();
        assert_eq!(like.distance(), priors.distance_m());
    }
}
