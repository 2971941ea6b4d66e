//! Posterior sampling.
//!
//! The pipeline talks to samplers through the [`Sampler`] trait. The bundled
//! engine is a differential-evolution MCMC (ter Braak 2006): a population of
//! chains proposes jumps along the difference of two other chains, which
//! adapts the proposal scale and orientation to the posterior without tuning.

use crate::error::SamplerError;
use crate::likelihood::LogLikelihood;
use crate::model::{WaveformParameters, PARAMETER_NAMES};
use crate::priors::PriorSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::path::{Path, PathBuf};

/// Name under which the bundled engine is selected.
pub const DE_MCMC: &str = "demcmc";

/// Every n-th generation uses a unit jump scale to hop between modes.
const MODE_JUMP_PERIOD: usize = 10;

/// Outlier chains are checked this often during burn-in.
const OUTLIER_CHECK_PERIOD: usize = 100;

/// Jitter added to every proposal, relative to the prior width.
const JITTER_SCALE: f64 = 1e-6;

/// What to sample and where to put the artefacts.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub algorithm: String,
    pub nsamples: usize,
    pub label: String,
    pub outdir: PathBuf,
    /// Write the raw chain to `{outdir}/{label}_posterior.csv`
    pub save_samples: bool,
}

/// A black-box posterior sampler.
pub trait Sampler {
    fn run(
        &self,
        likelihood: &dyn LogLikelihood,
        priors: &PriorSet,
        request: &SampleRequest,
    ) -> Result<Posterior, SamplerError>;
}

/// Equally weighted posterior samples.
#[derive(Debug, Clone, Default)]
pub struct Posterior {
    samples: Vec<[f64; 4]>,
    ln_likelihood: Vec<f64>,
}

impl Posterior {
    pub fn new(samples: Vec<[f64; 4]>, ln_likelihood: Vec<f64>) -> Result<Self, SamplerError> {
        if samples.is_empty() {
            return Err(SamplerError::EmptyPosterior);
        }
        Ok(Self { samples, ln_likelihood })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn column(name: &str) -> Result<usize, SamplerError> {
        PARAMETER_NAMES
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| SamplerError::MissingParameter { name: name.to_string() })
    }

    /// Marginal samples of one parameter.
    pub fn samples(&self, name: &str) -> Result<Vec<f64>, SamplerError> {
        let col = Self::column(name)?;
        Ok(self.samples.iter().map(|s| s[col]).collect())
    }

    pub fn mean(&self, name: &str) -> Result<f64, SamplerError> {
        let values = self.samples(name)?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Sample standard deviation (ddof = 1); zero for a single sample.
    pub fn std(&self, name: &str) -> Result<f64, SamplerError> {
        let values = self.samples(name)?;
        if values.len() < 2 {
            return Ok(0.0);
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        Ok((ss / (values.len() - 1) as f64).sqrt())
    }

    /// Highest-likelihood sample.
    pub fn max_likelihood(&self) -> Option<WaveformParameters> {
        self.ln_likelihood
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| WaveformParameters::from_array(self.samples[i]))
    }

    /// Write all samples with their log likelihood.
    pub fn write_csv(&self, path: &Path) -> Result<(), SamplerError> {
        let write_failed = |reason: String| SamplerError::WriteFailed {
            path: Box::new(path.to_path_buf()),
            reason,
        };
        let mut writer = csv::Writer::from_path(path).map_err(|e| write_failed(e.to_string()))?;
        let mut header: Vec<&str> = PARAMETER_NAMES.to_vec();
        header.push("log_likelihood");
        writer.write_record(&header).map_err(|e| write_failed(e.to_string()))?;
        for (sample, ll) in self.samples.iter().zip(&self.ln_likelihood) {
            let row: Vec<String> = sample.iter().chain(std::iter::once(ll)).map(|v| v.to_string()).collect();
            writer.write_record(&row).map_err(|e| write_failed(e.to_string()))?;
        }
        writer.flush().map_err(|e| write_failed(e.to_string()))
    }
}

/// Tuning of the differential-evolution sampler.
#[derive(Debug, Clone)]
pub struct DeMcmcSettings {
    /// Number of chains; at least 3 for two distinct partners
    pub chains: usize,
    /// Prior draws screened for starting points
    pub init_draws: usize,
    /// Generations discarded before collecting samples
    pub burn_in: usize,
    /// Generations between collected samples
    pub thin: usize,
    pub seed: Option<u64>,
}

impl Default for DeMcmcSettings {
    fn default() -> Self {
        Self {
            chains: 16,
            init_draws: 4000,
            burn_in: 2000,
            thin: 5,
            seed: None,
        }
    }
}

/// State of one chain.
#[derive(Debug, Clone, Copy)]
struct Walker {
    position: [f64; 4],
    ln_prior: f64,
    ln_likelihood: f64,
}

impl Walker {
    fn ln_posterior(&self) -> f64 {
        self.ln_prior + self.ln_likelihood
    }
}

pub struct DeMcmcSampler {
    settings: DeMcmcSettings,
}

impl DeMcmcSampler {
    pub fn new(settings: DeMcmcSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DeMcmcSettings {
        &self.settings
    }

    fn evaluate(likelihood: &dyn LogLikelihood, priors: &PriorSet, position: [f64; 4]) -> Walker {
        let params = WaveformParameters::from_array(position);
        let ln_prior = priors.ln_prob(&params);
        let ln_likelihood = if ln_prior.is_finite() {
            likelihood.ln_likelihood(&params)
        } else {
            f64::NEG_INFINITY
        };
        Walker {
            position,
            ln_prior,
            ln_likelihood,
        }
    }

    /// Start every chain from the best distinct prior draws.
    fn initialise(
        &self,
        chains: usize,
        likelihood: &dyn LogLikelihood,
        priors: &PriorSet,
        rng: &mut StdRng,
    ) -> Result<Vec<Walker>, SamplerError> {
        let attempts = self.settings.init_draws.max(chains);
        let mut candidates: Vec<Walker> = (0..attempts)
            .map(|_| Self::evaluate(likelihood, priors, priors.sample(rng).to_array()))
            .filter(|w| w.ln_posterior().is_finite())
            .collect();
        if candidates.len() < chains {
            return Err(SamplerError::NoFiniteStart { attempts });
        }
        candidates.sort_by(|a, b| b.ln_posterior().total_cmp(&a.ln_posterior()));
        candidates.truncate(chains);
        Ok(candidates)
    }

    /// Move chains whose posterior falls below `Q1 - 2·IQR` onto the best chain.
    fn reset_outliers(walkers: &mut [Walker]) -> usize {
        let mut values: Vec<f64> = walkers.iter().map(Walker::ln_posterior).collect();
        values.sort_by(f64::total_cmp);
        let q1 = values[values.len() / 4];
        let q3 = values[(3 * values.len()) / 4];
        let floor = q1 - 2.0 * (q3 - q1);

        let Some(best) = walkers
            .iter()
            .copied()
            .max_by(|a, b| a.ln_posterior().total_cmp(&b.ln_posterior()))
        else {
            return 0;
        };
        let mut reset = 0;
        for w in walkers.iter_mut() {
            if w.ln_posterior() < floor {
                *w = best;
                reset += 1;
            }
        }
        reset
    }

    /// Pick two distinct chain indices different from `i`.
    fn partners(rng: &mut StdRng, n: usize, i: usize) -> (usize, usize) {
        let mut r1 = rng.gen_range(0..n - 1);
        if r1 >= i {
            r1 += 1;
        }
        let mut r2 = rng.gen_range(0..n - 2);
        for skip in [i.min(r1), i.max(r1)] {
            if r2 >= skip {
                r2 += 1;
            }
        }
        (r1, r2)
    }

    fn generation(
        walkers: &mut [Walker],
        likelihood: &dyn LogLikelihood,
        priors: &PriorSet,
        widths: &[f64; 4],
        gamma: f64,
        rng: &mut StdRng,
    ) -> usize {
        let n = walkers.len();
        let mut accepted = 0;
        for i in 0..n {
            let (r1, r2) = Self::partners(rng, n, i);
            let mut proposal = walkers[i].position;
            for k in 0..4 {
                let jitter: f64 = rng.sample(StandardNormal);
                proposal[k] += gamma * (walkers[r1].position[k] - walkers[r2].position[k])
                    + JITTER_SCALE * widths[k] * jitter;
            }
            let candidate = Self::evaluate(likelihood, priors, proposal);
            if !candidate.ln_posterior().is_finite() {
                continue;
            }
            let log_ratio = candidate.ln_posterior() - walkers[i].ln_posterior();
            let u: f64 = rng.gen();
            if log_ratio >= 0.0 || u.ln() < log_ratio {
                walkers[i] = candidate;
                accepted += 1;
            }
        }
        accepted
    }
}

impl Sampler for DeMcmcSampler {
    fn run(
        &self,
        likelihood: &dyn LogLikelihood,
        priors: &PriorSet,
        request: &SampleRequest,
    ) -> Result<Posterior, SamplerError> {
        if request.algorithm != DE_MCMC {
            return Err(SamplerError::UnknownAlgorithm {
                name: request.algorithm.clone(),
            });
        }
        let chains = self.settings.chains.max(3);
        let thin = self.settings.thin.max(1);
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            label = %request.label,
            chains,
            burn_in = self.settings.burn_in,
            nsamples = request.nsamples,
            "Starting DE-MCMC"
        );

        let mut walkers = self.initialise(chains, likelihood, priors, &mut rng)?;

        let widths = priors.bounds().map(|(lo, hi)| hi - lo);
        let free = priors.sampled().iter().filter(|p| !p.is_fixed()).count().max(1);
        let gamma_default = 2.38 / (2.0 * free as f64).sqrt();
        let gamma_for = |gen: usize| {
            if (gen + 1) % MODE_JUMP_PERIOD == 0 {
                1.0
            } else {
                gamma_default
            }
        };

        for gen in 0..self.settings.burn_in {
            Self::generation(&mut walkers, likelihood, priors, &widths, gamma_for(gen), &mut rng);
            if (gen + 1) % OUTLIER_CHECK_PERIOD == 0 {
                let reset = Self::reset_outliers(&mut walkers);
                if reset > 0 {
                    tracing::debug!(generation = gen + 1, reset, "Reset outlier chains");
                }
            }
        }

        let generations = request.nsamples.div_ceil(chains) * thin;
        let mut samples = Vec::with_capacity(request.nsamples + chains);
        let mut ln_likelihood = Vec::with_capacity(request.nsamples + chains);
        let mut accepted = 0;
        for gen in 0..generations {
            accepted += Self::generation(&mut walkers, likelihood, priors, &widths, gamma_for(gen), &mut rng);
            if (gen + 1) % thin == 0 {
                for w in &walkers {
                    samples.push(w.position);
                    ln_likelihood.push(w.ln_likelihood);
                }
            }
        }
        samples.truncate(request.nsamples);
        ln_likelihood.truncate(request.nsamples);

        let acceptance = accepted as f64 / (generations.max(1) * chains) as f64;
        tracing::info!(
            label = %request.label,
            samples = samples.len(),
            acceptance,
            evaluations = likelihood.evaluations(),
            "DE-MCMC finished"
        );

        let posterior = Posterior::new(samples, ln_likelihood)?;
        if request.save_samples {
            std::fs::create_dir_all(&request.outdir).map_err(|e| SamplerError::WriteFailed {
                path: Box::new(request.outdir.clone()),
                reason: e.to_string(),
            })?;
            posterior.write_csv(&request.outdir.join(format!("{}_posterior.csv", request.label)))?;
        }
        Ok(posterior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priors::PriorChoice;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use tempfile::TempDir;

    /// Independent Gaussians around a fixed centre.
    struct Bowl {
        centre: [f64; 4],
        width: [f64; 4],
        calls: AtomicU64,
    }

    impl LogLikelihood for Bowl {
        fn ln_likelihood(&self, params: &WaveformParameters) -> f64 {
            self.calls.fetch_add(1, AtomicOrdering::Relaxed);
            params
                .to_array()
                .iter()
                .zip(self.centre.iter().zip(&self.width))
                .map(|(x, (c, w))| -0.5 * ((x - c) / w).powi(2))
                .sum()
        }

        fn evaluations(&self) -> u64 {
            self.calls.load(AtomicOrdering::Relaxed)
        }
    }

    fn request(dir: &Path, nsamples: usize) -> SampleRequest {
        SampleRequest {
            algorithm: DE_MCMC.to_string(),
            nsamples,
            label: "1.0_signal_0".to_string(),
            outdir: dir.to_path_buf(),
            save_samples: true,
        }
    }

    fn settings() -> DeMcmcSettings {
        DeMcmcSettings {
            chains: 12,
            init_draws: 500,
            burn_in: 1000,
            thin: 2,
            seed: Some(42),
        }
    }

    #[test]
    fn test_recovers_gaussian_bowl() {
        let bowl = Bowl {
            centre: [0.06, 150.0, -2e-4, 2.5e-4],
            width: [0.002, 5.0, 1e-5, 1e-5],
            calls: AtomicU64::new(0),
        };
        let priors = PriorSet::for_choice(PriorChoice::Uniform, 1.0);
        let dir = TempDir::new().unwrap();
        let sampler = DeMcmcSampler::new(settings());
        let posterior = sampler.run(&bowl, &priors, &request(dir.path(), 3000)).unwrap();

        assert_eq!(posterior.len(), 3000);
        for (k, name) in PARAMETER_NAMES.iter().enumerate() {
            let mean = posterior.mean(name).unwrap();
            let std = posterior.std(name).unwrap();
            assert!((mean - bowl.centre[k]).abs() < 0.5 * bowl.width[k], "{name} mean {mean}");
            assert!(std > 0.5 * bowl.width[k] && std < 1.5 * bowl.width[k], "{name} std {std}");
        }
        assert!(dir.path().join("1.0_signal_0_posterior.csv").exists());
        assert!(bowl.evaluations() > 0);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let bowl = Bowl {
            centre: [0.1, 50.0, 0.0, 3e-4],
            width: [0.01, 10.0, 5e-5, 2e-5],
            calls: AtomicU64::new(0),
        };
        let priors = PriorSet::for_choice(PriorChoice::LogUniform, 1.0);
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), 200);
        req.save_samples = false;
        let sampler = DeMcmcSampler::new(settings());
        let a = sampler.run(&bowl, &priors, &req).unwrap();
        let b = sampler.run(&bowl, &priors, &req).unwrap();
        assert_eq!(a.samples("beta").unwrap(), b.samples("beta").unwrap());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let bowl = Bowl {
            centre: [0.1, 50.0, 0.0, 3e-4],
            width: [1.0; 4],
            calls: AtomicU64::new(0),
        };
        let priors = PriorSet::for_choice(PriorChoice::Uniform, 1.0);
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), 10);
        req.algorithm = "dynesty".to_string();
        let err = DeMcmcSampler::new(settings()).run(&bowl, &priors, &req).unwrap_err();
        assert!(matches!(err, SamplerError::UnknownAlgorithm { .. }));
    }

    #[test]
    fn test_no_finite_start() {
        struct Hopeless;
        impl LogLikelihood for Hopeless {
            fn ln_likelihood(&self, _: &WaveformParameters) -> f64 {
                f64::NEG_INFINITY
            }
            fn evaluations(&self) -> u64 {
                0
            }
        }
        let priors = PriorSet::for_choice(PriorChoice::Uniform, 1.0);
        let dir = TempDir::new().unwrap();
        let err = DeMcmcSampler::new(settings())
            .run(&Hopeless, &priors, &request(dir.path(), 10))
            .unwrap_err();
        assert!(matches!(err, SamplerError::NoFiniteStart { .. }));
    }

    #[test]
    fn test_partners_are_distinct() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            for i in 0..3 {
                let (a, b) = DeMcmcSampler::partners(&mut rng, 3, i);
                assert!(a != i && b != i && a != b && a < 3 && b < 3);
            }
        }
    }

    #[test]
    fn test_outliers_move_to_best() {
        let mk = |lp: f64| Walker {
            position: [lp; 4],
            ln_prior: 0.0,
            ln_likelihood: lp,
        };
        let mut walkers: Vec<Walker> = (0..8).map(|i| mk(-(i as f64) * 0.1)).collect();
        walkers.push(mk(-1e6));
        let reset = DeMcmcSampler::reset_outliers(&mut walkers);
        assert_eq!(reset, 1);
        assert_eq!(walkers[8].ln_likelihood, 0.0);
    }

    #[test]
    fn test_posterior_statistics() {
        let samples = vec![[1.0, 2.0, 3.0, 4.0], [3.0, 2.0, 3.0, 8.0]];
        let post = Posterior::new(samples, vec![0.0, -1.0]).unwrap();
        assert_eq!(post.mean("beta").unwrap(), 2.0);
        assert!((post.std("beta").unwrap() - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(post.std("alpha").unwrap(), 0.0);
        assert!(matches!(post.mean("D"), Err(SamplerError::MissingParameter { .. })));
        assert_eq!(post.max_likelihood().unwrap().s, 4.0);
        assert!(Posterior::new(Vec::new(), Vec::new()).is_err());
    }
}
