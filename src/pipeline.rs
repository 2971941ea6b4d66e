//! Per-signal inference: prepare, compose, condition, sample, persist.

use crate::catalog::CatalogEntry;
use crate::conditioning::condition;
use crate::config::{AppConfig, ConditioningConfig, NoiseConfig, NoiseSource, SamplerConfig};
use crate::error::{CatalogError, ConfigError, NoiseError, Result, SamplerError, SignalError};
use crate::likelihood::{build, LogLikelihood};
use crate::model::CoreBounceModel;
use crate::noise::{GwoscArchive, LocalArchive, NoiseArchive, NoiseComposer, SyntheticArchive, ZeroArchive};
use crate::priors::PriorChoice;
use crate::results::PosteriorResult;
use crate::sampler::{DeMcmcSampler, Sampler, DE_MCMC};
use crate::timeseries::TimeSeries;
use std::path::{Path, PathBuf};

/// Embed a catalog waveform into a zero window `[window_start, window_end)`.
///
/// The waveform is placed by absolute time. If it lies entirely outside the
/// window the result is all zeros.
pub fn prepare_signal(entry: &CatalogEntry, window_start: f64, window_end: f64, sample_rate: u32) -> Result<TimeSeries> {
    if entry.sample_rate != sample_rate {
        return Err(CatalogError::SampleRateMismatch {
            catalog: entry.sample_rate,
            pipeline: sample_rate,
        }
        .into());
    }
    if entry.strain.is_empty() {
        return Err(CatalogError::EmptySignal { index: entry.index }.into());
    }
    TimeSeries::zeros(window_start, window_end, sample_rate)?.inject(&entry.to_timeseries())
}

/// Noise source named by the configuration.
pub fn build_archive(config: &NoiseConfig, sample_rate: u32) -> Result<Box<dyn NoiseArchive>> {
    let archive: Box<dyn NoiseArchive> = match config.source {
        NoiseSource::Gwosc if !cfg!(feature = "hdf5-support") => {
            return Err(NoiseError::Unsupported {
                reason: "the gwosc noise source reads HDF5 strain files; build with the hdf5-support feature"
                    .to_string(),
            }
            .into());
        }
        NoiseSource::Gwosc => Box::new(GwoscArchive::new(
            config.archive_url.clone(),
            config.run.clone(),
            config.cache_dir.clone(),
        )),
        NoiseSource::Local => {
            let path = config.local_file.as_deref().ok_or_else(|| ConfigError::ValidationFailed {
                reason: "noise.local_file is required for the local source".to_string(),
            })?;
            Box::new(LocalArchive::open(path, config.local_gps_start, sample_rate)?)
        }
        NoiseSource::Synthetic => Box::new(SyntheticArchive::new(
            config.synthetic_psd,
            config.seed.unwrap_or_default(),
        )),
        NoiseSource::Zero => Box::new(ZeroArchive),
    };
    Ok(archive)
}

/// Sampler named by the configuration.
pub fn build_sampler(config: &SamplerConfig) -> Result<Box<dyn Sampler>, SamplerError> {
    match config.algorithm.as_str() {
        DE_MCMC => Ok(Box::new(DeMcmcSampler::new(config.settings()))),
        other => Err(SamplerError::UnknownAlgorithm { name: other.to_string() }),
    }
}

/// Output of one successfully processed signal.
#[derive(Debug, Clone)]
pub struct SignalRun {
    pub result: PosteriorResult,
    pub result_file: PathBuf,
    pub evaluations: u64,
}

/// Everything needed to run inference on one signal after another.
///
/// Each call to [`InferencePipeline::process`] builds fresh series, likelihood
/// and priors; only the noise RNG carries over between signals.
pub struct InferencePipeline {
    sample_rate: u32,
    window: (f64, f64),
    distance_kpc: f64,
    prior: PriorChoice,
    conditioning: ConditioningConfig,
    sampler_config: SamplerConfig,
    composer: NoiseComposer,
    sampler: Box<dyn Sampler>,
}

impl InferencePipeline {
    pub fn new(config: &AppConfig, archive: Box<dyn NoiseArchive>, sampler: Box<dyn Sampler>) -> Self {
        let composer = NoiseComposer::new(
            archive,
            config.noise.selection(),
            config.pipeline.sample_rate,
            config.noise.seed,
        );
        Self {
            sample_rate: config.pipeline.sample_rate,
            window: (config.pipeline.window_start, config.pipeline.window_end),
            distance_kpc: config.pipeline.distance_kpc,
            prior: config.inference.prior,
            conditioning: config.conditioning.clone(),
            sampler_config: config.sampler.clone(),
            composer,
            sampler,
        }
    }

    /// Build the pipeline with the archive and sampler the config names.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let archive = build_archive(&config.noise, config.pipeline.sample_rate)?;
        let sampler = build_sampler(&config.sampler)?;
        Ok(Self::new(config, archive, sampler))
    }

    pub fn noise_source(&self) -> &'static str {
        self.composer.archive_name()
    }

    /// Run the full chain for `entry` and write `{outdir}/{label}.csv`.
    pub fn process(&mut self, entry: &CatalogEntry, label: &str, outdir: &Path) -> Result<SignalRun> {
        let (start, end) = self.window;
        let prepared = prepare_signal(entry, start, end, self.sample_rate)?;
        if prepared.is_all_zero() {
            return Err(SignalError::EmptyInjection {
                index: entry.index,
                start,
                end,
            }
            .into());
        }

        let observation = self.composer.compose(&prepared)?;
        let conditioned = condition(&observation, &self.conditioning)?;

        let (likelihood, priors) = build(&conditioned, self.prior, Box::new(CoreBounceModel), self.distance_kpc)?;
        let request = self.sampler_config.request(label, outdir);
        let posterior = self.sampler.run(&likelihood, &priors, &request)?;

        let result = PosteriorResult::from_posterior(&posterior)?;
        let result_file = outdir.join(format!("{label}.csv"));
        result.write_csv(&result_file)?;

        Ok(SignalRun {
            result,
            result_file,
            evaluations: likelihood.evaluations(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::model::WaveformParameters;
    use crate::test_fixtures::synthetic_entry;

    #[test]
    fn test_prepare_reproduces_waveform_inside_window() {
        let params = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        // Entry grid aligned with the window grid
        let edge = 320.0 / 16384.0;
        let entry = synthetic_entry(0, params, 1.0, 16384, -edge, edge);
        let prepared = prepare_signal(&entry, -0.5, 0.5, 16384).unwrap();

        assert_eq!(prepared.len(), 16384);
        assert_eq!(prepared.start_time(), -0.5);
        let offset = ((entry.time[0] - prepared.start_time()) * 16384.0).round() as usize;
        for (i, h) in entry.strain.iter().enumerate() {
            assert!((prepared.samples()[offset + i] - h).abs() <= 1e-12 * h.abs().max(1e-30));
        }
        let outside = prepared.samples()[..offset]
            .iter()
            .chain(&prepared.samples()[offset + entry.strain.len()..]);
        assert!(outside.into_iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_prepare_outside_window_is_all_zero() {
        let params = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let entry = synthetic_entry(0, params, 1.0, 4096, 10.0, 10.5);
        let prepared = prepare_signal(&entry, -0.5, 0.5, 4096).unwrap();
        assert!(prepared.is_all_zero());
    }

    #[test]
    fn test_prepare_rejects_rate_mismatch() {
        let params = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let entry = synthetic_entry(0, params, 1.0, 4096, -0.01, 0.01);
        let err = prepare_signal(&entry, -0.5, 0.5, 16384).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Catalog(CatalogError::SampleRateMismatch {
                catalog: 4096,
                pipeline: 16384
            })
        ));
        assert!(!err.is_per_signal());
    }

    #[test]
    fn test_build_sampler_rejects_unknown_algorithm() {
        let config = SamplerConfig {
            algorithm: "dynesty".to_string(),
            ..SamplerConfig::default()
        };
        assert!(build_sampler(&config).is_err());
        assert!(build_sampler(&SamplerConfig::default()).is_ok());
    }

    #[test]
    #[cfg(not(feature = "hdf5-support"))]
    fn test_gwosc_source_needs_hdf5_support() {
        let config = AppConfig::default();
        assert_eq!(config.noise.source, NoiseSource::Gwosc);

        let err = build_archive(&config.noise, config.pipeline.sample_rate).err().unwrap();
        assert!(matches!(err, PipelineError::Noise(NoiseError::Unsupported { .. })));
        assert!(!err.is_per_signal());
        assert!(InferencePipeline::from_config(&config).is_err());
    }

    #[test]
    fn test_empty_injection_is_flagged() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.noise.source = NoiseSource::Zero;
        let mut pipeline = InferencePipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.noise_source(), "zero");

        let params = WaveformParameters::new(0.05, 100.0, -3e-4, 2e-4);
        let entry = synthetic_entry(3, params, 1.0, 16384, 20.0, 20.01);
        let err = pipeline.process(&entry, "1_signal_3", dir.path()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Signal(SignalError::EmptyInjection { index: 3, .. })
        ));
        assert!(err.is_per_signal());
    }
}
