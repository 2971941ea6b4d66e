//! Run configuration with TOML persistence.
//!
//! Every section has defaults matching the reference O3b analysis, so a
//! config file only needs the values it changes.

use crate::catalog::{CatalogKind, LoadOptions, LowpassSpec, RichersDatasets, WaveType};
use crate::conditioning::Conditioning;
use crate::error::ConfigError;
use crate::noise::NoiseSelection;
use crate::priors::PriorChoice;
use crate::sampler::{DeMcmcSettings, SampleRequest, DE_MCMC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub catalog: CatalogConfig,
    pub noise: NoiseConfig,
    pub conditioning: ConditioningConfig,
    pub sampler: SamplerConfig,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
    pub metrics: MetricsConfig,
}

/// Values shared by every stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sample rate (Hz) used by the loader, preparer, noise and conditioning
    pub sample_rate: u32,

    /// Analysis window start relative to bounce (s)
    pub window_start: f64,

    /// Analysis window end relative to bounce (s)
    pub window_end: f64,

    /// Source distance in kiloparsecs
    pub distance_kpc: f64,
}

/// Waveform catalog source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    pub kind: CatalogKind,

    /// CSV file (Abylkairov) or HDF5 database (Richers)
    pub path: PathBuf,

    /// 0 = GR, 1 = GREP (Abylkairov only)
    pub wave_type: u8,

    /// Apply the forward-backward Butterworth low-pass at load time
    pub lowpass_enabled: bool,
    pub lowpass_cutoff_hz: f64,
    pub lowpass_order: usize,

    /// Richers strain dataset name
    pub richers_strain_dataset: String,

    /// Richers time dataset name
    pub richers_time_dataset: String,
}

/// Where detector noise comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSource {
    #[default]
    Gwosc,
    Local,
    Synthetic,
    Zero,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoiseConfig {
    pub source: NoiseSource,
    pub detector: String,

    /// First GPS second of the allowed noise range
    pub gps_base: u64,

    /// Largest random GPS offset in seconds
    pub gps_offset_max: u64,

    /// Seed for the GPS offset draw; unseeded runs are not reproducible
    pub seed: Option<u64>,

    /// Observing run name on the archive
    pub run: String,
    pub archive_url: String,
    pub cache_dir: PathBuf,

    /// Plain-text strain file for the `local` source
    pub local_file: Option<PathBuf>,
    pub local_gps_start: u64,

    /// One-sided PSD level for the `synthetic` source
    pub synthetic_psd: f64,
}

/// Observation conditioning before inference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConditioningConfig {
    pub mode: Conditioning,

    /// Welch segment length in samples (power of 2)
    pub welch_segment: usize,

    /// Welch segment stride in samples
    pub welch_stride: usize,

    /// Amplitude restored after whitening
    pub scale: f64,

    /// Seconds cropped from each end after whitening
    pub crop_secs: f64,

    pub highpass_hz: f64,
    pub highpass_order: usize,
    pub lowpass_hz: f64,
    pub lowpass_order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    pub algorithm: String,

    /// Posterior samples per signal
    pub nsamples: usize,
    pub chains: usize,

    /// Prior draws screened for starting points
    pub init_draws: usize,
    pub burn_in: usize,
    pub thin: usize,
    pub seed: Option<u64>,

    /// Also write the raw posterior samples
    pub save_samples: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    pub prior: PriorChoice,
    pub first_index: usize,

    /// Inclusive; defaults to the last catalog entry
    pub last_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Parent of the per-run results directory
    pub results_root: PathBuf,

    /// Write `run_report.json` next to the results
    pub write_report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Histogram precision (significant value digits)
    pub histogram_precision: u8,

    /// Maximum histogram value in milliseconds
    pub histogram_max_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16384,
            window_start: -5.0,
            window_end: 5.0,
            distance_kpc: 1.0,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let datasets = RichersDatasets::default();
        Self {
            kind: CatalogKind::Abylkairov,
            path: PathBuf::from("data/Abylkairov/Abylkairov_catalog.csv"),
            wave_type: 0,
            lowpass_enabled: true,
            lowpass_cutoff_hz: 800.0,
            lowpass_order: 2,
            richers_strain_dataset: datasets.strain,
            richers_time_dataset: datasets.time,
        }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            source: NoiseSource::Gwosc,
            detector: "L1".to_string(),
            gps_base: 1_256_677_376,
            gps_offset_max: 4000,
            seed: None,
            run: "O3b_16KHZ_R1".to_string(),
            archive_url: "https://gwosc.org".to_string(),
            cache_dir: PathBuf::from("cache/gwosc"),
            local_file: None,
            local_gps_start: 1_256_677_376,
            synthetic_psd: 1e-46,
        }
    }
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            mode: Conditioning::Whiten,
            welch_segment: 4096,
            welch_stride: 2048,
            scale: 1e-23,
            crop_secs: 1.0,
            highpass_hz: 35.0,
            highpass_order: 8,
            lowpass_hz: 300.0,
            lowpass_order: 7,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let de = DeMcmcSettings::default();
        Self {
            algorithm: DE_MCMC.to_string(),
            nsamples: 1000,
            chains: de.chains,
            init_draws: de.init_draws,
            burn_in: de.burn_in,
            thin: de.thin,
            seed: None,
            save_samples: false,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            prior: PriorChoice::Uniform,
            first_index: 0,
            last_index: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("."),
            write_report: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_precision: 2,
            histogram_max_ms: 3_600_000,
        }
    }
}

impl CatalogConfig {
    pub fn wave_type(&self) -> Result<WaveType, ConfigError> {
        WaveType::try_from(self.wave_type).map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })
    }

    pub fn richers_datasets(&self) -> RichersDatasets {
        RichersDatasets {
            strain: self.richers_strain_dataset.clone(),
            time: self.richers_time_dataset.clone(),
        }
    }
}

impl NoiseConfig {
    pub fn selection(&self) -> NoiseSelection {
        NoiseSelection {
            detector: self.detector.clone(),
            gps_base: self.gps_base,
            gps_offset_max: self.gps_offset_max,
        }
    }
}

impl SamplerConfig {
    pub fn settings(&self) -> DeMcmcSettings {
        DeMcmcSettings {
            chains: self.chains,
            init_draws: self.init_draws,
            burn_in: self.burn_in,
            thin: self.thin,
            seed: self.seed,
        }
    }

    pub fn request(&self, label: &str, outdir: &Path) -> SampleRequest {
        SampleRequest {
            algorithm: self.algorithm.clone(),
            nsamples: self.nsamples,
            label: label.to_string(),
            outdir: outdir.to_path_buf(),
            save_samples: self.save_samples,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::LoadFailed {
            path: Box::new(path.to_path_buf()),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::InvalidFormat {
            path: Box::new(path.to_path_buf()),
            source,
        })
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::SaveFailed {
                path: Box::new(path.to_path_buf()),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(|source| ConfigError::SerializationFailed { source })?;

        std::fs::write(path, contents).map_err(|source| ConfigError::SaveFailed {
            path: Box::new(path.to_path_buf()),
            source,
        })
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("core-bounce-pe");

        config_dir.join("config.toml")
    }

    /// Catalog loading options derived from the pipeline and catalog sections.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            sample_rate: self.pipeline.sample_rate,
            distance_kpc: self.pipeline.distance_kpc,
            lowpass: self.catalog.lowpass_enabled.then_some(LowpassSpec {
                order: self.catalog.lowpass_order,
                cutoff_hz: self.catalog.lowpass_cutoff_hz,
            }),
        }
    }

    /// Results directory name, e.g. `PE_AB_O3_1_filtered`.
    pub fn results_dir_name(&self) -> String {
        format!(
            "PE_{}_O3_{}_{}",
            self.catalog.kind.code(),
            self.pipeline.distance_kpc,
            if self.catalog.lowpass_enabled { "filtered" } else { "unfiltered" }
        )
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output.results_root.join(self.results_dir_name())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::ValidationFailed { reason });
        let nyquist = self.pipeline.sample_rate as f64 / 2.0;

        // Pipeline
        if self.pipeline.sample_rate == 0 {
            return fail("Sample rate must be > 0".to_string());
        }
        if !(self.pipeline.window_end > self.pipeline.window_start) {
            return fail(format!(
                "Window end {} s must be after window start {} s",
                self.pipeline.window_end, self.pipeline.window_start
            ));
        }
        if !(self.pipeline.distance_kpc > 0.0) {
            return fail(format!("Distance {} kpc must be positive", self.pipeline.distance_kpc));
        }

        // Catalog
        self.catalog.wave_type()?;
        if self.catalog.lowpass_enabled {
            if self.catalog.lowpass_order == 0 {
                return fail("Catalog low-pass order must be > 0".to_string());
            }
            if !(self.catalog.lowpass_cutoff_hz > 0.0 && self.catalog.lowpass_cutoff_hz < nyquist) {
                return fail(format!(
                    "Catalog low-pass cutoff {} Hz must be below Nyquist ({} Hz)",
                    self.catalog.lowpass_cutoff_hz, nyquist
                ));
            }
        }

        // Noise
        if self.noise.source == NoiseSource::Local && self.noise.local_file.is_none() {
            return fail("Noise source 'local' requires noise.local_file".to_string());
        }

        // Conditioning
        let c = &self.conditioning;
        if c.mode == Conditioning::Whiten {
            if c.welch_segment == 0 || !c.welch_segment.is_power_of_two() {
                return fail(format!("Welch segment {} must be a power of 2", c.welch_segment));
            }
            if c.welch_stride == 0 || c.welch_stride > c.welch_segment {
                return fail(format!(
                    "Welch stride {} must be in 1..={}",
                    c.welch_stride, c.welch_segment
                ));
            }
            if c.crop_secs < 0.0 {
                return fail(format!("Crop {} s must not be negative", c.crop_secs));
            }
            let window = self.pipeline.window_end - self.pipeline.window_start;
            let needed = 2.0 * c.crop_secs + c.welch_segment as f64 / self.pipeline.sample_rate as f64;
            if window < needed {
                return fail(format!(
                    "Window of {window} s is shorter than two crops plus one Welch segment ({needed} s)"
                ));
            }
            for (name, hz) in [("High-pass", c.highpass_hz), ("Low-pass", c.lowpass_hz)] {
                if !(hz > 0.0 && hz < nyquist) {
                    return fail(format!("{name} cutoff {hz} Hz must be below Nyquist ({nyquist} Hz)"));
                }
            }
        }

        // Sampler
        if self.sampler.nsamples == 0 {
            return fail("Sampler nsamples must be > 0".to_string());
        }
        if self.sampler.chains < 3 {
            return fail(format!("Sampler needs at least 3 chains, got {}", self.sampler.chains));
        }

        // Inference
        if let Some(last) = self.inference.last_index {
            if self.inference.first_index > last {
                return fail(format!(
                    "First index {} is after last index {}",
                    self.inference.first_index, last
                ));
            }
        }

        Ok(())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_valid() {
        let config = AppConfig::default();
        config.validate().expect("Default config should be valid");
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = AppConfig::default();
        config.inference.prior = PriorChoice::UniformBetaSquared;
        config.noise.seed = Some(7);
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("unif_betasq"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [pipeline]
            distance_kpc = 10.0

            [inference]
            prior = "triangular"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.distance_kpc, 10.0);
        assert_eq!(config.pipeline.sample_rate, 16384);
        assert_eq!(config.inference.prior, PriorChoice::Triangular);
        assert_eq!(config.results_dir_name(), "PE_AB_O3_10_filtered");
    }

    #[test]
    fn test_unknown_prior_rejected_at_parse() {
        let parsed: Result<AppConfig, _> = toml::from_str("[inference]\nprior = \"Gaussian\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validation_window() {
        let mut config = AppConfig::default();
        config.pipeline.window_end = config.pipeline.window_start;
        assert!(config.validate().is_err());

        // Too short to crop two seconds and hold a Welch segment
        config.pipeline.window_start = -1.0;
        config.pipeline.window_end = 1.0;
        assert!(config.validate().is_err());

        config.conditioning.mode = Conditioning::Raw;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_welch_segment() {
        let mut config = AppConfig::default();
        config.conditioning.welch_segment = 4000;
        assert!(config.validate().is_err());

        config.conditioning.welch_segment = 4096;
        config.conditioning.welch_stride = 8192;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_sampler_and_range() {
        let mut config = AppConfig::default();
        config.sampler.chains = 2;
        assert!(config.validate().is_err());

        config.sampler.chains = 16;
        config.sampler.nsamples = 0;
        assert!(config.validate().is_err());

        config.sampler.nsamples = 1000;
        config.inference.first_index = 10;
        config.inference.last_index = Some(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_cutoffs() {
        let mut config = AppConfig::default();
        config.conditioning.lowpass_hz = 9000.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.catalog.lowpass_cutoff_hz = 0.0;
        assert!(config.validate().is_err());
        config.catalog.lowpass_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_source_needs_file() {
        let mut config = AppConfig::default();
        config.noise.source = NoiseSource::Local;
        assert!(config.validate().is_err());
        config.noise.local_file = Some(PathBuf::from("noise.txt"));
        assert!(config.validate().is_ok());
    }
}
