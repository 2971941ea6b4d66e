//! Error types for the core-bounce parameter estimation pipeline.
//!
//! Errors are grouped by concern and classified so the batch driver can tell
//! per-signal failures (skip and continue) from input errors (fail fast).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Catalog loading or lookup errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Time-series construction and conditioning errors
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    /// Detector noise retrieval errors
    #[error("Noise error: {0}")]
    Noise(#[from] NoiseError),

    /// Posterior sampling errors
    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Result persistence errors
    #[error("Results error: {0}")]
    Results(#[from] ResultsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to open catalog '{path}': {source}")]
    OpenFailed {
        path: Box<PathBuf>,
        source: std::io::Error,
    },

    #[error("Malformed catalog row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("Catalog is missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("Unknown waveform type {wave_type} (expected 0 for GR or 1 for GREP)")]
    UnknownWaveType { wave_type: u8 },

    #[error("Catalog has no samples for signal {index}")]
    EmptySignal { index: usize },

    #[error("Signal index {index} out of range (catalog holds {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Dataset '{dataset}' not found in waveform group '{group}'")]
    MissingDataset { group: String, dataset: String },

    #[error("Sample rate mismatch: catalog resampled at {catalog} Hz, pipeline runs at {pipeline} Hz")]
    SampleRateMismatch { catalog: u32, pipeline: u32 },

    #[error("Catalog backend unavailable: {reason}")]
    Unsupported { reason: String },

    #[error("Catalog read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Invalid waveform format: {reason}")]
    InvalidFormat { reason: String },
}

/// Time-series and signal-conditioning errors
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Sample interval mismatch: {left} s vs {right} s")]
    DeltaMismatch { left: f64, right: f64 },

    #[error("Length mismatch: {left} samples vs {right} samples")]
    LengthMismatch { left: usize, right: usize },

    #[error("Time series is empty")]
    Empty,

    #[error("Time series too short: needed {needed} samples, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("Invalid window: start {start} s must precede end {end} s")]
    InvalidWindow { start: f64, end: f64 },

    #[error("Gaussian width must be positive, got {width}")]
    NonPositiveWidth { width: f64 },

    #[error("Filter cutoff {cutoff_hz} Hz must lie strictly between 0 and Nyquist ({nyquist_hz} Hz)")]
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },

    #[error("FFT processing failed: {reason}")]
    Fft { reason: String },

    #[error("Observation has zero variance; nothing was injected into the window")]
    ZeroVariance,

    #[error("Signal {index} lies entirely outside the window [{start}, {end}) s")]
    EmptyInjection { index: usize, start: f64, end: f64 },
}

/// Detector-noise retrieval errors
#[derive(Error, Debug)]
pub enum NoiseError {
    #[error("Noise archive request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("No {detector} archive file covers GPS {start}-{end}")]
    NoCoverage { detector: String, start: u64, end: u64 },

    #[error("Noise segment too short: needed {needed} samples, archive supplied {actual}")]
    ShortSegment { needed: usize, actual: usize },

    #[error("Archive sample rate {archive} Hz does not match requested {requested} Hz")]
    RateMismatch { archive: u32, requested: u32 },

    #[error("Failed to read noise file '{path}': {reason}")]
    ReadFailed { path: Box<PathBuf>, reason: String },

    #[error("Noise backend unavailable: {reason}")]
    Unsupported { reason: String },
}

/// Posterior sampling errors
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Unknown sampler algorithm '{name}'")]
    UnknownAlgorithm { name: String },

    #[error("No prior draw produced a finite log-posterior after {attempts} attempts")]
    NoFiniteStart { attempts: usize },

    #[error("Posterior has no samples for parameter '{name}'")]
    MissingParameter { name: String },

    #[error("Sampler produced an empty posterior")]
    EmptyPosterior,

    #[error("Failed to write posterior samples to '{path}': {reason}")]
    WriteFailed { path: Box<PathBuf>, reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file '{path}': {source}")]
    LoadFailed {
        path: Box<PathBuf>,
        source: std::io::Error,
    },

    #[error("Invalid config format in '{path}': {source}")]
    InvalidFormat {
        path: Box<PathBuf>,
        source: toml::de::Error,
    },

    #[error("Config validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to save config to '{path}': {source}")]
    SaveFailed {
        path: Box<PathBuf>,
        source: std::io::Error,
    },

    #[error("Config serialization failed: {source}")]
    SerializationFailed { source: toml::ser::Error },

    #[error("Unknown prior choice '{name}' (expected Uniform, LogUniform, triangular or unif_betasq)")]
    UnknownPrior { name: String },
}

/// Result persistence errors
#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Failed to write results '{path}': {reason}")]
    WriteFailed { path: Box<PathBuf>, reason: String },

    #[error("Failed to read results '{path}': {reason}")]
    ReadFailed { path: Box<PathBuf>, reason: String },

    #[error("Results file '{path}' has no data row")]
    NoDataRow { path: Box<PathBuf> },
}

/// Result type alias for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    /// Whether this failure is scoped to a single signal.
    ///
    /// External-resource and degenerate-input failures are recorded and the
    /// batch moves on; configuration and catalog-shape errors abort the run.
    pub fn is_per_signal(&self) -> bool {
        match self {
            PipelineError::Sampler(_) | PipelineError::Signal(_) => true,
            PipelineError::Noise(e) => e.is_per_signal(),
            PipelineError::Results(_) | PipelineError::Io(_) => true,
            PipelineError::Catalog(e) => e.is_per_signal(),
            PipelineError::Config(_) => false,
        }
    }
}

impl PipelineError {
    /// Suggested fix for errors that have one.
    pub fn recovery_hint(&self) -> Option<&str> {
        match self {
            PipelineError::Noise(e) => e.recovery_hint(),
            _ => None,
        }
    }
}

impl CatalogError {
    /// Lookup failures affect one signal; format and rate errors affect all.
    pub fn is_per_signal(&self) -> bool {
        matches!(
            self,
            CatalogError::EmptySignal { .. } | CatalogError::IndexOutOfRange { .. }
        )
    }
}

impl NoiseError {
    /// Fetch failures affect one segment; a missing backend or a rate the
    /// archive cannot serve affects every signal.
    pub fn is_per_signal(&self) -> bool {
        !matches!(self, NoiseError::Unsupported { .. } | NoiseError::RateMismatch { .. })
    }

    /// Get suggested recovery action
    pub fn recovery_hint(&self) -> Option<&str> {
        match self {
            NoiseError::RequestFailed { .. } => Some("Check network access to the strain archive"),
            NoiseError::NoCoverage { .. } => {
                Some("Lower noise.gps_offset_max or pick a run containing the GPS range")
            }
            NoiseError::Unsupported { .. } => {
                Some("Rebuild with the hdf5-support feature or use a local noise file")
            }
            _ => None,
        }
    }
}
