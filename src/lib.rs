// Library interface for core-bounce parameter estimation

pub mod analysis;
pub mod batch;
pub mod catalog;
pub mod cli;
pub mod conditioning;
pub mod config;
pub mod error;
pub mod filter;
pub mod likelihood;
pub mod metrics;
pub mod model;
pub mod noise;
pub mod pipeline;
pub mod priors;
pub mod report;
pub mod results;
pub mod sampler;
pub mod timeseries;
pub mod utils;

// Synthetic waveforms and noise for tests and dry runs
pub mod test_fixtures;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{PipelineError, Result};
