//! Turns a raw observation into the series the likelihood conditions on.
//!
//! Whitening uses a PSD estimated from the unfiltered observation, so the
//! band-pass must come after it.

use crate::analysis::{interpolate, welch_psd, whiten_with_psd};
use crate::config::ConditioningConfig;
use crate::error::Result;
use crate::filter::{highpass_fir, lowpass_fir};
use crate::timeseries::TimeSeries;
use serde::{Deserialize, Serialize};

/// How the observation is prepared for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conditioning {
    /// Welch PSD, whitening, rescale, edge crop, band-pass
    #[default]
    Whiten,
    /// Use the observation unchanged (noise-free validation runs)
    Raw,
}

/// Apply the configured conditioning mode.
pub fn condition(observation: &TimeSeries, config: &ConditioningConfig) -> Result<TimeSeries> {
    match config.mode {
        Conditioning::Whiten => whiten(observation, config),
        Conditioning::Raw => Ok(observation.clone()),
    }
}

/// Whiten against the observation's own PSD, then band-limit.
pub fn whiten(observation: &TimeSeries, config: &ConditioningConfig) -> Result<TimeSeries> {
    let psd = welch_psd(observation, config.welch_segment, config.welch_stride)?;
    let psd = interpolate(&psd, 1.0 / observation.duration());
    let white = whiten_with_psd(observation, &psd)?
        .scaled(config.scale)
        .crop(config.crop_secs, config.crop_secs)?;
    let white = highpass_fir(&white, config.highpass_hz, config.highpass_order)?;
    let white = lowpass_fir(&white, config.lowpass_hz, config.lowpass_order)?;
    tracing::debug!(
        samples = white.len(),
        start = white.start_time(),
        "Conditioned observation"
    );
    Ok(white)
}
