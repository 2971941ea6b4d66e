//! Analytic core-bounce waveform: three Gaussian pulses with empirically
//! fitted peak amplitudes.

use crate::error::SignalError;
use serde::{Deserialize, Serialize};

/// Quadratic fit of the first peak amplitude in β (constant, linear, quadratic).
pub const PEAK1_COEFFS: [f64; 3] = [-13.226599612574933, 2895.774762651694, -13187.237843459969];

/// Quadratic fit of the second peak amplitude in β.
pub const PEAK2_COEFFS: [f64; 3] = [-1.037868009414148, -5524.811161263574, 9436.966253755723];

/// Spacing between consecutive pulse centres (s).
pub const PEAK_SPACING: f64 = 0.0005;

/// Gaussian pulses are exactly zero in f64 beyond this many widths.
const SUPPORT_WIDTHS: f64 = 40.0;

/// Parameter names in sampling order.
pub const PARAMETER_NAMES: [&str; 4] = ["beta", "alpha", "tau", "s"];

/// Physical parameters of the core-bounce model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformParameters {
    /// Rotational rate T/|W| of the core
    pub beta: f64,
    /// EOS-dependent height of the third peak
    pub alpha: f64,
    /// Bounce time (s)
    pub tau: f64,
    /// Gaussian width (s)
    pub s: f64,
}

impl WaveformParameters {
    pub fn new(beta: f64, alpha: f64, tau: f64, s: f64) -> Self {
        Self { beta, alpha, tau, s }
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.beta, self.alpha, self.tau, self.s]
    }

    /// Reject parameter sets for which the pulses degenerate.
    pub fn validate(&self) -> Result<(), SignalError> {
        if !(self.s > 0.0) {
            return Err(SignalError::NonPositiveWidth { width: self.s });
        }
        Ok(())
    }

    /// Peak amplitudes (p1, p2, p3) in centimetres.
    pub fn peak_amplitudes(&self) -> [f64; 3] {
        let b = self.beta;
        let p1 = PEAK1_COEFFS[0] + PEAK1_COEFFS[1] * b + PEAK1_COEFFS[2] * b * b;
        let p2 = PEAK2_COEFFS[0] + PEAK2_COEFFS[1] * b + PEAK2_COEFFS[2] * b * b;
        let p3 = 17.20 + self.alpha * (b / 0.06).powi(2);
        [p1, p2, p3]
    }

    /// Pulse centres μ1 < μ2 < μ3.
    pub fn peak_centres(&self) -> [f64; 3] {
        let mu1 = self.tau;
        let mu2 = mu1 + PEAK_SPACING;
        let mu3 = mu2 + PEAK_SPACING;
        [mu1, mu2, mu3]
    }
}

/// A deterministic strain model over a fixed parameter family.
pub trait SignalModel: Send + Sync {
    /// Strain at each time in `t` for source distance `distance` (m).
    fn strain(&self, t: &[f64], params: &WaveformParameters, distance: f64) -> Vec<f64>;

    /// Time interval outside which the model is exactly zero, if any.
    fn support(&self, _params: &WaveformParameters) -> Option<(f64, f64)> {
        None
    }
}

/// The three-peak core-bounce approximation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreBounceModel;

impl SignalModel for CoreBounceModel {
    fn strain(&self, t: &[f64], params: &WaveformParameters, distance: f64) -> Vec<f64> {
        core_bounce_signal(t, params.beta, params.alpha, params.tau, params.s, distance)
    }

    fn support(&self, params: &WaveformParameters) -> Option<(f64, f64)> {
        if !(params.s > 0.0) {
            return None;
        }
        let [mu1, _, mu3] = params.peak_centres();
        let reach = SUPPORT_WIDTHS * params.s;
        Some((mu1 - reach, mu3 + reach))
    }
}

/// Strain of the core-bounce model at times `t` for a source at `d` metres.
///
/// Amplitudes are fitted in centimetres; the result is divided by `100·d`
/// to give a dimensionless strain. A non-positive width yields all zeros.
pub fn core_bounce_signal(t: &[f64], beta: f64, alpha: f64, tau: f64, s: f64, d: f64) -> Vec<f64> {
    let params = WaveformParameters::new(beta, alpha, tau, s);
    if params.validate().is_err() {
        return vec![0.0; t.len()];
    }
    let [p1, p2, p3] = params.peak_amplitudes();
    let [mu1, mu2, mu3] = params.peak_centres();
    let two_s2 = 2.0 * s * s;
    let scale = 1.0 / (100.0 * d);

    t.iter()
        .map(|&ti| {
            let g1 = p1 * (-(ti - mu1).powi(2) / two_s2).exp();
            let g2 = p2 * (-(ti - mu2).powi(2) / two_s2).exp();
            let g3 = p3 * (-(ti - mu3).powi(2) / two_s2).exp();
            (g1 + g2 + g3) * scale
        })
        .collect()
}
