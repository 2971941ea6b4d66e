//! Prior distributions over the core-bounce parameters.
//!
//! Four named prior families are supported. Each one assigns a univariate
//! distribution to β, α, τ and s and fixes the source distance.

use crate::catalog::KPC_TO_M;
use crate::error::ConfigError;
use crate::model::WaveformParameters;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BETA_RANGE: (f64, f64) = (0.005, 0.18);
pub const ALPHA_RANGE: (f64, f64) = (0.01, 380.0);
pub const TAU_RANGE: (f64, f64) = (-6e-4, 1e-4);
pub const S_RANGE: (f64, f64) = (1e-4, 4e-4);

/// A univariate prior distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Uniform { min: f64, max: f64 },
    LogUniform { min: f64, max: f64 },
    Triangular { mode: f64, min: f64, max: f64 },
    /// The square of the variable is uniform on `[min², max²]`
    UniformInSquare { min: f64, max: f64 },
    Fixed(f64),
}

impl Prior {
    /// Closed support of the distribution.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Prior::Uniform { min, max }
            | Prior::LogUniform { min, max }
            | Prior::Triangular { min, max, .. }
            | Prior::UniformInSquare { min, max } => (min, max),
            Prior::Fixed(v) => (v, v),
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Prior::Fixed(_))
    }

    /// Draw one value by inverse-CDF sampling.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        let value = match *self {
            Prior::Uniform { min, max } => min + (max - min) * u,
            Prior::LogUniform { min, max } => (min.ln() + (max.ln() - min.ln()) * u).exp(),
            Prior::Triangular { mode, min, max } => {
                let split = (mode - min) / (max - min);
                if u < split {
                    min + (u * (max - min) * (mode - min)).sqrt()
                } else {
                    max - ((1.0 - u) * (max - min) * (max - mode)).sqrt()
                }
            }
            Prior::UniformInSquare { min, max } => (min * min + u * (max * max - min * min)).sqrt(),
            Prior::Fixed(v) => return v,
        };
        let (lo, hi) = self.bounds();
        value.clamp(lo, hi)
    }

    /// Log density at `x`; `-inf` outside the support.
    pub fn ln_prob(&self, x: f64) -> f64 {
        let (lo, hi) = self.bounds();
        if !(x >= lo && x <= hi) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Prior::Uniform { min, max } => -(max - min).ln(),
            Prior::LogUniform { min, max } => -x.ln() - (max.ln() - min.ln()).ln(),
            Prior::Triangular { mode, min, max } => {
                let density = if x < mode {
                    2.0 * (x - min) / ((max - min) * (mode - min))
                } else if x > mode {
                    2.0 * (max - x) / ((max - min) * (max - mode))
                } else {
                    2.0 / (max - min)
                };
                density.ln()
            }
            Prior::UniformInSquare { min, max } => (2.0 * x / (max * max - min * min)).ln(),
            Prior::Fixed(_) => 0.0,
        }
    }
}

/// Named prior family, parsed from its configuration string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriorChoice {
    #[default]
    Uniform,
    LogUniform,
    #[serde(rename = "triangular")]
    Triangular,
    #[serde(rename = "unif_betasq")]
    UniformBetaSquared,
}

impl PriorChoice {
    pub const ALL: [PriorChoice; 4] = [
        PriorChoice::Uniform,
        PriorChoice::LogUniform,
        PriorChoice::Triangular,
        PriorChoice::UniformBetaSquared,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PriorChoice::Uniform => "Uniform",
            PriorChoice::LogUniform => "LogUniform",
            PriorChoice::Triangular => "triangular",
            PriorChoice::UniformBetaSquared => "unif_betasq",
        }
    }
}

impl fmt::Display for PriorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PriorChoice::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownPrior { name: s.to_string() })
    }
}

fn uniform((min, max): (f64, f64)) -> Prior {
    Prior::Uniform { min, max }
}

fn log_uniform((min, max): (f64, f64)) -> Prior {
    Prior::LogUniform { min, max }
}

fn triangular(mode: f64, (min, max): (f64, f64)) -> Prior {
    Prior::Triangular { mode, min, max }
}

/// Priors for the four sampled parameters plus the fixed distance (m).
#[derive(Debug, Clone, PartialEq)]
pub struct PriorSet {
    pub beta: Prior,
    pub alpha: Prior,
    pub tau: Prior,
    pub s: Prior,
    pub distance: Prior,
}

impl PriorSet {
    /// Build the prior family `choice` for a source at `distance_kpc`.
    ///
    /// τ stays uniform in every family since its range crosses zero.
    pub fn for_choice(choice: PriorChoice, distance_kpc: f64) -> Self {
        let tau = uniform(TAU_RANGE);
        let distance = Prior::Fixed(distance_kpc * KPC_TO_M);
        match choice {
            PriorChoice::Uniform => Self {
                beta: uniform(BETA_RANGE),
                alpha: uniform(ALPHA_RANGE),
                tau,
                s: uniform(S_RANGE),
                distance,
            },
            PriorChoice::LogUniform => Self {
                beta: log_uniform(BETA_RANGE),
                alpha: log_uniform(ALPHA_RANGE),
                tau,
                s: log_uniform(S_RANGE),
                distance,
            },
            PriorChoice::Triangular => Self {
                beta: triangular((BETA_RANGE.1 - BETA_RANGE.0) / 2.0, BETA_RANGE),
                alpha: triangular(ALPHA_RANGE.1 / 2.0, ALPHA_RANGE),
                tau: triangular(-2.5e-4, TAU_RANGE),
                s: triangular((S_RANGE.0 + S_RANGE.1) / 2.0, S_RANGE),
                distance,
            },
            PriorChoice::UniformBetaSquared => Self {
                beta: Prior::UniformInSquare {
                    min: BETA_RANGE.0,
                    max: BETA_RANGE.1,
                },
                alpha: uniform(ALPHA_RANGE),
                tau,
                s: uniform(S_RANGE),
                distance,
            },
        }
    }

    /// Sampled priors in parameter order (β, α, τ, s).
    pub fn sampled(&self) -> [&Prior; 4] {
        [&self.beta, &self.alpha, &self.tau, &self.s]
    }

    /// Look a prior up by parameter name.
    pub fn get(&self, name: &str) -> Option<&Prior> {
        match name {
            "beta" => Some(&self.beta),
            "alpha" => Some(&self.alpha),
            "tau" => Some(&self.tau),
            "s" => Some(&self.s),
            "D" => Some(&self.distance),
            _ => None,
        }
    }

    /// The fixed source distance in metres.
    pub fn distance_m(&self) -> f64 {
        self.distance.bounds().0
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> WaveformParameters {
        let [b, a, t, s] = self.sampled();
        WaveformParameters::new(b.sample(rng), a.sample(rng), t.sample(rng), s.sample(rng))
    }

    /// Joint log prior; the parameters are independent.
    pub fn ln_prob(&self, params: &WaveformParameters) -> f64 {
        self.sampled()
            .iter()
            .zip(params.to_array())
            .map(|(p, x)| p.ln_prob(x))
            .sum()
    }

    pub fn bounds(&self) -> [(f64, f64); 4] {
        self.sampled().map(|p| p.bounds())
    }
}
