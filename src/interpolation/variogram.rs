//! Variogram models and their least-squares fit to an experimental semivariogram.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProcessingError, Result};

/// Range candidates tried during fitting, as multiples of the largest lag.
const RANGE_STEPS: usize = 40;
const RANGE_STEP_FRACTION: f64 = 0.05;
/// Exponent candidates for the power model, in (0, 2).
const POWER_EXPONENTS: usize = 39;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariogramModel {
    Linear,
    Power,
    Gaussian,
    Spherical,
    Exponential,
    HoleEffect,
}

impl VariogramModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariogramModel::Linear => "linear",
            VariogramModel::Power => "power",
            VariogramModel::Gaussian => "gaussian",
            VariogramModel::Spherical => "spherical",
            VariogramModel::Exponential => "exponential",
            VariogramModel::HoleEffect => "hole-effect",
        }
    }

    /// Normalized shape `f(h)` so that `gamma(h) = nugget + psill * f(h)`.
    /// For the unbounded models `range` is the power exponent (power) or unused (linear).
    fn shape(&self, h: f64, range: f64) -> f64 {
        match self {
            VariogramModel::Linear => h,
            VariogramModel::Power => h.powf(range),
            VariogramModel::Spherical => {
                let t = h / range;
                if t < 1.0 {
                    1.5 * t - 0.5 * t.powi(3)
                } else {
                    1.0
                }
            }
            VariogramModel::Exponential => 1.0 - (-3.0 * h / range).exp(),
            VariogramModel::Gaussian => 1.0 - (-(7.0 * h / (4.0 * range)).powi(2)).exp(),
            VariogramModel::HoleEffect => {
                let t = 3.0 * h / range;
                1.0 - (1.0 - t) * (-t).exp()
            }
        }
    }

    fn range_candidates(&self, max_lag: f64) -> Vec<f64> {
        match self {
            VariogramModel::Linear => vec![1.0],
            VariogramModel::Power => (1..=POWER_EXPONENTS).map(|k| k as f64 * 0.05).collect(),
            _ => (1..=RANGE_STEPS)
                .map(|k| k as f64 * RANGE_STEP_FRACTION * max_lag)
                .collect(),
        }
    }
}

impl FromStr for VariogramModel {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "linear" => Ok(VariogramModel::Linear),
            "power" => Ok(VariogramModel::Power),
            "gaussian" => Ok(VariogramModel::Gaussian),
            "spherical" => Ok(VariogramModel::Spherical),
            "exponential" => Ok(VariogramModel::Exponential),
            "hole-effect" => Ok(VariogramModel::HoleEffect),
            _ => Err(ProcessingError::UnknownVariogramModel(s.to_string())),
        }
    }
}

impl fmt::Display for VariogramModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A variogram with fitted parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedVariogram {
    pub model: VariogramModel,
    pub psill: f64,
    /// Range for bounded models, exponent for `power`, 1 for `linear`.
    pub range: f64,
    pub nugget: f64,
}

impl FittedVariogram {
    /// Semivariance at distance `h`; zero at zero distance so kriging honours the data.
    pub fn gamma(&self, h: f64) -> f64 {
        if h <= 0.0 {
            0.0
        } else {
            self.nugget + self.psill * self.model.shape(h, self.range)
        }
    }

    /// True when the fit carries no spatial variance at all.
    pub fn is_flat(&self) -> bool {
        self.psill + self.nugget <= 1e-12
    }
}

/// Binned semivariances `(mean lag, mean semivariance)` of the non-empty bins.
pub fn experimental_semivariogram(coords: &[(f64, f64)], values: &[f64], bins: usize) -> Vec<(f64, f64)> {
    let mut pairs = Vec::with_capacity(coords.len() * coords.len().saturating_sub(1) / 2);
    for i in 0..coords.len() {
        for j in (i + 1)..coords.len() {
            let d = distance(coords[i], coords[j]);
            let g = 0.5 * (values[i] - values[j]).powi(2);
            pairs.push((d, g));
        }
    }
    if pairs.is_empty() || bins == 0 {
        return Vec::new();
    }

    let dmin = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let dmax = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let width = (dmax - dmin) / bins as f64;

    let mut sums = vec![(0.0, 0.0, 0usize); bins];
    for (d, g) in pairs {
        let bin = if width > 0.0 {
            (((d - dmin) / width) as usize).min(bins - 1)
        } else {
            0
        };
        sums[bin].0 += d;
        sums[bin].1 += g;
        sums[bin].2 += 1;
    }

    sums.into_iter()
        .filter(|(_, _, n)| *n > 0)
        .map(|(d, g, n)| (d / n as f64, g / n as f64))
        .collect()
}

/// Least-squares fit of `model` to binned semivariances.
///
/// The range (or power exponent) is found by grid search; for each candidate
/// `psill` and `nugget` solve a non-negative 2x2 least-squares problem.
pub fn fit_variogram(model: VariogramModel, lags: &[(f64, f64)]) -> FittedVariogram {
    let max_lag = lags.iter().map(|l| l.0).fold(0.0, f64::max);
    let mut best = FittedVariogram {
        model,
        psill: 0.0,
        range: max_lag.max(f64::MIN_POSITIVE),
        nugget: lags.iter().map(|l| l.1).sum::<f64>() / lags.len().max(1) as f64,
    };
    if lags.is_empty() || max_lag <= 0.0 {
        return best;
    }

    let mut best_sse = f64::INFINITY;
    for range in model.range_candidates(max_lag) {
        let shapes: Vec<f64> = lags.iter().map(|(h, _)| model.shape(*h, range)).collect();
        let gammas: Vec<f64> = lags.iter().map(|(_, g)| *g).collect();
        let (psill, nugget) = nonnegative_two_param_fit(&shapes, &gammas);

        let sse: f64 = shapes
            .iter()
            .zip(&gammas)
            .map(|(f, g)| (nugget + psill * f - g).powi(2))
            .sum();
        if sse < best_sse {
            best_sse = sse;
            best = FittedVariogram {
                model,
                psill,
                range,
                nugget,
            };
        }
    }

    best
}

/// Minimize `sum (n + p * f_i - g_i)^2` subject to `p >= 0`, `n >= 0`.
fn nonnegative_two_param_fit(f: &[f64], g: &[f64]) -> (f64, f64) {
    let m = f.len() as f64;
    let sf: f64 = f.iter().sum();
    let sg: f64 = g.iter().sum();
    let sff: f64 = f.iter().map(|v| v * v).sum();
    let sfg: f64 = f.iter().zip(g).map(|(a, b)| a * b).sum();

    let det = m * sff - sf * sf;
    if det.abs() > 1e-12 {
        let p = (m * sfg - sf * sg) / det;
        let n = (sg - p * sf) / m;
        if p >= 0.0 && n >= 0.0 {
            return (p, n);
        }
    }

    // Boundary solutions: no nugget, or no partial sill
    let p_only = if sff > 0.0 { (sfg / sff).max(0.0) } else { 0.0 };
    let n_only = (sg / m).max(0.0);
    let sse = |p: f64, n: f64| -> f64 { f.iter().zip(g).map(|(a, b)| (n + p * a - b).powi(2)).sum() };
    if sse(p_only, 0.0) <= sse(0.0, n_only) {
        (p_only, 0.0)
    } else {
        (0.0, n_only)
    }
}

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
