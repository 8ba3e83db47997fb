//! Regression backbones that model the temperature trend from elevation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    BOOSTING_ESTIMATORS, BOOSTING_LEARNING_RATE, BOOSTING_MAX_DEPTH, FOREST_ESTIMATORS, RANDOM_SEED,
    SVR_C, SVR_EPSILON,
};

const SVR_MAX_SWEEPS: usize = 1000;
const SVR_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionModel {
    Linear,
    RandomForest,
    GradientBoosting,
    Svr,
}

impl RegressionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegressionModel::Linear => "linear",
            RegressionModel::RandomForest => "random_forest",
            RegressionModel::GradientBoosting => "gradient_boosting",
            RegressionModel::Svr => "svr",
        }
    }

    /// Fresh, unfitted regressor of this kind.
    pub fn build(&self) -> Box<dyn Regressor> {
        match self {
            RegressionModel::Linear => Box::new(LinearRegression::default()),
            RegressionModel::RandomForest => Box::new(RandomForest::new(FOREST_ESTIMATORS, RANDOM_SEED)),
            RegressionModel::GradientBoosting => Box::new(GradientBoosting::new(
                BOOSTING_ESTIMATORS,
                BOOSTING_LEARNING_RATE,
                BOOSTING_MAX_DEPTH,
            )),
            RegressionModel::Svr => Box::new(SupportVectorRegression::new(SVR_C, SVR_EPSILON)),
        }
    }
}

impl FromStr for RegressionModel {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(RegressionModel::Linear),
            "random_forest" => Ok(RegressionModel::RandomForest),
            "gradient_boosting" => Ok(RegressionModel::GradientBoosting),
            "svr" => Ok(RegressionModel::Svr),
            _ => Err(ProcessingError::UnknownRegressionModel(s.to_string())),
        }
    }
}

impl fmt::Display for RegressionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-feature regressor.
pub trait Regressor: Send + Sync {
    fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<()>;

    fn predict(&self, x: f64) -> f64;

    fn predict_all(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.predict(*x)).collect()
    }
}

fn check_training_set(x: &[f64], y: &[f64]) -> Result<()> {
    if x.is_empty() || x.len() != y.len() {
        return Err(ProcessingError::Interpolation(format!(
            "Regression needs matching non-empty inputs, got {} features and {} targets",
            x.len(),
            y.len()
        )));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(ProcessingError::Interpolation(
            "Regression inputs contain non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Ordinary least squares `y = intercept + slope * x`.
#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    pub intercept: f64,
    pub slope: f64,
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        check_training_set(x, y)?;
        let mx = mean(x);
        let my = mean(y);
        let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();

        // Constant feature: intercept-only model
        self.slope = if sxx > f64::EPSILON { sxy / sxx } else { 0.0 };
        self.intercept = my - self.slope * mx;
        Ok(())
    }

    fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf(f64),
    Split {
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// CART regression tree on one feature, splitting on squared error.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    /// `max_depth = None` grows until leaves are pure or hold one sample.
    pub fn fit(x: &[f64], y: &[f64], max_depth: Option<usize>) -> Self {
        let mut samples: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            root: Self::grow(&samples, 0, max_depth),
        }
    }

    fn grow(samples: &[(f64, f64)], depth: usize, max_depth: Option<usize>) -> TreeNode {
        let n = samples.len();
        let leaf_value = samples.iter().map(|s| s.1).sum::<f64>() / n as f64;
        if n < 2 || max_depth.is_some_and(|d| depth >= d) {
            return TreeNode::Leaf(leaf_value);
        }

        let total: f64 = samples.iter().map(|s| s.1).sum();
        let total_sq: f64 = samples.iter().map(|s| s.1 * s.1).sum();
        let parent_sse = total_sq - total * total / n as f64;
        if parent_sse <= 1e-12 {
            return TreeNode::Leaf(leaf_value);
        }

        // Samples are sorted by x; scan split positions between distinct x values
        let mut best: Option<(usize, f64)> = None;
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 1..n {
            left_sum += samples[i - 1].1;
            left_sq += samples[i - 1].1 * samples[i - 1].1;
            if samples[i].0 <= samples[i - 1].0 {
                continue;
            }
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / i as f64)
                + (right_sq - right_sum * right_sum / (n - i) as f64);
            if best.map_or(true, |(_, b)| sse < b) {
                best = Some((i, sse));
            }
        }

        match best {
            Some((i, _)) => TreeNode::Split {
                threshold: (samples[i - 1].0 + samples[i].0) / 2.0,
                left: Box::new(Self::grow(&samples[..i], depth + 1, max_depth)),
                right: Box::new(Self::grow(&samples[i..], depth + 1, max_depth)),
            },
            None => TreeNode::Leaf(leaf_value),
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf(v) => return *v,
                TreeNode::Split {
                    threshold,
                    left,
                    right,
                } => {
                    node = if x <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Bagged, fully grown regression trees with a fixed seed.
#[derive(Debug, Clone)]
pub struct RandomForest {
    n_estimators: usize,
    seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            seed,
            trees: Vec::new(),
        }
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        check_training_set(x, y)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = x.len();

        self.trees = (0..self.n_estimators)
            .map(|_| {
                let (bx, by): (Vec<f64>, Vec<f64>) = (0..n)
                    .map(|_| {
                        let i = rng.gen_range(0..n);
                        (x[i], y[i])
                    })
                    .unzip();
                RegressionTree::fit(&bx, &by, None)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, x: f64) -> f64 {
        if self.trees.is_empty() {
            return f64::NAN;
        }
        self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64
    }
}

/// Least-squares gradient boosting of shallow trees, starting from the mean.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    init: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(n_estimators: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            init: f64::NAN,
            trees: Vec::new(),
        }
    }
}

impl Regressor for GradientBoosting {
    fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        check_training_set(x, y)?;
        self.init = mean(y);
        self.trees.clear();

        let mut fitted = vec![self.init; y.len()];
        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            let tree = RegressionTree::fit(x, &residuals, Some(self.max_depth));
            for (f, xi) in fitted.iter_mut().zip(x) {
                *f += self.learning_rate * tree.predict(*xi);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, x: f64) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict(x))
                .sum::<f64>()
    }
}

/// Epsilon-SVR with an RBF kernel.
///
/// Solved in the dual by coordinate descent; targets are centred and the
/// remaining bias is folded into the kernel (`K + 1`) so the equality
/// constraint disappears.
#[derive(Debug, Clone)]
pub struct SupportVectorRegression {
    c: f64,
    epsilon: f64,
    gamma: f64,
    offset: f64,
    support: Vec<f64>,
    coefficients: Vec<f64>,
}

impl SupportVectorRegression {
    pub fn new(c: f64, epsilon: f64) -> Self {
        Self {
            c,
            epsilon,
            gamma: 1.0,
            offset: 0.0,
            support: Vec::new(),
            coefficients: Vec::new(),
        }
    }

    fn kernel(&self, a: f64, b: f64) -> f64 {
        (-self.gamma * (a - b).powi(2)).exp() + 1.0
    }
}

impl Regressor for SupportVectorRegression {
    fn fit(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        check_training_set(x, y)?;
        let n = x.len();
        let var = variance(x);
        self.gamma = if var > f64::EPSILON { 1.0 / var } else { 1.0 };
        self.support = x.to_vec();
        self.offset = mean(y);

        let k: Vec<Vec<f64>> = x
            .iter()
            .map(|a| x.iter().map(|b| self.kernel(*a, *b)).collect())
            .collect();

        let mut beta = vec![0.0; n];
        // k_beta[i] = sum_j K[i][j] * beta[j]
        let mut k_beta = vec![0.0; n];
        for _ in 0..SVR_MAX_SWEEPS {
            let mut max_change: f64 = 0.0;
            for i in 0..n {
                let r = (y[i] - self.offset) - (k_beta[i] - k[i][i] * beta[i]);
                let shrunk = r.signum() * (r.abs() - self.epsilon).max(0.0);
                let updated = (shrunk / k[i][i]).clamp(-self.c, self.c);
                let delta = updated - beta[i];
                if delta != 0.0 {
                    for (kb, kij) in k_beta.iter_mut().zip(&k[i]) {
                        *kb += kij * delta;
                    }
                    beta[i] = updated;
                    max_change = max_change.max(delta.abs());
                }
            }
            if max_change < SVR_TOLERANCE {
                break;
            }
        }

        self.coefficients = beta;
        Ok(())
    }

    fn predict(&self, x: f64) -> f64 {
        self.offset
            + self
                .support
                .iter()
                .zip(&self.coefficients)
                .map(|(s, b)| b * self.kernel(*s, x))
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lapse_rate_samples() -> (Vec<f64>, Vec<f64>) {
        // 6.5 degrees per km
        let x = vec![200.0, 350.0, 500.0, 800.0, 1100.0, 1400.0];
        let y = x.iter().map(|e| 20.0 - 0.0065 * e).collect();
        (x, y)
    }

    #[test]
    fn test_parse_regression_model() {
        assert_eq!("linear".parse::<RegressionModel>().unwrap(), RegressionModel::Linear);
        assert_eq!(" Random_Forest ".parse::<RegressionModel>().unwrap(), RegressionModel::RandomForest);
        assert_eq!("svr".parse::<RegressionModel>().unwrap(), RegressionModel::Svr);
        let err = "neural_net".parse::<RegressionModel>().unwrap_err();
        assert!(matches!(err, ProcessingError::UnknownRegressionModel(_)));
    }

    #[test]
    fn test_linear_recovers_lapse_rate() {
        let (x, y) = lapse_rate_samples();
        let mut model = LinearRegression::default();
        model.fit(&x, &y).unwrap();
        assert!((model.slope + 0.0065).abs() < 1e-9);
        assert!((model.intercept - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_feature_predicts_mean() {
        let x = vec![300.0; 4];
        let y = vec![10.0, 12.0, 14.0, 16.0];
        for kind in [
            RegressionModel::Linear,
            RegressionModel::RandomForest,
            RegressionModel::GradientBoosting,
        ] {
            let mut model = kind.build();
            model.fit(&x, &y).unwrap();
            let p = model.predict(300.0);
            assert!(p.is_finite());
            // bootstrap means wander, but stay within the sample range
            assert!((10.0..=16.0).contains(&p), "{} predicted {}", kind, p);
        }
        let mut linear = RegressionModel::Linear.build();
        linear.fit(&x, &y).unwrap();
        assert!((linear.predict(300.0) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_tree_splits_step_function() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 0.0, 10.0, 10.0];
        let tree = RegressionTree::fit(&x, &y, Some(1));
        assert_eq!(tree.predict(1.5), 0.0);
        assert_eq!(tree.predict(3.5), 10.0);
        assert_eq!(tree.predict(2.5), 0.0);
        assert_eq!(tree.predict(2.6), 10.0);
    }

    #[test]
    fn test_forest_is_deterministic() {
        let (x, y) = lapse_rate_samples();
        let mut a = RandomForest::new(20, 42);
        let mut b = RandomForest::new(20, 42);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(650.0), b.predict(650.0));
    }

    #[test]
    fn test_boosting_fits_training_data() {
        let (x, y) = lapse_rate_samples();
        let mut model = GradientBoosting::new(100, 0.1, 3);
        model.fit(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!((model.predict(*xi) - yi).abs() < 0.1);
        }
    }

    #[test]
    fn test_svr_stays_in_epsilon_tube_for_small_targets() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 0.5, 1.0, 0.5, 0.0];
        let mut model = SupportVectorRegression::new(10.0, 0.1);
        model.fit(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!((model.predict(*xi) - yi).abs() < 0.25, "x={} p={}", xi, model.predict(*xi));
        }
    }

    #[test]
    fn test_rejects_non_finite_input() {
        let mut model = LinearRegression::default();
        assert!(model.fit(&[1.0, f64::NAN], &[1.0, 2.0]).is_err());
        assert!(model.fit(&[], &[]).is_err());
    }
}
